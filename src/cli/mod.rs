pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tessera")]
#[command(about = "Compose HTML pages from independently served fragments", long_about = None)]
pub struct Cli {
    /// Number of parallel workers for fetching fragments (default from config)
    #[arg(short, long, global = true)]
    pub workers: Option<usize>,

    /// Path to a configuration file instead of ~/.config/tessera/config.toml
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch a page with all its includes and print the composed HTML
    Compose {
        /// URLs or local paths; the first is the page, the rest are merged into it
        #[arg(required = true)]
        urls: Vec<String>,

        /// Request header forwarded to the origins, as "Name: value"
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Metadata value available to placeholders, as "key=value"
        #[arg(short, long)]
        meta: Vec<String>,

        /// Write the result to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Parse a document and show its fragments, dependencies and metadata
    Parse {
        /// Path to the HTML document
        path: PathBuf,
    },
    /// Print the cache key and cacheability of a request
    CacheKey {
        url: String,

        /// Request header, as "Name: value"
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Request method
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,
    },
}
