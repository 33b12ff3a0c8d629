use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tessera::app::AppContext;
use tessera::cli::{commands, Cli, Commands};
use tessera::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let ctx = match cli.workers {
        Some(workers) => AppContext::with_workers(config, workers)?,
        None => AppContext::new(config)?,
    };

    match cli.command {
        Commands::Compose {
            urls,
            headers,
            meta,
            output,
        } => {
            commands::compose(&ctx, &urls, &headers, &meta, output.as_deref()).await?;
        }
        Commands::Parse { path } => {
            commands::parse_document(&ctx, &path)?;
        }
        Commands::CacheKey {
            url,
            headers,
            method,
        } => {
            commands::cache_key(&ctx, &url, &headers, &method)?;
        }
    }

    Ok(())
}
