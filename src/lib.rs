//! # Tessera
//!
//! A server-side fragment composition engine: one HTML page is assembled
//! from independently served HTML fragments.
//!
//! ## Architecture
//!
//! ```text
//! Loader → Parser → Fetcher → Merge → HTML
//! ```
//!
//! - [`loader`]: HTTP and file origins, with a response cache
//! - [`parser`]: extracts fragments, dependencies and metadata from `uic-*` markup
//! - [`fetcher`]: fetches the dependency tree concurrently, once per dependency hash
//! - [`merge`]: resolves fragment references and renders the page
//!
//! ## Quick Start
//!
//! ```bash
//! # Compose a page served over HTTP
//! tessera compose http://localhost:8080/
//!
//! # Compose local files
//! tessera compose pages/index.html -o out.html
//!
//! # Inspect what a document declares
//! tessera parse pages/index.html
//! ```
//!
//! ## Modules
//!
//! - [`app`]: Application context, composer and error types
//! - [`cache`]: Bounded content cache and cache-key strategy
//! - [`cli`]: Command-line interface definitions
//! - [`config`]: TOML configuration
//! - [`discovery`]: Service name resolution
//! - [`domain`]: Fetch definitions, contents and fragments
//! - [`template`]: `§[ ... ]§` placeholder expansion

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together all components:
/// parser, loaders, cache. [`Composer`](app::Composer) runs one composition.
pub mod app;

/// Bounded LRU cache with TTL, plus HTTP cacheability rules.
///
/// - [`Cache`](cache::Cache): size- and count-bounded content store
/// - [`CacheStrategy`](cache::CacheStrategy): cache keys and RFC 7234 decisions
pub mod cache;

/// Command-line interface using clap.
///
/// - `compose <url>...` - Compose a page and print it
/// - `parse <file>` - Show what a document declares
/// - `cache-key <url>` - Show the cache key of a request
pub mod cli;

/// Configuration management.
///
/// Loads from `~/.config/tessera/config.toml`.
pub mod config;

/// Resolution of logical service names to addresses.
pub mod discovery;

/// Core domain models.
///
/// - [`FetchDefinition`](domain::FetchDefinition): what to fetch and how
/// - [`Content`](domain::Content): a fetched resource, parsed or raw
/// - [`Fragment`](domain::Fragment): an executable template unit
pub mod domain;

/// Concurrent fetching with hash deduplication and a worker semaphore.
pub mod fetcher;

/// Content loaders for HTTP and file origins.
pub mod loader;

/// Merging of fetched contents into one document.
pub mod merge;

/// Markup parsing of `uic-*` composition elements.
pub mod parser;

/// Placeholder substitution.
pub mod template;
