use std::time::Duration;

use serde::Deserialize;

use crate::cache::{CacheStrategy, NotCacheableReason, DEFAULT_INCLUDE_HEADERS};
use crate::fetcher::{DEFAULT_MAX_DEPTH, DEFAULT_WORKERS};
use crate::merge::DeduplicationMode;
use crate::parser::HtmlContentParser;
use crate::template::OptionalIncludePolicy;

/// Fetch scheduling
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    /// Maximum concurrent loads (default: 10)
    pub workers: usize,

    /// Maximum dependency nesting below the root (default: 10)
    pub max_depth: usize,

    /// Timeout for the root request in milliseconds (default: 10000)
    pub timeout_ms: u64,

    /// Follow redirects of the root request (default: true)
    pub follow_redirects: bool,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            max_depth: DEFAULT_MAX_DEPTH,
            timeout_ms: 10_000,
            follow_redirects: true,
        }
    }
}

impl FetcherConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Response cache
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,

    /// Entry cap (default: 10000)
    pub max_entries: usize,

    /// Aggregate size budget in bytes (default: 64 MiB)
    pub max_size_bytes: usize,

    /// Time to live in seconds (default: 300)
    pub ttl_secs: u64,

    /// Request headers that contribute to the cache key
    pub include_headers: Vec<String>,

    /// Cookies that contribute to the cache key
    pub include_cookies: Vec<String>,

    /// Reasons that do not prevent caching, e.g. "request-method-post"
    pub ignore_reasons: Vec<NotCacheableReason>,

    /// Cache responses marked `private` (default: false)
    pub private: bool,

    /// Log cache statistics every N seconds, 0 disables (default: 0)
    pub log_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 10_000,
            max_size_bytes: 64 * 1024 * 1024,
            ttl_secs: 300,
            include_headers: DEFAULT_INCLUDE_HEADERS.iter().map(|h| h.to_string()).collect(),
            include_cookies: Vec::new(),
            ignore_reasons: Vec::new(),
            private: false,
            log_interval_secs: 0,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn log_interval(&self) -> Option<Duration> {
        (self.log_interval_secs > 0).then(|| Duration::from_secs(self.log_interval_secs))
    }

    pub fn strategy(&self) -> CacheStrategy {
        CacheStrategy::new(
            self.include_headers.clone(),
            self.include_cookies.clone(),
            self.ignore_reasons.clone(),
        )
        .private_cache(self.private)
    }
}

/// Markup parsing
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Collect `<link rel="stylesheet">` tags for deduplication (default: true)
    pub collect_links: bool,

    /// Collect `<script>` tags for deduplication (default: true)
    pub collect_scripts: bool,

    /// Collect every `<link>`, not only stylesheets (default: false)
    pub collect_all_links: bool,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            collect_links: true,
            collect_scripts: true,
            collect_all_links: false,
        }
    }
}

impl ParserConfig {
    pub fn parser(&self) -> HtmlContentParser {
        HtmlContentParser::with_collection(self.collect_links, self.collect_scripts)
            .with_all_links(self.collect_all_links)
    }
}

/// Rendering
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    pub deduplication: DeduplicationMode,

    pub optional_includes: OptionalIncludePolicy,

    /// Render fully before writing (default: true)
    pub buffered: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            deduplication: DeduplicationMode::default(),
            optional_includes: OptionalIncludePolicy::default(),
            buffered: true,
        }
    }
}
