//! Configuration management.
//!
//! Configuration is read from `~/.config/tessera/config.toml` at startup.
//! If the file doesn't exist, a default configuration with comments is created.

pub mod sections;

pub use sections::{CacheConfig, FetcherConfig, MergeConfig, ParserConfig};

use serde::Deserialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Main configuration struct.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub fetcher: FetcherConfig,
    pub cache: CacheConfig,
    pub parser: ParserConfig,
    pub merge: MergeConfig,
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, creates a default one with comments.
    /// Missing fields in the config file will use default values.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::default_config_path()?;

        if !config_path.exists() {
            Self::create_default_config(&config_path)?;
            return Ok(Self::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path, which must exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Get the default config file path: `~/.config/tessera/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("tessera").join("config.toml"))
    }

    fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        file.write_all(Self::default_config_content().as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;

        tracing::info!("Wrote default configuration to {}", path.display());
        Ok(())
    }

    /// Generate the default config file content with comments.
    fn default_config_content() -> String {
        r##"# Tessera Configuration

[fetcher]
# Maximum number of concurrent loads
workers = 10

# Dependencies nested deeper than this below the root are not fetched
max_depth = 10

# Timeout of the root request in milliseconds; includes set their own
timeout_ms = 10000

# Follow HTTP redirects for the root request
follow_redirects = true

[cache]
enabled = true

# Upper bounds for the number of entries and their aggregate size
max_entries = 10000
max_size_bytes = 67108864

# Entries older than this are treated as absent
ttl_secs = 300

# Request headers and cookies that contribute to the cache key
include_headers = ["Authorization", "Accept-Encoding", "Host"]
include_cookies = []

# Conditions that should NOT prevent caching. Available reasons:
#   request-method-post, request-method-put, request-method-delete,
#   request-method-connect, request-method-options, request-method-trace,
#   request-method-unknown, request-no-store, request-authorization-header,
#   response-no-store, response-private, response-uncachable-by-default
ignore_reasons = []

# Act as a private cache and store responses marked "private"
private = false

# Log cache statistics every N seconds (0 disables)
log_interval_secs = 0

[parser]
# Collect stylesheet links and scripts so they can be deduplicated
collect_links = true
collect_scripts = true
# Also collect non-stylesheet links such as icons and preloads
collect_all_links = false

[merge]
# "identity" emits every collected stylesheet/script,
# "href-src" keeps the first per href/src
deduplication = "identity"

# "literal" always renders the fallback of optional includes,
# "prefer-fragment" renders the included fragment when it is available
optional_includes = "literal"

# Render the whole page before writing any output
buffered = true
"##
        .to_string()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}
