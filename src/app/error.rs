use thiserror::Error;

use crate::config::ConfigError;
use crate::parser::ParseError;
use crate::template::TemplateError;

#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse {url}: {source}")]
    Parse {
        url: String,
        #[source]
        source: ParseError,
    },

    #[error("Render error: {0}")]
    Template(#[from] TemplateError),

    #[error("Unexpected status {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Not fetched yet")]
    NotFetched,

    #[error("Dependency depth limit of {limit} exceeded at {url}")]
    DependencyDepthExceeded { url: String, limit: usize },

    #[error("Required fetch {name} ({url}) failed: {reason}")]
    RequiredFetchFailed {
        name: String,
        url: String,
        reason: String,
    },

    #[error("Service discovery failed for {service}: {reason}")]
    Discovery { service: String, reason: String },

    #[error("Response processing failed for {url}: {reason}")]
    ResponseProcessor { url: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    ConfigFile(#[from] ConfigError),

    #[error("{0}")]
    Other(String),
}

impl ComposeError {
    /// HTTP status implied by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ComposeError::Status { status, .. } => Some(*status),
            ComposeError::NotFound(_) => Some(404),
            ComposeError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ComposeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_for_not_found() {
        let err = ComposeError::NotFound("file:///missing.html".into());
        assert_eq!(err.status(), Some(404));
    }

    #[test]
    fn test_status_for_upstream_status() {
        let err = ComposeError::Status {
            url: "http://example.com/".into(),
            status: 503,
        };
        assert_eq!(err.status(), Some(503));
        assert_eq!(
            err.to_string(),
            "Unexpected status 503 from http://example.com/"
        );
    }

    #[test]
    fn test_status_absent_for_other_errors() {
        assert_eq!(ComposeError::NotFetched.status(), None);
        assert_eq!(ComposeError::Other("boom".into()).status(), None);
    }
}
