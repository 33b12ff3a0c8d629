//! Content loaders.
//!
//! A loader turns a [`FetchDefinition`] into content:
//!
//! - [`HttpContentLoader`]: `http`/`https` origins via reqwest
//! - [`FileContentLoader`]: `file://` origins on the local filesystem
//! - [`CachingContentLoader`]: dispatches by scheme and caches cacheable responses

pub mod caching;
pub mod file;
pub mod http;

pub use caching::CachingContentLoader;
pub use file::FileContentLoader;
pub use http::HttpContentLoader;

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_TYPE};

use crate::app::{ComposeError, Result};
use crate::domain::{Content, FetchDefinition, MemoryContent, RawContent};
use crate::parser::ContentParser;

pub const USER_AGENT: &str = concat!("tessera/", env!("CARGO_PKG_VERSION"));

#[async_trait]
pub trait ContentLoader: Send + Sync {
    async fn load(&self, def: &FetchDefinition) -> Result<Arc<dyn Content>>;
}

/// Whether the response declares an HTML body.
pub fn is_html(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim_start().to_ascii_lowercase().starts_with("text/html"))
}

/// Parse `body` into a [`MemoryContent`].
pub(crate) fn parse_content(
    parser: &dyn ContentParser,
    url: &str,
    status: u16,
    headers: HeaderMap,
    body: &[u8],
) -> Result<Arc<dyn Content>> {
    let mut content = MemoryContent::new(url);
    content.status = status;
    content.headers = headers;

    let text = String::from_utf8_lossy(body);
    parser
        .parse(&mut content, &text)
        .map_err(|source| ComposeError::Parse {
            url: url.to_string(),
            source,
        })?;
    Ok(Arc::new(content))
}

pub(crate) fn raw_content(url: &str, status: u16, headers: HeaderMap, body: Vec<u8>) -> Arc<dyn Content> {
    Arc::new(RawContent {
        url: url.to_string(),
        status,
        headers,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::HtmlContentParser;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_is_html() {
        let mut headers = HeaderMap::new();
        assert!(!is_html(&headers));

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("Text/HTML; charset=utf-8"));
        assert!(is_html(&headers));

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        assert!(!is_html(&headers));
    }

    #[test]
    fn test_parse_error_names_url() {
        let parser = HtmlContentParser::new();
        let err = parse_content(&parser, "http://x/", 200, HeaderMap::new(), b"<div class=\"open")
            .unwrap_err();
        assert!(matches!(err, ComposeError::Parse { ref url, .. } if url == "http://x/"));
    }
}
