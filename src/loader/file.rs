use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use url::Url;

use crate::app::{ComposeError, Result};
use crate::domain::{Content, FetchDefinition};
use crate::loader::{parse_content, raw_content, ContentLoader};
use crate::parser::ContentParser;

const INDEX_FILE: &str = "index.html";

/// Loads `file://` URLs from the local filesystem.
pub struct FileContentLoader {
    parser: Arc<dyn ContentParser>,
}

impl FileContentLoader {
    pub fn new(parser: Arc<dyn ContentParser>) -> Self {
        Self { parser }
    }

    fn path_for(url: &str) -> Result<PathBuf> {
        let parsed = Url::parse(url)?;
        if parsed.scheme() != "file" {
            return Err(ComposeError::UnsupportedScheme(parsed.scheme().to_string()));
        }
        parsed
            .to_file_path()
            .map_err(|_| ComposeError::NotFound(url.to_string()))
    }
}

fn is_html_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("html") || e.eq_ignore_ascii_case("htm"))
}

#[async_trait]
impl ContentLoader for FileContentLoader {
    async fn load(&self, def: &FetchDefinition) -> Result<Arc<dyn Content>> {
        let mut path = Self::path_for(&def.url)?;
        if tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            path.push(INDEX_FILE);
        }

        tracing::debug!("Loading {} from {}", def.url, path.display());
        let body = match tokio::fs::read(&path).await {
            Ok(body) => body,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ComposeError::NotFound(def.url.clone()))
            }
            Err(e) => return Err(e.into()),
        };

        let mut headers = HeaderMap::new();
        if is_html_path(&path) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
            return parse_content(self.parser.as_ref(), &def.url, 200, headers, &body);
        }
        Ok(raw_content(&def.url, 200, headers, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::HtmlContentParser;
    use std::fs;
    use tempfile::TempDir;

    fn loader() -> FileContentLoader {
        FileContentLoader::new(Arc::new(HtmlContentParser::new()))
    }

    fn file_url(path: &Path) -> String {
        Url::from_file_path(path).unwrap().to_string()
    }

    #[tokio::test]
    async fn test_loads_and_parses_html() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("page.html");
        fs::write(
            &path,
            r#"<body><uic-fragment name="main">hi <uic-include src="nav.html#menu" required/></uic-fragment></body>"#,
        )
        .unwrap();

        let content = loader().load(&FetchDefinition::new(file_url(&path))).await.unwrap();
        assert_eq!(content.status(), 200);
        let body = content.body().unwrap();
        assert_eq!(body.get("main").unwrap().content(), "hi §[> nav.html#menu]§");

        let deps = content.required_content();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].url, file_url(&dir.path().join("nav.html")));
    }

    #[tokio::test]
    async fn test_directory_maps_to_index() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("index.html"), "<body>index</body>").unwrap();

        let content = loader()
            .load(&FetchDefinition::new(file_url(dir.path())))
            .await
            .unwrap();
        assert_eq!(content.body().unwrap().get("").unwrap().content(), "index");
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let url = file_url(&dir.path().join("missing.html"));

        let err = loader().load(&FetchDefinition::new(url.clone())).await.unwrap_err();
        assert!(matches!(err, ComposeError::NotFound(ref u) if *u == url));
        assert_eq!(err.status(), Some(404));
    }

    #[tokio::test]
    async fn test_non_html_is_raw() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.js");
        fs::write(&path, "console.log(1)").unwrap();

        let content = loader().load(&FetchDefinition::new(file_url(&path))).await.unwrap();
        assert!(content.body().is_none());
        assert_eq!(content.raw_body(), Some(&b"console.log(1)"[..]));
    }

    #[tokio::test]
    async fn test_rejects_other_schemes() {
        let err = loader()
            .load(&FetchDefinition::new("http://example.com/"))
            .await
            .unwrap_err();
        assert!(matches!(err, ComposeError::UnsupportedScheme(ref s) if s == "http"));
    }
}
