use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde_json::{Map, Value};

use crate::app::error::{ComposeError, Result};
use crate::config::MergeConfig;
use crate::domain::headers::forwardable_response_headers;
use crate::domain::FetchDefinition;
use crate::fetcher::{sort_by_priority, ContentFetcher, FetchResult, DEFAULT_MAX_DEPTH, DEFAULT_WORKERS};
use crate::loader::ContentLoader;
use crate::merge::ContentMerge;

/// A rendered page, or an unparsed root passed through unchanged.
#[derive(Debug, Clone)]
pub struct Composition {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    /// `false` when the root was passed through without composition.
    pub composed: bool,
}

/// Runs one composition: fetch the tree, check failures, merge, render.
pub struct Composer {
    loader: Arc<dyn ContentLoader>,
    workers: usize,
    max_depth: usize,
    merge: MergeConfig,
}

impl Composer {
    pub fn new(loader: Arc<dyn ContentLoader>) -> Self {
        Self {
            loader,
            workers: DEFAULT_WORKERS,
            max_depth: DEFAULT_MAX_DEPTH,
            merge: MergeConfig::default(),
        }
    }

    pub fn with_limits(mut self, workers: usize, max_depth: usize) -> Self {
        self.workers = workers;
        self.max_depth = max_depth;
        self
    }

    pub fn with_merge_config(mut self, merge: MergeConfig) -> Self {
        self.merge = merge;
        self
    }

    /// Compose the pages described by `defs`; the first one is the root.
    ///
    /// `meta` seeds the metadata used for URL and fragment placeholders.
    pub async fn compose(&self, defs: Vec<FetchDefinition>, meta: Map<String, Value>) -> Result<Composition> {
        let root_url = defs
            .first()
            .map(|d| d.url.clone())
            .ok_or_else(|| ComposeError::Other("nothing to compose".into()))?;

        let fetcher = ContentFetcher::with_limits(self.loader.clone(), self.workers, self.max_depth).with_meta(meta);
        for def in defs {
            fetcher.add_job(def);
        }
        let mut results = fetcher.wait_for_results().await;
        check_failures(&results)?;

        let root = results
            .first()
            .and_then(|r| r.content.clone())
            .ok_or(ComposeError::NotFetched)?;

        if let Some(raw) = root.raw_body() {
            tracing::info!("Passing {} through without composition", root_url);
            return Ok(Composition {
                status: root.status(),
                headers: forwardable_response_headers(root.headers()),
                body: raw.to_vec(),
                composed: false,
            });
        }

        // Roots merge after their dependencies of equal priority so the
        // page's own default fragment is the one rendered.
        results.sort_by_key(|r| r.depth == 0);
        sort_by_priority(&mut results);

        let mut merge = ContentMerge::new()
            .with_deduplication(self.merge.deduplication.strategy())
            .with_policy(self.merge.optional_includes)
            .buffered(self.merge.buffered);
        merge.meta_mut().extend(fetcher.meta());

        let mut merged = 0;
        for result in &results {
            match &result.content {
                Some(content) if content.body().is_some() => {
                    merge.add_content(&result.def.name, content.as_ref(), result.def.priority);
                    merged += 1;
                }
                Some(_) => tracing::debug!("Skipping unparsed dependency {}", result.def.url),
                None => {}
            }
        }

        let mut html = String::new();
        merge.write_html(&mut html)?;
        tracing::info!("Composed {} from {} contents", root_url, merged);

        let mut headers = forwardable_response_headers(root.headers());
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
        Ok(Composition {
            status: root.status(),
            headers,
            body: html.into_bytes(),
            composed: true,
        })
    }
}

/// Fail on the first required result that failed; log optional failures.
fn check_failures(results: &[FetchResult]) -> Result<()> {
    for result in results {
        let Some(error) = &result.error else {
            continue;
        };
        if result.def.required {
            return Err(ComposeError::RequiredFetchFailed {
                name: result.def.name.clone(),
                url: result.def.url.clone(),
                reason: error.to_string(),
            });
        }
        tracing::warn!("Optional fetch {} failed: {}", result.def.url, error);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Content, RawContent};
    use crate::loader::parse_content;
    use crate::parser::HtmlContentParser;
    use async_trait::async_trait;
    use reqwest::header::{CACHE_CONTROL, SET_COOKIE};
    use std::collections::HashMap;

    #[derive(Default)]
    struct PageLoader {
        pages: HashMap<String, String>,
    }

    impl PageLoader {
        fn page(mut self, url: &str, html: &str) -> Self {
            self.pages.insert(url.to_string(), html.to_string());
            self
        }
    }

    #[async_trait]
    impl ContentLoader for PageLoader {
        async fn load(&self, def: &FetchDefinition) -> Result<Arc<dyn Content>> {
            if def.url.ends_with(".png") {
                return Ok(Arc::new(RawContent {
                    url: def.url.clone(),
                    status: 200,
                    headers: HeaderMap::new(),
                    body: vec![0x89, b'P', b'N', b'G'],
                }));
            }
            let html = self
                .pages
                .get(&def.url)
                .ok_or_else(|| ComposeError::NotFound(def.url.clone()))?;

            let mut headers = HeaderMap::new();
            headers.insert(SET_COOKIE, HeaderValue::from_static("s=1"));
            headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            parse_content(&HtmlContentParser::new(), &def.url, 200, headers, html.as_bytes())
        }
    }

    fn composer(loader: PageLoader) -> Composer {
        Composer::new(Arc::new(loader))
    }

    fn html(composition: &Composition) -> String {
        String::from_utf8(composition.body.clone()).unwrap()
    }

    #[tokio::test]
    async fn test_compose_page_with_includes() {
        let loader = PageLoader::default()
            .page(
                "http://x/",
                r#"<html><head><title>§[ title ]§</title></head><body>
<uic-fragment name="">
  <main><uic-include src="http://x/nav#menu" required="true"/></main>
  <uic-include src="http://x/teaser">no teaser</uic-include>
</uic-fragment></body></html>"#,
            )
            .page(
                "http://x/nav",
                r#"<script type="text/uic-meta">{"title": "Start"}</script><uic-fragment name="menu">MENU</uic-fragment>"#,
            );

        let composition = composer(loader)
            .compose(vec![FetchDefinition::new("http://x/")], Map::new())
            .await
            .unwrap();

        assert!(composition.composed);
        assert_eq!(composition.status, 200);
        let html = html(&composition);
        assert!(html.starts_with("<html><head><title>Start</title></head><body>"));
        assert!(html.contains("<main>MENU</main>"));
        assert!(html.contains("no teaser"));

        assert!(composition.headers.contains_key(SET_COOKIE));
        assert!(!composition.headers.contains_key(CACHE_CONTROL));
        assert_eq!(
            composition.headers.get(CONTENT_TYPE).unwrap(),
            "text/html; charset=utf-8"
        );
    }

    #[tokio::test]
    async fn test_root_default_fragment_wins_over_dependency_default() {
        let loader = PageLoader::default()
            .page("http://x/", r#"<body>page <uic-include src="http://x/box" required/></body>"#)
            .page("http://x/box", "<body>box</body>");

        let composition = composer(loader)
            .compose(vec![FetchDefinition::new("http://x/")], Map::new())
            .await
            .unwrap();
        assert!(html(&composition).contains("<body>page box</body>"));
    }

    #[tokio::test]
    async fn test_required_failure_fails_composition() {
        let loader = PageLoader::default().page(
            "http://x/",
            r#"<body><uic-include src="http://x/missing" required="true"/></body>"#,
        );

        let err = composer(loader)
            .compose(vec![FetchDefinition::new("http://x/")], Map::new())
            .await
            .unwrap_err();
        match err {
            ComposeError::RequiredFetchFailed { url, reason, .. } => {
                assert_eq!(url, "http://x/missing");
                assert!(reason.contains("Not found"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_optional_failure_is_tolerated() {
        let loader = PageLoader::default().page(
            "http://x/",
            r#"<body>[<uic-include src="http://x/missing">fallback</uic-include>]</body>"#,
        );

        let composition = composer(loader)
            .compose(vec![FetchDefinition::new("http://x/")], Map::new())
            .await
            .unwrap();
        assert!(html(&composition).contains("<body>[fallback]</body>"));
    }

    #[tokio::test]
    async fn test_raw_root_passes_through() {
        let composition = composer(PageLoader::default())
            .compose(vec![FetchDefinition::new("http://x/logo.png")], Map::new())
            .await
            .unwrap();
        assert!(!composition.composed);
        assert_eq!(composition.body, vec![0x89, b'P', b'N', b'G']);
    }

    #[tokio::test]
    async fn test_seed_meta_reaches_fragments() {
        let loader = PageLoader::default().page("http://x/", "<body>Hello §[ user.name ]§</body>");
        let mut meta = Map::new();
        meta.insert("user".into(), serde_json::json!({"name": "Ada"}));

        let composition = composer(loader)
            .compose(vec![FetchDefinition::new("http://x/")], meta)
            .await
            .unwrap();
        assert!(html(&composition).contains("<body>Hello Ada</body>"));
    }

    #[tokio::test]
    async fn test_empty_request_is_error() {
        let err = composer(PageLoader::default())
            .compose(Vec::new(), Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ComposeError::Other(_)));
    }
}
