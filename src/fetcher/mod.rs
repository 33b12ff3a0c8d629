//! Concurrent, deduplicating fetch of a content tree.
//!
//! Every job is keyed by its dependency hash and fetched at most once. When a
//! content loads, its metadata is merged into a shared map and each declared
//! dependency is scheduled as a new job. `wait_for_results` returns once no
//! job is outstanding.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value};
use tokio::sync::{Notify, Semaphore};

use crate::app::{ComposeError, Result};
use crate::domain::{Content, FetchDefinition};
use crate::loader::ContentLoader;
use crate::template::{execute_template, TemplateError, MARKER_OPEN};

pub const DEFAULT_WORKERS: usize = 10;
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// Outcome of one fetch job.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub def: FetchDefinition,
    pub hash: String,
    /// Distance from the root job.
    pub depth: usize,
    pub content: Option<Arc<dyn Content>>,
    pub error: Option<Arc<ComposeError>>,
    pub status: Option<u16>,
}

impl FetchResult {
    fn pending(def: FetchDefinition, hash: String, depth: usize) -> Self {
        Self {
            def,
            hash,
            depth,
            content: None,
            error: Some(Arc::new(ComposeError::NotFetched)),
            status: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none() && self.content.is_some()
    }
}

/// Stable ascending sort, so higher priorities are merged last and win.
pub fn sort_by_priority(results: &mut [FetchResult]) {
    results.sort_by_key(|r| r.def.priority);
}

struct JobState {
    results: Vec<FetchResult>,
    hashes: HashSet<String>,
    outstanding: usize,
    meta: Map<String, Value>,
}

struct Shared {
    loader: Arc<dyn ContentLoader>,
    semaphore: Semaphore,
    max_depth: usize,
    state: Mutex<JobState>,
    done: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Schedules fetch jobs on the tokio runtime.
#[derive(Clone)]
pub struct ContentFetcher {
    shared: Arc<Shared>,
}

impl ContentFetcher {
    pub fn new(loader: Arc<dyn ContentLoader>) -> Self {
        Self::with_limits(loader, DEFAULT_WORKERS, DEFAULT_MAX_DEPTH)
    }

    pub fn with_workers(loader: Arc<dyn ContentLoader>, workers: usize) -> Self {
        Self::with_limits(loader, workers, DEFAULT_MAX_DEPTH)
    }

    pub fn with_limits(loader: Arc<dyn ContentLoader>, workers: usize, max_depth: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                loader,
                semaphore: Semaphore::new(workers.max(1)),
                max_depth,
                state: Mutex::new(JobState {
                    results: Vec::new(),
                    hashes: HashSet::new(),
                    outstanding: 0,
                    meta: Map::new(),
                }),
                done: Notify::new(),
            }),
        }
    }

    /// Seed the shared metadata, e.g. with request values used in URL templates.
    pub fn with_meta(self, meta: Map<String, Value>) -> Self {
        self.shared.lock().meta.extend(meta);
        self
    }

    /// Schedule `def` unless a job with the same hash already exists.
    ///
    /// Must be called from within a tokio runtime.
    pub fn add_job(&self, def: FetchDefinition) {
        spawn_job(&self.shared, def, 0);
    }

    /// Wait until every scheduled job, including discovered dependencies, has finished.
    pub async fn wait_for_results(&self) -> Vec<FetchResult> {
        loop {
            let notified = self.shared.done.notified();
            {
                let state = self.shared.lock();
                if state.outstanding == 0 {
                    return state.results.clone();
                }
            }
            notified.await;
        }
    }

    /// Snapshot of the results so far; pending jobs carry a "not fetched" error.
    pub fn results(&self) -> Vec<FetchResult> {
        self.shared.lock().results.clone()
    }

    /// Snapshot of the merged metadata.
    pub fn meta(&self) -> Map<String, Value> {
        self.shared.lock().meta.clone()
    }

    pub fn len(&self) -> usize {
        self.shared.lock().results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn spawn_job(shared: &Arc<Shared>, def: FetchDefinition, depth: usize) {
    let hash = def.hash();
    let index = {
        let mut state = shared.lock();
        if !state.hashes.insert(hash.clone()) {
            return;
        }

        let mut result = FetchResult::pending(def.clone(), hash, depth);
        if depth > shared.max_depth {
            tracing::warn!("Dependency depth limit reached at {}", def.url);
            result.error = Some(Arc::new(ComposeError::DependencyDepthExceeded {
                url: def.url.clone(),
                limit: shared.max_depth,
            }));
            state.results.push(result);
            return;
        }

        state.results.push(result);
        state.outstanding += 1;
        state.results.len() - 1
    };

    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        run_job(&shared, index, def, depth).await;

        let mut state = shared.lock();
        state.outstanding -= 1;
        if state.outstanding == 0 {
            shared.done.notify_waiters();
        }
    });
}

async fn run_job(shared: &Arc<Shared>, index: usize, def: FetchDefinition, depth: usize) {
    let outcome = {
        let _permit = shared.semaphore.acquire().await.ok();
        load(shared, def.clone()).await
    };

    match outcome {
        Ok(content) => {
            tracing::debug!("Fetched {} ({})", def.url, content.status());
            {
                let mut state = shared.lock();
                if let Some(meta) = content.meta() {
                    state.meta.extend(meta.clone());
                }
                let result = &mut state.results[index];
                result.status = Some(content.status());
                result.content = Some(Arc::clone(&content));
                result.error = None;
            }

            for dependency in content.required_content() {
                if dependency.is_fetchable() {
                    spawn_job(shared, def.child(dependency), depth + 1);
                }
            }
        }
        Err(e) => {
            tracing::debug!("Fetching {} failed: {}", def.url, e);
            let mut state = shared.lock();
            let result = &mut state.results[index];
            result.status = e.status();
            result.error = Some(Arc::new(e));
        }
    }
}

/// Expand the URL against the shared metadata and load it on its own task.
async fn load(shared: &Arc<Shared>, mut def: FetchDefinition) -> Result<Arc<dyn Content>> {
    if def.url.contains(MARKER_OPEN) {
        let meta = shared.lock().meta.clone();
        def.url = expand_url(&def.url, &meta)?;
    }

    let loader = Arc::clone(&shared.loader);
    let url = def.url.clone();
    match tokio::spawn(async move { loader.load(&def).await }).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!("Task join error for {}: {}", url, e);
            Err(ComposeError::Other(format!("fetch task for {} failed: {}", url, e)))
        }
    }
}

/// Substitute `§[ ... ]§` variables in a URL; fragment references are not allowed.
pub fn expand_url(url: &str, meta: &Map<String, Value>) -> Result<String> {
    let mut out = String::with_capacity(url.len());
    execute_template(&mut out, url, meta, &mut |name, _| {
        Err(TemplateError::UnexpectedFragment {
            name: name.to_string(),
        })
    })?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::parse_content;
    use crate::parser::HtmlContentParser;
    use async_trait::async_trait;
    use reqwest::header::HeaderMap;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Serves HTML documents from memory.
    #[derive(Default)]
    struct MemoryLoader {
        pages: HashMap<String, String>,
        calls: Mutex<Vec<String>>,
    }

    impl MemoryLoader {
        fn page(mut self, url: &str, html: &str) -> Self {
            self.pages.insert(url.to_string(), html.to_string());
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ContentLoader for MemoryLoader {
        async fn load(&self, def: &FetchDefinition) -> Result<Arc<dyn Content>> {
            self.calls.lock().unwrap().push(def.url.clone());
            let html = self
                .pages
                .get(&def.url)
                .ok_or_else(|| ComposeError::NotFound(def.url.clone()))?;
            parse_content(&HtmlContentParser::new(), &def.url, 200, HeaderMap::new(), html.as_bytes())
        }
    }

    /// Every page `http://x/N` includes `http://x/N+1`.
    struct ChainLoader;

    #[async_trait]
    impl ContentLoader for ChainLoader {
        async fn load(&self, def: &FetchDefinition) -> Result<Arc<dyn Content>> {
            let n: usize = def.url.trim_start_matches("http://x/").parse().unwrap();
            let html = format!(r#"<uic-include src="http://x/{}" required/>"#, n + 1);
            parse_content(&HtmlContentParser::new(), &def.url, 200, HeaderMap::new(), html.as_bytes())
        }
    }

    /// Tracks the peak number of concurrent loads.
    #[derive(Default)]
    struct SlowLoader {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ContentLoader for SlowLoader {
        async fn load(&self, def: &FetchDefinition) -> Result<Arc<dyn Content>> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);

            let html = if def.url == "http://x/root" {
                (0..6)
                    .map(|i| format!(r#"<uic-include src="http://x/{}" required/>"#, i))
                    .collect::<String>()
            } else {
                String::from("leaf")
            };
            parse_content(&HtmlContentParser::new(), &def.url, 200, HeaderMap::new(), html.as_bytes())
        }
    }

    fn urls(results: &[FetchResult]) -> Vec<String> {
        let mut urls: Vec<String> = results.iter().map(|r| r.def.url.clone()).collect();
        urls.sort();
        urls
    }

    #[tokio::test]
    async fn test_single_job() {
        let loader = Arc::new(MemoryLoader::default().page("http://x/", "<body>root</body>"));
        let fetcher = ContentFetcher::new(loader);
        fetcher.add_job(FetchDefinition::new("http://x/"));

        let results = fetcher.wait_for_results().await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_ok());
        assert_eq!(results[0].status, Some(200));
        assert_eq!(results[0].depth, 0);
    }

    #[tokio::test]
    async fn test_wait_without_jobs_returns_immediately() {
        let fetcher = ContentFetcher::new(Arc::new(MemoryLoader::default()));
        assert!(fetcher.wait_for_results().await.is_empty());
        assert!(fetcher.is_empty());
    }

    #[tokio::test]
    async fn test_transitive_dependencies_fetched_once() {
        let loader = Arc::new(
            MemoryLoader::default()
                .page(
                    "http://x/",
                    r#"<uic-include src="http://x/a" required/><uic-include src="http://x/b#f"/>"#,
                )
                .page("http://x/a", r#"<uic-include src="http://x/b" required/>"#)
                .page("http://x/b", r#"<uic-fragment name="f">B</uic-fragment>"#),
        );
        let fetcher = ContentFetcher::new(loader.clone());
        fetcher.add_job(FetchDefinition::new("http://x/"));
        fetcher.add_job(FetchDefinition::new("http://x/"));

        let results = fetcher.wait_for_results().await;
        assert_eq!(urls(&results), vec!["http://x/", "http://x/a", "http://x/b"]);
        assert!(results.iter().all(FetchResult::is_ok));
        assert_eq!(loader.calls().len(), 3);

        let hashes: HashSet<_> = results.iter().map(|r| r.hash.clone()).collect();
        assert_eq!(hashes.len(), 3);
    }

    #[tokio::test]
    async fn test_failure_recorded_without_recursion() {
        let loader = Arc::new(
            MemoryLoader::default().page("http://x/", r#"<uic-include src="http://x/missing" required/>"#),
        );
        let fetcher = ContentFetcher::new(loader);
        fetcher.add_job(FetchDefinition::new("http://x/"));

        let results = fetcher.wait_for_results().await;
        let missing = results.iter().find(|r| r.def.url == "http://x/missing").unwrap();
        assert!(missing.content.is_none());
        assert!(matches!(missing.error.as_deref(), Some(ComposeError::NotFound(_))));
        assert_eq!(missing.status, Some(404));
        assert_eq!(missing.depth, 1);
    }

    #[tokio::test]
    async fn test_deep_failure_leaves_siblings_and_ancestors_intact() {
        let loader = Arc::new(
            MemoryLoader::default()
                .page(
                    "http://x/",
                    r#"<uic-include src="http://x/a" required/><uic-include src="http://x/b" required/>"#,
                )
                .page("http://x/a", r#"<uic-include src="http://x/missing" required/>"#)
                .page("http://x/b", "b"),
        );
        let fetcher = ContentFetcher::new(loader);
        fetcher.add_job(FetchDefinition::new("http://x/"));

        let results = fetcher.wait_for_results().await;
        assert_eq!(
            urls(&results),
            vec!["http://x/", "http://x/a", "http://x/b", "http://x/missing"]
        );
        for result in &results {
            if result.def.url == "http://x/missing" {
                assert!(!result.is_ok());
                assert!(result.def.required);
                assert_eq!(result.depth, 2);
                assert!(matches!(result.error.as_deref(), Some(ComposeError::NotFound(_))));
            } else {
                assert!(result.is_ok(), "{} failed: {:?}", result.def.url, result.error);
            }
        }
    }

    #[tokio::test]
    async fn test_url_expanded_from_meta() {
        let loader = Arc::new(
            MemoryLoader::default()
                .page(
                    "http://x/",
                    r#"<script type="text/uic-meta">{"lang": "de"}</script><uic-fetch src="http://x/§[ lang ]§/nav"/>"#,
                )
                .page("http://x/de/nav", "nav"),
        );
        let fetcher = ContentFetcher::new(loader.clone());
        fetcher.add_job(FetchDefinition::new("http://x/"));

        let results = fetcher.wait_for_results().await;
        assert!(results.iter().all(FetchResult::is_ok));
        assert!(loader.calls().contains(&"http://x/de/nav".to_string()));
        assert_eq!(fetcher.meta().get("lang"), Some(&Value::from("de")));
    }

    #[tokio::test]
    async fn test_seeded_meta_used_for_root() {
        let loader = Arc::new(MemoryLoader::default().page("http://x/en", "x"));
        let mut meta = Map::new();
        meta.insert("lang".into(), Value::from("en"));

        let fetcher = ContentFetcher::new(loader).with_meta(meta);
        fetcher.add_job(FetchDefinition::new("http://x/§[lang]§"));
        let results = fetcher.wait_for_results().await;
        assert!(results[0].is_ok());
    }

    #[tokio::test]
    async fn test_depth_limit_breaks_divergent_cycles() {
        let fetcher = ContentFetcher::with_limits(Arc::new(ChainLoader), 4, 3);
        fetcher.add_job(FetchDefinition::new("http://x/0"));

        let results = fetcher.wait_for_results().await;
        assert_eq!(results.len(), 5);
        let last = results.iter().find(|r| r.depth == 4).unwrap();
        assert!(matches!(
            last.error.as_deref(),
            Some(ComposeError::DependencyDepthExceeded { limit: 3, .. })
        ));
        assert!(results.iter().filter(|r| r.depth <= 3).all(FetchResult::is_ok));
    }

    #[tokio::test]
    async fn test_workers_bound_concurrency() {
        let loader = Arc::new(SlowLoader::default());
        let fetcher = ContentFetcher::with_workers(loader.clone(), 2);
        fetcher.add_job(FetchDefinition::new("http://x/root"));

        let results = fetcher.wait_for_results().await;
        assert_eq!(results.len(), 7);
        assert!(loader.peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_sort_by_priority_is_stable() {
        let mut results: Vec<FetchResult> = [("a", 1), ("b", 0), ("c", 1), ("d", -1)]
            .iter()
            .map(|(name, priority)| {
                let def = FetchDefinition::new(format!("http://x/{}", name)).with_priority(*priority);
                FetchResult::pending(def, name.to_string(), 0)
            })
            .collect();

        sort_by_priority(&mut results);
        let order: Vec<_> = results.iter().map(|r| r.hash.as_str()).collect();
        assert_eq!(order, vec!["d", "b", "a", "c"]);
    }

    #[test]
    fn test_expand_url() {
        let mut meta = Map::new();
        meta.insert("user".into(), serde_json::json!({"id": 7}));
        assert_eq!(
            expand_url("http://x/u/§[ user.id ]§?q=1", &meta).unwrap(),
            "http://x/u/7?q=1"
        );

        let err = expand_url("http://x/§[> frag]§", &meta).unwrap_err();
        assert!(matches!(
            err,
            ComposeError::Template(TemplateError::UnexpectedFragment { .. })
        ));
    }
}
