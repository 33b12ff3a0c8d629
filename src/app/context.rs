use std::sync::Arc;

use reqwest::header::HeaderMap;
use reqwest::Method;
use tokio::task::JoinHandle;

use crate::app::compose::Composer;
use crate::app::error::Result;
use crate::cache::{Cache, CacheStrategy};
use crate::config::Config;
use crate::domain::FetchDefinition;
use crate::loader::{CachingContentLoader, ContentLoader, FileContentLoader, HttpContentLoader};
use crate::parser::ContentParser;

pub struct AppContext {
    pub config: Config,
    pub parser: Arc<dyn ContentParser>,
    pub cache: Option<Arc<Cache>>,
    pub strategy: Arc<CacheStrategy>,
    pub loader: Arc<dyn ContentLoader>,
}

impl AppContext {
    pub fn new(config: Config) -> Result<Self> {
        let parser: Arc<dyn ContentParser> = Arc::new(config.parser.parser());

        let cache = if config.cache.enabled {
            Some(Arc::new(Cache::new(
                "content",
                config.cache.max_entries,
                config.cache.max_size_bytes,
                config.cache.ttl(),
            )?))
        } else {
            None
        };

        let http: Arc<dyn ContentLoader> = Arc::new(HttpContentLoader::new(parser.clone())?);
        let file: Arc<dyn ContentLoader> = Arc::new(FileContentLoader::new(parser.clone()));
        let loader: Arc<dyn ContentLoader> = Arc::new(CachingContentLoader::new(http, file, cache.clone()));
        let strategy = Arc::new(config.cache.strategy());

        Ok(Self {
            config,
            parser,
            cache,
            strategy,
            loader,
        })
    }

    pub fn with_workers(mut config: Config, workers: usize) -> Result<Self> {
        config.fetcher.workers = workers;
        Self::new(config)
    }

    /// A composer wired to the shared loader and the configured limits.
    pub fn composer(&self) -> Composer {
        Composer::new(self.loader.clone())
            .with_limits(self.config.fetcher.workers, self.config.fetcher.max_depth)
            .with_merge_config(self.config.merge.clone())
    }

    /// Definition of a page requested with the given inbound headers.
    pub fn root_definition(&self, url: &str, headers: &HeaderMap) -> FetchDefinition {
        let mut def = FetchDefinition::from_request(url, Method::GET, headers, None);
        def.timeout = self.config.fetcher.timeout();
        def.follow_redirects = self.config.fetcher.follow_redirects;
        if self.cache.is_some() {
            def.cache_strategy = Some(self.strategy.clone());
        }
        def
    }

    /// Start periodic cache statistics logging if configured.
    pub fn start_cache_logging(&self) -> Option<JoinHandle<()>> {
        let interval = self.config.cache.log_interval()?;
        self.cache.as_ref().map(|cache| cache.log_every(interval))
    }
}
