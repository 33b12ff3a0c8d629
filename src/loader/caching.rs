use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::app::{ComposeError, Result};
use crate::cache::Cache;
use crate::domain::{Content, FetchDefinition};
use crate::loader::ContentLoader;

/// Dispatches definitions by URL scheme, serving cacheable HTTP content from a [`Cache`].
pub struct CachingContentLoader {
    http: Arc<dyn ContentLoader>,
    file: Arc<dyn ContentLoader>,
    cache: Option<Arc<Cache>>,
}

impl CachingContentLoader {
    pub fn new(http: Arc<dyn ContentLoader>, file: Arc<dyn ContentLoader>, cache: Option<Arc<Cache>>) -> Self {
        Self { http, file, cache }
    }

    pub fn cache(&self) -> Option<&Arc<Cache>> {
        self.cache.as_ref()
    }

    async fn load_http(&self, def: &FetchDefinition) -> Result<Arc<dyn Content>> {
        let cache = match &self.cache {
            Some(cache) if def.cache_strategy.is_some() => cache,
            _ => return self.http.load(def).await,
        };

        let key = def.hash();
        if let Some(content) = cache.get(&key) {
            tracing::debug!("Cache hit for {}", def.url);
            return Ok(content);
        }

        let content = self.http.load(def).await?;
        if content.body().is_some() && def.is_cacheable(content.status(), content.headers()) {
            cache.set(key, def.url.clone(), content.memory_size(), content.clone());
        }
        Ok(content)
    }
}

#[async_trait]
impl ContentLoader for CachingContentLoader {
    async fn load(&self, def: &FetchDefinition) -> Result<Arc<dyn Content>> {
        let url = Url::parse(&def.url)?;
        match url.scheme() {
            "http" | "https" => self.load_http(def).await,
            "file" => self.file.load(def).await,
            other => Err(ComposeError::UnsupportedScheme(other.to_string())),
        }
    }
}
