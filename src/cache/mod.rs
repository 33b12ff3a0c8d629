//! Bounded content cache and HTTP cache-key strategy.
//!
//! - [`Cache`]: LRU store bounded by entry count and aggregate byte size,
//!   with a uniform time-to-live checked lazily on read
//! - [`CacheStrategy`]: cache keys and RFC 7234 cacheability decisions

pub mod control;
pub mod strategy;

pub use control::{CacheControl, CacheControlError};
pub use strategy::{CacheStrategy, NotCacheableReason, DEFAULT_INCLUDE_HEADERS};

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use lru::LruCache;
use tracing::info;

use crate::app::{ComposeError, Result};
use crate::domain::Content;

/// One cached content.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Origin URL, for diagnostics.
    pub label: String,
    pub size: usize,
    pub fetched_at: Instant,
    pub hits: u64,
    pub value: Arc<dyn Content>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub count: usize,
    pub size_bytes: usize,
}

struct CacheState {
    entries: LruCache<String, CacheEntry>,
    size_bytes: usize,
    hits: u64,
    misses: u64,
}

pub struct Cache {
    name: String,
    max_size_bytes: usize,
    ttl: Duration,
    state: Mutex<CacheState>,
}

impl Cache {
    /// Create a cache; a zero entry budget is a configuration error.
    pub fn new(
        name: impl Into<String>,
        max_entries: usize,
        max_size_bytes: usize,
        ttl: Duration,
    ) -> Result<Self> {
        let capacity = NonZeroUsize::new(max_entries).ok_or_else(|| {
            ComposeError::Config("cache max_entries must be greater than zero".into())
        })?;

        Ok(Self {
            name: name.into(),
            max_size_bytes,
            ttl,
            state: Mutex::new(CacheState {
                entries: LruCache::new(capacity),
                size_bytes: 0,
                hits: 0,
                misses: 0,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a live entry, refreshing its recency.
    pub fn get(&self, key: &str) -> Option<Arc<dyn Content>> {
        let mut guard = self.lock();
        let state = &mut *guard;

        let expired = match state.entries.get_mut(key) {
            None => {
                state.misses += 1;
                return None;
            }
            Some(entry) if entry.fetched_at.elapsed() >= self.ttl => true,
            Some(entry) => {
                entry.hits += 1;
                let value = entry.value.clone();
                state.hits += 1;
                return Some(value);
            }
        };

        if expired {
            if let Some(entry) = state.entries.pop(key) {
                state.size_bytes -= entry.size;
            }
            state.misses += 1;
        }
        None
    }

    /// Insert or replace an entry, evicting least recently used entries over budget.
    pub fn set(&self, key: impl Into<String>, label: impl Into<String>, size: usize, value: Arc<dyn Content>) {
        let key = key.into();
        let entry = CacheEntry {
            label: label.into(),
            size,
            fetched_at: Instant::now(),
            hits: 0,
            value,
        };

        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(old) = state.entries.pop(&key) {
            state.size_bytes -= old.size;
        }

        state.size_bytes += size;
        if let Some((_, evicted)) = state.entries.push(key, entry) {
            state.size_bytes -= evicted.size;
        }

        while state.size_bytes > self.max_size_bytes {
            match state.entries.pop_lru() {
                Some((key, evicted)) => {
                    tracing::debug!("Cache {} evicted {} ({})", self.name, key, evicted.label);
                    state.size_bytes -= evicted.size;
                }
                None => break,
            }
        }
    }

    /// Drop every entry.
    pub fn invalidate(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.size_bytes = 0;
        info!("Cache {} invalidated", self.name);
    }

    /// Drop the given keys, ignoring unknown ones.
    pub fn purge_entries<'a>(&self, keys: impl IntoIterator<Item = &'a str>) {
        let mut state = self.lock();
        for key in keys {
            if let Some(entry) = state.entries.pop(key) {
                state.size_bytes -= entry.size;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn size_bytes(&self) -> usize {
        self.lock().size_bytes
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            count: state.entries.len(),
            size_bytes: state.size_bytes,
        }
    }

    /// Log cache statistics on a background task every `interval`.
    pub fn log_every(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let stats = cache.stats();
                info!(
                    "Cache {}: {} entries, {} bytes, {} hits, {} misses",
                    cache.name, stats.count, stats.size_bytes, stats.hits, stats.misses
                );
            }
        })
    }
}
