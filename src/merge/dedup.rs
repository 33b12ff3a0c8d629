use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;

use crate::domain::{Attributes, ScriptElement};

/// Decides which collected stylesheets and scripts are emitted.
pub trait DeduplicationStrategy: Send + Sync + fmt::Debug {
    fn stylesheets(&self, links: Vec<Attributes>) -> Vec<Attributes>;

    fn scripts(&self, scripts: Vec<ScriptElement>) -> Vec<ScriptElement>;
}

/// Emits everything as collected.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityDeduplication;

impl DeduplicationStrategy for IdentityDeduplication {
    fn stylesheets(&self, links: Vec<Attributes>) -> Vec<Attributes> {
        links
    }

    fn scripts(&self, scripts: Vec<ScriptElement>) -> Vec<ScriptElement> {
        scripts
    }
}

/// Keeps the first stylesheet per `href` and the first script per `src`.
///
/// Entries without the attribute (inline scripts, for instance) are always kept.
#[derive(Debug, Clone, Copy, Default)]
pub struct HrefSrcDeduplication;

impl DeduplicationStrategy for HrefSrcDeduplication {
    fn stylesheets(&self, links: Vec<Attributes>) -> Vec<Attributes> {
        let mut seen = HashSet::new();
        links
            .into_iter()
            .filter(|link| match link.get("href") {
                Some(href) => seen.insert(href.to_string()),
                None => true,
            })
            .collect()
    }

    fn scripts(&self, scripts: Vec<ScriptElement>) -> Vec<ScriptElement> {
        let mut seen = HashSet::new();
        scripts
            .into_iter()
            .filter(|script| match script.src() {
                Some(src) => seen.insert(src.to_string()),
                None => true,
            })
            .collect()
    }
}

/// Configurable choice of [`DeduplicationStrategy`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeduplicationMode {
    #[default]
    Identity,
    HrefSrc,
}

impl DeduplicationMode {
    pub fn strategy(self) -> Arc<dyn DeduplicationStrategy> {
        match self {
            DeduplicationMode::Identity => Arc::new(IdentityDeduplication),
            DeduplicationMode::HrefSrc => Arc::new(HrefSrcDeduplication),
        }
    }
}
