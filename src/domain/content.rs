use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use reqwest::header::HeaderMap;
use serde_json::{Map, Value};

use crate::domain::{FetchDefinition, Fragment};

/// The representation of one fetched resource.
///
/// A content is either parsed into fragments ([`MemoryContent`]) or carried
/// as unparsed bytes ([`RawContent`]), never both.
pub trait Content: Send + Sync + fmt::Debug {
    fn url(&self) -> &str;

    fn status(&self) -> u16;

    fn headers(&self) -> &HeaderMap;

    fn head(&self) -> Option<&Arc<dyn Fragment>> {
        None
    }

    /// Named body fragments; `None` for unparsed content.
    fn body(&self) -> Option<&HashMap<String, Arc<dyn Fragment>>> {
        None
    }

    fn tail(&self) -> Option<&Arc<dyn Fragment>> {
        None
    }

    fn body_attributes(&self) -> Option<&Arc<dyn Fragment>> {
        None
    }

    fn meta(&self) -> Option<&Map<String, Value>> {
        None
    }

    /// Dependencies discovered while parsing.
    fn required_content(&self) -> &[FetchDefinition] {
        &[]
    }

    /// Unparsed response body; `None` for parsed content.
    fn raw_body(&self) -> Option<&[u8]> {
        None
    }

    /// Approximate size in bytes, used for cache accounting.
    fn memory_size(&self) -> usize;
}

/// Parsed content held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryContent {
    pub url: String,
    pub status: u16,
    pub headers: HeaderMap,
    pub head: Option<Arc<dyn Fragment>>,
    pub body: HashMap<String, Arc<dyn Fragment>>,
    pub tail: Option<Arc<dyn Fragment>>,
    pub body_attributes: Option<Arc<dyn Fragment>>,
    pub meta: Map<String, Value>,
    pub required_content: Vec<FetchDefinition>,
}

impl MemoryContent {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status: 200,
            ..Default::default()
        }
    }
}

impl Content for MemoryContent {
    fn url(&self) -> &str {
        &self.url
    }

    fn status(&self) -> u16 {
        self.status
    }

    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn head(&self) -> Option<&Arc<dyn Fragment>> {
        self.head.as_ref()
    }

    fn body(&self) -> Option<&HashMap<String, Arc<dyn Fragment>>> {
        Some(&self.body)
    }

    fn tail(&self) -> Option<&Arc<dyn Fragment>> {
        self.tail.as_ref()
    }

    fn body_attributes(&self) -> Option<&Arc<dyn Fragment>> {
        self.body_attributes.as_ref()
    }

    fn meta(&self) -> Option<&Map<String, Value>> {
        Some(&self.meta)
    }

    fn required_content(&self) -> &[FetchDefinition] {
        &self.required_content
    }

    fn memory_size(&self) -> usize {
        let fragments: usize = self
            .head
            .iter()
            .chain(self.tail.iter())
            .chain(self.body_attributes.iter())
            .map(|f| f.memory_size())
            .chain(self.body.iter().map(|(k, f)| k.len() + f.memory_size()))
            .sum();
        let meta = Value::Object(self.meta.clone()).to_string().len();
        self.url.len() + fragments + meta
    }
}

/// Content passed through without composition.
#[derive(Debug, Default)]
pub struct RawContent {
    pub url: String,
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Content for RawContent {
    fn url(&self) -> &str {
        &self.url
    }

    fn status(&self) -> u16 {
        self.status
    }

    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn raw_body(&self) -> Option<&[u8]> {
        Some(&self.body)
    }

    fn memory_size(&self) -> usize {
        self.url.len() + self.body.len()
    }
}
