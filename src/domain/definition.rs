use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::Method;
use url::Url;

use crate::app::Result;
use crate::cache::CacheStrategy;
use crate::discovery::ServiceDiscovery;
use crate::domain::headers::{copy_headers, FORWARD_REQUEST_HEADERS};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// A fetched response before it is turned into content.
#[derive(Debug, Clone, Default)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// Hook that may rewrite a response before it is parsed.
pub trait ResponseProcessor: Send + Sync {
    fn process(&self, response: &mut RawResponse, base_url: &str) -> Result<()>;
}

impl<F> ResponseProcessor for F
where
    F: Fn(&mut RawResponse, &str) -> Result<()> + Send + Sync,
{
    fn process(&self, response: &mut RawResponse, base_url: &str) -> Result<()> {
        self(response, base_url)
    }
}

/// Descriptor of one fetchable resource.
#[derive(Clone)]
pub struct FetchDefinition {
    pub name: String,
    pub url: String,
    pub method: Method,
    pub timeout: Duration,
    pub follow_redirects: bool,
    pub header: HeaderMap,
    pub body: Option<Vec<u8>>,
    pub required: bool,
    /// Higher priority wins when fragment names collide.
    pub priority: i32,
    pub params: BTreeMap<String, String>,
    pub discovered_by: Option<String>,
    pub response_processor: Option<Arc<dyn ResponseProcessor>>,
    pub cache_strategy: Option<Arc<CacheStrategy>>,
    pub service_discovery: Option<Arc<dyn ServiceDiscovery>>,
    pub service_discovery_active: bool,
}

impl FetchDefinition {
    /// A GET definition named after its URL.
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            name: url.clone(),
            url,
            method: Method::GET,
            timeout: DEFAULT_TIMEOUT,
            follow_redirects: true,
            header: HeaderMap::new(),
            body: None,
            required: true,
            priority: 0,
            params: BTreeMap::new(),
            discovered_by: None,
            response_processor: None,
            cache_strategy: None,
            service_discovery: None,
            service_discovery_active: false,
        }
    }

    /// Build a definition from an inbound request, keeping only forwardable headers.
    pub fn from_request(
        url: impl Into<String>,
        method: Method,
        headers: &HeaderMap,
        body: Option<Vec<u8>>,
    ) -> Self {
        let mut def = Self::new(url);
        def.method = method;
        def.body = body;
        copy_headers(headers, &mut def.header, FORWARD_REQUEST_HEADERS);
        def
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn with_cache_strategy(mut self, strategy: Arc<CacheStrategy>) -> Self {
        self.cache_strategy = Some(strategy);
        self
    }

    /// Set include parameters and append them to the URL as query parameters.
    pub fn with_params(mut self, params: BTreeMap<String, String>) -> Self {
        if params.is_empty() {
            return self;
        }
        self.url = append_query(&self.url, &params);
        self.params = params;
        self
    }

    /// Dependency hash used to fetch each resource at most once.
    pub fn hash(&self) -> String {
        match &self.cache_strategy {
            Some(strategy) => strategy.hash(&self.method, &self.url, &self.header),
            None => CacheStrategy::with_defaults().hash(&self.method, &self.url, &self.header),
        }
    }

    pub fn is_cacheable(&self, status: u16, response_headers: &HeaderMap) -> bool {
        match &self.cache_strategy {
            Some(strategy) => strategy.is_cacheable(
                &self.method,
                &self.url,
                status,
                &self.header,
                response_headers,
            ),
            None => false,
        }
    }

    /// Whether there is anything to fetch.
    pub fn is_fetchable(&self) -> bool {
        !self.url.trim().is_empty()
    }

    /// A discovered dependency that inherits request context from `self`.
    pub fn child(&self, dependency: &FetchDefinition) -> FetchDefinition {
        let mut child = dependency.clone();
        if child.header.is_empty() {
            child.header = self.header.clone();
        }
        if child.cache_strategy.is_none() {
            child.cache_strategy = self.cache_strategy.clone();
        }
        if child.service_discovery.is_none() {
            child.service_discovery = self.service_discovery.clone();
            child.service_discovery_active = self.service_discovery_active;
        }
        child
    }
}

impl fmt::Debug for FetchDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchDefinition")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("method", &self.method)
            .field("timeout", &self.timeout)
            .field("required", &self.required)
            .field("priority", &self.priority)
            .field("params", &self.params)
            .field("discovered_by", &self.discovered_by)
            .finish_non_exhaustive()
    }
}

fn append_query(url: &str, params: &BTreeMap<String, String>) -> String {
    if let Ok(mut parsed) = Url::parse(url) {
        parsed.query_pairs_mut().extend_pairs(params.iter());
        return parsed.to_string();
    }

    // Relative URL: append by hand, keeping any fragment at the end.
    let (base, fragment) = match url.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (url, None),
    };
    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.iter())
        .finish();
    let separator = if base.contains('?') { '&' } else { '?' };
    match fragment {
        Some(fragment) => format!("{}{}{}#{}", base, separator, query, fragment),
        None => format!("{}{}{}", base, separator, query),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::NotCacheableReason;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_hash_equal_for_identical_definitions() {
        let a = FetchDefinition::new("http://example.com/a");
        let b = FetchDefinition::new("http://example.com/a").with_name("other");
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn test_hash_ignores_unlisted_headers() {
        let mut a = FetchDefinition::new("http://example.com/a");
        let mut b = FetchDefinition::new("http://example.com/a");
        a.header
            .insert("x-request-id", HeaderValue::from_static("1"));
        b.header
            .insert("x-request-id", HeaderValue::from_static("2"));
        assert_eq!(a.hash(), b.hash());

        b.header
            .insert("authorization", HeaderValue::from_static("Bearer t"));
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_hash_differs_by_method() {
        let a = FetchDefinition::new("http://example.com/a");
        let mut b = FetchDefinition::new("http://example.com/a");
        b.method = Method::POST;
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_from_request_copies_only_whitelisted_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("cookie", HeaderValue::from_static("session=1"));
        headers.insert("x-secret", HeaderValue::from_static("leak"));
        headers.insert("accept", HeaderValue::from_static("*/*"));

        let def = FetchDefinition::from_request(
            "http://example.com/",
            Method::POST,
            &headers,
            Some(b"payload".to_vec()),
        );

        assert_eq!(def.method, Method::POST);
        assert_eq!(def.body.as_deref(), Some(&b"payload"[..]));
        assert_eq!(def.header.len(), 1);
        assert!(def.header.get("cookie").is_some());
    }

    #[test]
    fn test_is_cacheable_without_strategy_is_false() {
        let def = FetchDefinition::new("http://example.com/");
        assert!(!def.is_cacheable(200, &HeaderMap::new()));
    }

    #[test]
    fn test_is_cacheable_delegates_to_strategy() {
        let mut def = FetchDefinition::new("http://example.com/")
            .with_cache_strategy(Arc::new(CacheStrategy::with_defaults()));
        assert!(def.is_cacheable(200, &HeaderMap::new()));

        def.method = Method::POST;
        assert!(!def.is_cacheable(200, &HeaderMap::new()));

        let strategy = CacheStrategy::new(
            vec!["Authorization".into()],
            vec![],
            vec![NotCacheableReason::RequestMethodPost],
        );
        def.cache_strategy = Some(Arc::new(strategy));
        assert!(def.is_cacheable(200, &HeaderMap::new()));
    }

    #[test]
    fn test_with_params_appends_query() {
        let mut params = BTreeMap::new();
        params.insert("lang".to_string(), "de".to_string());
        params.insert("q".to_string(), "a b".to_string());

        let def = FetchDefinition::new("http://example.com/nav?x=1").with_params(params.clone());
        assert_eq!(def.url, "http://example.com/nav?x=1&lang=de&q=a+b");
        assert_eq!(def.name, "http://example.com/nav?x=1");

        let relative = FetchDefinition::new("nav#menu").with_params(params);
        assert_eq!(relative.url, "nav?lang=de&q=a+b#menu");
    }

    #[test]
    fn test_child_inherits_context() {
        let strategy = Arc::new(CacheStrategy::with_defaults());
        let mut parent = FetchDefinition::new("http://example.com/").with_cache_strategy(strategy);
        parent
            .header
            .insert("authorization", HeaderValue::from_static("Bearer t"));

        let dependency = FetchDefinition::new("http://example.com/nav");
        let child = parent.child(&dependency);

        assert_eq!(child.url, "http://example.com/nav");
        assert!(child.header.get("authorization").is_some());
        assert!(child.cache_strategy.is_some());
        // The dependency itself is left untouched.
        assert!(dependency.header.is_empty());
    }
}
