use std::collections::HashSet;

use reqwest::header::{HeaderMap, AUTHORIZATION, COOKIE, EXPIRES};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::cache::control::{CacheControl, CacheControlError};

/// Headers contributing to the cache key unless configured otherwise.
pub const DEFAULT_INCLUDE_HEADERS: &[&str] = &["Authorization", "Accept-Encoding", "Host"];

/// Statuses cacheable without explicit freshness information (RFC 7231 6.1).
const CACHEABLE_BY_DEFAULT: &[u16] = &[200, 203, 204, 206, 300, 301, 404, 405, 410, 414, 501];

/// A named condition that disqualifies a response from caching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotCacheableReason {
    RequestMethodPost,
    RequestMethodPut,
    RequestMethodDelete,
    RequestMethodConnect,
    RequestMethodOptions,
    RequestMethodTrace,
    RequestMethodUnknown,
    RequestNoStore,
    RequestAuthorizationHeader,
    ResponseNoStore,
    ResponsePrivate,
    ResponseUncachableByDefault,
}

/// Computes cache keys and decides HTTP cacheability.
#[derive(Debug, Clone)]
pub struct CacheStrategy {
    include_headers: Vec<String>,
    include_cookies: Vec<String>,
    ignore_reasons: HashSet<NotCacheableReason>,
    private_cache: bool,
}

impl Default for CacheStrategy {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl CacheStrategy {
    pub fn new(
        include_headers: Vec<String>,
        include_cookies: Vec<String>,
        ignore_reasons: Vec<NotCacheableReason>,
    ) -> Self {
        Self {
            include_headers: include_headers
                .into_iter()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
            include_cookies,
            ignore_reasons: ignore_reasons.into_iter().collect(),
            private_cache: false,
        }
    }

    /// Default headers, no cookies, no ignored reasons.
    pub fn with_defaults() -> Self {
        Self::new(
            DEFAULT_INCLUDE_HEADERS.iter().map(|h| h.to_string()).collect(),
            Vec::new(),
            Vec::new(),
        )
    }

    /// Operate as a private (per-user) cache, which may store `private` responses.
    pub fn private_cache(mut self, private: bool) -> Self {
        self.private_cache = private;
        self
    }

    /// Digest over method, URL and the whitelisted header and cookie values.
    pub fn hash(&self, method: &Method, url: &str, headers: &HeaderMap) -> String {
        let mut hasher = Sha256::new();
        hasher.update(method.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(url.as_bytes());

        for name in &self.include_headers {
            let mut values = headers.get_all(name.as_str()).iter().peekable();
            if values.peek().is_none() {
                continue;
            }
            hasher.update([0u8]);
            hasher.update(name.as_bytes());
            for value in values {
                hasher.update(b"=");
                hasher.update(value.as_bytes());
            }
        }

        if !self.include_cookies.is_empty() {
            let cookies = request_cookies(headers);
            for name in &self.include_cookies {
                if let Some((_, value)) = cookies.iter().find(|(n, _)| n == name) {
                    hasher.update([1u8]);
                    hasher.update(name.as_bytes());
                    hasher.update(b"=");
                    hasher.update(value.as_bytes());
                }
            }
        }

        hex::encode(hasher.finalize())
    }

    pub fn is_cacheable(
        &self,
        method: &Method,
        url: &str,
        status: u16,
        request_headers: &HeaderMap,
        response_headers: &HeaderMap,
    ) -> bool {
        match self.reasons(method, status, request_headers, response_headers) {
            Ok(reasons) => {
                let blocking: Vec<_> = reasons
                    .into_iter()
                    .filter(|r| !self.ignore_reasons.contains(r))
                    .collect();
                if !blocking.is_empty() {
                    tracing::trace!("{} {} not cacheable: {:?}", method, url, blocking);
                }
                blocking.is_empty()
            }
            Err(e) => {
                tracing::debug!("{} {} not cacheable: {}", method, url, e);
                false
            }
        }
    }

    /// All reasons the exchange may not be cached, ignored reasons included.
    pub fn reasons(
        &self,
        method: &Method,
        status: u16,
        request_headers: &HeaderMap,
        response_headers: &HeaderMap,
    ) -> Result<Vec<NotCacheableReason>, CacheControlError> {
        let request_cc = CacheControl::from_headers(request_headers)?;
        let response_cc = CacheControl::from_headers(response_headers)?;
        let mut reasons = Vec::new();

        if let Some(reason) = method_reason(method) {
            reasons.push(reason);
        }

        if request_cc.no_store {
            reasons.push(NotCacheableReason::RequestNoStore);
        }

        if request_headers.contains_key(AUTHORIZATION)
            && !response_cc.public
            && !response_cc.must_revalidate
            && response_cc.s_maxage.is_none()
        {
            reasons.push(NotCacheableReason::RequestAuthorizationHeader);
        }

        if response_cc.no_store {
            reasons.push(NotCacheableReason::ResponseNoStore);
        }

        if response_cc.private && !self.private_cache {
            reasons.push(NotCacheableReason::ResponsePrivate);
        }

        if !CACHEABLE_BY_DEFAULT.contains(&status)
            && !response_cc.public
            && !response_cc.has_explicit_expiration()
            && !response_headers.contains_key(EXPIRES)
        {
            reasons.push(NotCacheableReason::ResponseUncachableByDefault);
        }

        Ok(reasons)
    }
}

fn method_reason(method: &Method) -> Option<NotCacheableReason> {
    match *method {
        Method::GET | Method::HEAD => None,
        Method::POST => Some(NotCacheableReason::RequestMethodPost),
        Method::PUT => Some(NotCacheableReason::RequestMethodPut),
        Method::DELETE => Some(NotCacheableReason::RequestMethodDelete),
        Method::CONNECT => Some(NotCacheableReason::RequestMethodConnect),
        Method::OPTIONS => Some(NotCacheableReason::RequestMethodOptions),
        Method::TRACE => Some(NotCacheableReason::RequestMethodTrace),
        _ => Some(NotCacheableReason::RequestMethodUnknown),
    }
}

fn request_cookies(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderValue, CACHE_CONTROL};

    fn cacheable(strategy: &CacheStrategy, method: Method, status: u16) -> bool {
        strategy.is_cacheable(
            &method,
            "http://example.com/",
            status,
            &HeaderMap::new(),
            &HeaderMap::new(),
        )
    }

    fn response(cache_control: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static(cache_control));
        headers
    }

    #[test]
    fn test_hash_is_deterministic() {
        let strategy = CacheStrategy::with_defaults();
        let headers = HeaderMap::new();
        let a = strategy.hash(&Method::GET, "http://example.com/", &headers);
        let b = strategy.hash(&Method::GET, "http://example.com/", &headers);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_hash_includes_whitelisted_header() {
        let strategy = CacheStrategy::with_defaults();
        let mut with_encoding = HeaderMap::new();
        with_encoding.insert("accept-encoding", HeaderValue::from_static("gzip"));

        assert_ne!(
            strategy.hash(&Method::GET, "http://example.com/", &HeaderMap::new()),
            strategy.hash(&Method::GET, "http://example.com/", &with_encoding)
        );
    }

    #[test]
    fn test_hash_ignores_unlisted_header() {
        let strategy = CacheStrategy::with_defaults();
        let mut other = HeaderMap::new();
        other.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));

        assert_eq!(
            strategy.hash(&Method::GET, "http://example.com/", &HeaderMap::new()),
            strategy.hash(&Method::GET, "http://example.com/", &other)
        );
    }

    #[test]
    fn test_hash_includes_whitelisted_cookie_only() {
        let strategy = CacheStrategy::new(vec![], vec!["tenant".into()], vec![]);
        let mut a = HeaderMap::new();
        a.insert("cookie", HeaderValue::from_static("tenant=a; tracking=1"));
        let mut b = HeaderMap::new();
        b.insert("cookie", HeaderValue::from_static("tracking=2; tenant=a"));
        let mut c = HeaderMap::new();
        c.insert("cookie", HeaderValue::from_static("tenant=b"));

        let url = "http://example.com/";
        assert_eq!(
            strategy.hash(&Method::GET, url, &a),
            strategy.hash(&Method::GET, url, &b)
        );
        assert_ne!(
            strategy.hash(&Method::GET, url, &a),
            strategy.hash(&Method::GET, url, &c)
        );
    }

    #[test]
    fn test_get_is_cacheable_by_default() {
        assert!(cacheable(&CacheStrategy::with_defaults(), Method::GET, 200));
    }

    #[test]
    fn test_post_not_cacheable_unless_ignored() {
        assert!(!cacheable(&CacheStrategy::with_defaults(), Method::POST, 200));

        let strategy = CacheStrategy::new(
            vec![],
            vec![],
            vec![NotCacheableReason::RequestMethodPost],
        );
        assert!(cacheable(&strategy, Method::POST, 200));
    }

    #[test]
    fn test_unknown_method() {
        let method = Method::from_bytes(b"PURGE").unwrap();
        let reasons = CacheStrategy::with_defaults()
            .reasons(&method, 200, &HeaderMap::new(), &HeaderMap::new())
            .unwrap();
        assert_eq!(reasons, vec![NotCacheableReason::RequestMethodUnknown]);
    }

    #[test]
    fn test_request_no_store() {
        let strategy = CacheStrategy::with_defaults();
        assert!(!strategy.is_cacheable(
            &Method::GET,
            "http://example.com/",
            200,
            &response("no-store"),
            &HeaderMap::new()
        ));
    }

    #[test]
    fn test_authorization_requires_public_response() {
        let strategy = CacheStrategy::with_defaults();
        let mut request = HeaderMap::new();
        request.insert(AUTHORIZATION, HeaderValue::from_static("Bearer t"));

        assert!(!strategy.is_cacheable(
            &Method::GET,
            "http://example.com/",
            200,
            &request,
            &HeaderMap::new()
        ));
        assert!(strategy.is_cacheable(
            &Method::GET,
            "http://example.com/",
            200,
            &request,
            &response("public, max-age=60")
        ));
    }

    #[test]
    fn test_response_no_store_and_private() {
        let strategy = CacheStrategy::with_defaults();
        let url = "http://example.com/";
        assert!(!strategy.is_cacheable(&Method::GET, url, 200, &HeaderMap::new(), &response("no-store")));
        assert!(!strategy.is_cacheable(&Method::GET, url, 200, &HeaderMap::new(), &response("private")));

        let private = CacheStrategy::with_defaults().private_cache(true);
        assert!(private.is_cacheable(&Method::GET, url, 200, &HeaderMap::new(), &response("private")));
    }

    #[test]
    fn test_status_uncachable_by_default() {
        let strategy = CacheStrategy::with_defaults();
        assert!(!cacheable(&strategy, Method::GET, 500));
        assert!(cacheable(&strategy, Method::GET, 404));
        assert!(strategy.is_cacheable(
            &Method::GET,
            "http://example.com/",
            302,
            &HeaderMap::new(),
            &response("max-age=30")
        ));
    }

    #[test]
    fn test_malformed_cache_control_is_not_cacheable() {
        let strategy = CacheStrategy::with_defaults();
        assert!(!strategy.is_cacheable(
            &Method::GET,
            "http://example.com/",
            200,
            &HeaderMap::new(),
            &response("max-age=forever")
        ));
    }

    #[test]
    fn test_reason_serde_names() {
        let reason: NotCacheableReason = serde_json::from_str("\"request-method-post\"").unwrap();
        assert_eq!(reason, NotCacheableReason::RequestMethodPost);
    }
}
