use reqwest::header::HeaderMap;

/// Inbound request headers that may be forwarded to fragment origins.
pub const FORWARD_REQUEST_HEADERS: &[&str] = &[
    "Authorization",
    "Cache-Control",
    "Cookie",
    "Content-Length",
    "Content-Type",
    "If-Match",
    "If-Modified-Since",
    "If-None-Match",
    "If-Range",
    "If-Unmodified-Since",
    "Pragma",
    "Referer",
    "X-Forwarded-Host",
    "X-Correlation-Id",
    "X-Feature-Toggle",
    "X-Cluster-Client-Ip",
    "X-Real-Ip",
];

/// Origin response headers that may flow back to the client.
pub const FORWARD_RESPONSE_HEADERS: &[&str] = &[
    "Age",
    "Allow",
    "Access-Control-Allow-Origin",
    "Access-Control-Allow-Credentials",
    "Content-Disposition",
    "Content-Language",
    "Content-Security-Policy",
    "Content-Type",
    "Date",
    "ETag",
    "Expires",
    "Last-Modified",
    "Link",
    "Location",
    "P3P",
    "Pragma",
    "Refresh",
    "Retry-After",
    "Server",
    "Set-Cookie",
    "Strict-Transport-Security",
    "Vary",
    "Via",
    "WWW-Authenticate",
    "X-Frame-Options",
    "X-Content-Type-Options",
];

/// Copy every value of the whitelisted headers from `src` into `dst`.
pub fn copy_headers(src: &HeaderMap, dst: &mut HeaderMap, whitelist: &[&str]) {
    for name in whitelist {
        for value in src.get_all(*name) {
            if let Ok(header_name) = reqwest::header::HeaderName::from_bytes(name.as_bytes()) {
                dst.append(header_name, value.clone());
            }
        }
    }
}

/// Headers of `src` that are eligible to be returned to the client.
pub fn forwardable_response_headers(src: &HeaderMap) -> HeaderMap {
    let mut dst = HeaderMap::new();
    copy_headers(src, &mut dst, FORWARD_RESPONSE_HEADERS);
    dst
}
