//! `Cache-Control` header parsing.

use reqwest::header::{HeaderMap, CACHE_CONTROL};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheControlError {
    #[error("Cache-Control header is not valid ASCII")]
    NotAscii,

    #[error("unterminated quoted string in Cache-Control")]
    UnterminatedQuote,

    #[error("directive {directive} requires a value")]
    MissingValue { directive: String },

    #[error("invalid value {value:?} for directive {directive}")]
    InvalidValue { directive: String, value: String },
}

/// Parsed `Cache-Control` directives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    pub no_store: bool,
    pub no_cache: bool,
    pub private: bool,
    pub public: bool,
    pub must_revalidate: bool,
    pub proxy_revalidate: bool,
    pub max_age: Option<u64>,
    pub s_maxage: Option<u64>,
    pub extensions: Vec<(String, Option<String>)>,
}

impl CacheControl {
    /// Parse every `Cache-Control` header of `headers` as one directive list.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, CacheControlError> {
        let mut joined = Vec::new();
        for value in headers.get_all(CACHE_CONTROL) {
            joined.push(value.to_str().map_err(|_| CacheControlError::NotAscii)?);
        }
        Self::parse(&joined.join(","))
    }

    pub fn parse(value: &str) -> Result<Self, CacheControlError> {
        let mut cc = CacheControl::default();

        for directive in split_directives(value)? {
            let directive = directive.trim();
            if directive.is_empty() {
                continue;
            }

            let (name, argument) = match directive.split_once('=') {
                Some((name, argument)) => (name.trim(), Some(unquote(argument.trim()))),
                None => (directive, None),
            };
            let name = name.to_ascii_lowercase();

            match name.as_str() {
                "no-store" => cc.no_store = true,
                "no-cache" => cc.no_cache = true,
                "private" => cc.private = true,
                "public" => cc.public = true,
                "must-revalidate" => cc.must_revalidate = true,
                "proxy-revalidate" => cc.proxy_revalidate = true,
                "max-age" => cc.max_age = Some(seconds(&name, argument)?),
                "s-maxage" => cc.s_maxage = Some(seconds(&name, argument)?),
                _ => cc
                    .extensions
                    .push((name, argument.map(|a| a.to_string()))),
            }
        }

        Ok(cc)
    }

    /// Whether the response carries an explicit freshness lifetime.
    pub fn has_explicit_expiration(&self) -> bool {
        self.max_age.is_some() || self.s_maxage.is_some()
    }
}

/// Split on commas that are not inside a quoted string.
fn split_directives(value: &str) -> Result<Vec<&str>, CacheControlError> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;

    for (i, c) in value.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }

    if in_quotes {
        return Err(CacheControlError::UnterminatedQuote);
    }
    parts.push(&value[start..]);
    Ok(parts)
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

fn seconds(directive: &str, argument: Option<&str>) -> Result<u64, CacheControlError> {
    let value = argument.ok_or_else(|| CacheControlError::MissingValue {
        directive: directive.to_string(),
    })?;
    value.parse::<u64>().map_err(|_| CacheControlError::InvalidValue {
        directive: directive.to_string(),
        value: value.to_string(),
    })
}
