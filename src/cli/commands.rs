use std::path::Path;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde_json::{Map, Value};
use url::Url;

use crate::app::{AppContext, ComposeError, Result};
use crate::domain::MemoryContent;

pub async fn compose(
    ctx: &AppContext,
    urls: &[String],
    headers: &[String],
    meta: &[String],
    output: Option<&Path>,
) -> Result<()> {
    let headers = parse_headers(headers)?;
    let meta = parse_meta(meta)?;
    let logger = ctx.start_cache_logging();

    let mut defs = Vec::with_capacity(urls.len());
    for url in urls {
        defs.push(ctx.root_definition(&to_url(url)?, &headers));
    }

    let composition = ctx.composer().compose(defs, meta).await?;
    if let Some(logger) = logger {
        logger.abort();
    }

    match output {
        Some(path) => {
            std::fs::write(path, &composition.body)?;
            println!("Wrote {} bytes to {}", composition.body.len(), path.display());
        }
        None => println!("{}", String::from_utf8_lossy(&composition.body)),
    }
    Ok(())
}

pub fn parse_document(ctx: &AppContext, path: &Path) -> Result<()> {
    let input = std::fs::read_to_string(path)?;
    let url = to_url(&path.to_string_lossy())?;

    let mut content = MemoryContent::new(url.clone());
    ctx.parser
        .parse(&mut content, &input)
        .map_err(|source| ComposeError::Parse { url, source })?;

    println!("head: {}", if content.head.is_some() { "yes" } else { "no" });
    println!("tail: {}", if content.tail.is_some() { "yes" } else { "no" });

    let mut names: Vec<&String> = content.body.keys().collect();
    names.sort();
    println!("fragments:");
    for name in names {
        let fragment = &content.body[name];
        println!(
            "  {:?} ({} bytes, {} stylesheets, {} scripts)",
            name,
            fragment.content().len(),
            fragment.stylesheets().len(),
            fragment.scripts().len()
        );
    }

    println!("dependencies:");
    for dep in &content.required_content {
        let required = if dep.required { "required" } else { "optional" };
        println!("  {} -> {} ({}, {:?})", dep.name, dep.url, required, dep.timeout);
    }

    if !content.meta.is_empty() {
        let meta = serde_json::to_string_pretty(&content.meta)
            .map_err(|e| ComposeError::Other(e.to_string()))?;
        println!("meta: {}", meta);
    }
    Ok(())
}

pub fn cache_key(ctx: &AppContext, url: &str, headers: &[String], method: &str) -> Result<()> {
    let headers = parse_headers(headers)?;
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|_| ComposeError::Other(format!("Invalid method: {}", method)))?;

    println!("{}", ctx.strategy.hash(&method, url, &headers));
    match ctx.strategy.reasons(&method, 200, &headers, &HeaderMap::new()) {
        Ok(reasons) if reasons.is_empty() => println!("cacheable"),
        Ok(reasons) => println!("not cacheable: {:?}", reasons),
        Err(e) => println!("not cacheable: {}", e),
    }
    Ok(())
}

/// Accept URLs as given; turn anything else into a `file://` URL.
pub fn to_url(input: &str) -> Result<String> {
    if let Ok(url) = Url::parse(input) {
        if url.scheme().len() > 1 {
            return Ok(url.to_string());
        }
    }

    let path = std::fs::canonicalize(input)?;
    Url::from_file_path(&path)
        .map(|u| u.to_string())
        .map_err(|_| ComposeError::NotFound(input.to_string()))
}

/// Parse `Name: value` arguments.
pub fn parse_headers(args: &[String]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for arg in args {
        let (name, value) = arg
            .split_once(':')
            .ok_or_else(|| ComposeError::Other(format!("Invalid header {:?}, expected \"Name: value\"", arg)))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|e| ComposeError::Other(format!("Invalid header name in {:?}: {}", arg, e)))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|e| ComposeError::Other(format!("Invalid header value in {:?}: {}", arg, e)))?;
        headers.append(name, value);
    }
    Ok(headers)
}

/// Parse `key=value` arguments into string metadata.
pub fn parse_meta(args: &[String]) -> Result<Map<String, Value>> {
    let mut meta = Map::new();
    for arg in args {
        let (key, value) = arg
            .split_once('=')
            .ok_or_else(|| ComposeError::Other(format!("Invalid meta {:?}, expected key=value", arg)))?;
        meta.insert(key.trim().to_string(), Value::from(value));
    }
    Ok(meta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_headers() {
        let headers = parse_headers(&["Cookie: a=1".into(), "X-Real-Ip:10.0.0.1".into()]).unwrap();
        assert_eq!(headers.get("cookie").unwrap(), "a=1");
        assert_eq!(headers.get("x-real-ip").unwrap(), "10.0.0.1");

        assert!(parse_headers(&["no separator".into()]).is_err());
        assert!(parse_headers(&["bad name: x".into()]).is_err());
    }

    #[test]
    fn test_parse_meta() {
        let meta = parse_meta(&["lang=de".into(), "q=a=b".into()]).unwrap();
        assert_eq!(meta.get("lang"), Some(&Value::from("de")));
        assert_eq!(meta.get("q"), Some(&Value::from("a=b")));
        assert!(parse_meta(&["novalue".into()]).is_err());
    }

    #[test]
    fn test_to_url() {
        assert_eq!(to_url("http://example.com/a").unwrap(), "http://example.com/a");

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("page.html");
        std::fs::write(&path, "x").unwrap();
        let url = to_url(&path.to_string_lossy()).unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("/page.html"));

        assert!(to_url(&dir.path().join("missing.html").to_string_lossy()).is_err());
    }
}
