//! Service discovery capability.
//!
//! Fragment origins may be addressed by a logical service name that is
//! resolved to a concrete `host:port` right before the request is sent.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use url::Url;

use crate::app::{ComposeError, Result};

/// Resolves a service name to an address (`host` or `host:port`).
#[async_trait]
pub trait ServiceDiscovery: Send + Sync + fmt::Debug {
    async fn resolve(&self, service: &str) -> Result<String>;
}

/// Discovery backed by a fixed name to address table.
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    addresses: HashMap<String, String>,
}

impl StaticDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service(mut self, service: impl Into<String>, address: impl Into<String>) -> Self {
        self.addresses.insert(service.into(), address.into());
        self
    }
}

#[async_trait]
impl ServiceDiscovery for StaticDiscovery {
    async fn resolve(&self, service: &str) -> Result<String> {
        self.addresses
            .get(service)
            .cloned()
            .ok_or_else(|| ComposeError::Discovery {
                service: service.to_string(),
                reason: "unknown service".into(),
            })
    }
}

/// Replace the host (and port) of `url` with the address resolved for it.
pub async fn resolve_url(url: &str, discovery: &dyn ServiceDiscovery) -> Result<String> {
    let mut parsed = Url::parse(url)?;
    let service = parsed
        .host_str()
        .ok_or_else(|| ComposeError::Discovery {
            service: url.to_string(),
            reason: "URL has no host".into(),
        })?
        .to_string();

    let address = discovery.resolve(&service).await?;
    let (host, port) = match address.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse::<u16>().map_err(|_| ComposeError::Discovery {
                service: service.clone(),
                reason: format!("invalid port in address {}", address),
            })?;
            (host.to_string(), Some(port))
        }
        None => (address.clone(), None),
    };

    parsed.set_host(Some(&host))?;
    if port.is_some() {
        parsed.set_port(port).map_err(|_| ComposeError::Discovery {
            service: service.clone(),
            reason: "cannot set port on URL".into(),
        })?;
    }

    tracing::debug!("Resolved service {} to {}", service, address);
    Ok(parsed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_discovery_resolves_known_service() {
        let discovery = StaticDiscovery::new().with_service("navigation", "10.0.0.7:8080");
        let address = tokio_test::block_on(discovery.resolve("navigation")).unwrap();
        assert_eq!(address, "10.0.0.7:8080");
    }

    #[test]
    fn test_static_discovery_unknown_service() {
        let discovery = StaticDiscovery::new();
        let err = tokio_test::block_on(discovery.resolve("missing")).unwrap_err();
        assert!(matches!(err, ComposeError::Discovery { .. }));
    }

    #[tokio::test]
    async fn test_resolve_url_rewrites_host_and_port() {
        let discovery = StaticDiscovery::new().with_service("navigation", "10.0.0.7:8080");
        let url = resolve_url("http://navigation/menu?lang=de", &discovery)
            .await
            .unwrap();
        assert_eq!(url, "http://10.0.0.7:8080/menu?lang=de");
    }

    #[tokio::test]
    async fn test_resolve_url_host_only() {
        let discovery = StaticDiscovery::new().with_service("footer", "footer.internal");
        let url = resolve_url("https://footer/", &discovery).await.unwrap();
        assert_eq!(url, "https://footer.internal/");
    }
}
