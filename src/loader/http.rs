use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::redirect::Policy;
use reqwest::Client;

use crate::app::{ComposeError, Result};
use crate::discovery::resolve_url;
use crate::domain::headers::{copy_headers, FORWARD_REQUEST_HEADERS};
use crate::domain::{Content, FetchDefinition, RawResponse};
use crate::loader::{is_html, parse_content, raw_content, ContentLoader, USER_AGENT};
use crate::parser::ContentParser;

/// Responses carrying this header are passed through unparsed.
pub const NO_COMPOSITION_HEADER: &str = "x-no-composition";

pub struct HttpContentLoader {
    client: Client,
    no_redirect_client: Client,
    parser: Arc<dyn ContentParser>,
}

impl HttpContentLoader {
    pub fn new(parser: Arc<dyn ContentParser>) -> Result<Self> {
        let client = Client::builder()
            .gzip(true)
            .brotli(true)
            .user_agent(USER_AGENT)
            .build()?;

        let no_redirect_client = Client::builder()
            .gzip(true)
            .brotli(true)
            .user_agent(USER_AGENT)
            .redirect(Policy::none())
            .build()?;

        Ok(Self {
            client,
            no_redirect_client,
            parser,
        })
    }

    async fn target_url(&self, def: &FetchDefinition) -> Result<String> {
        match &def.service_discovery {
            Some(discovery) if def.service_discovery_active => {
                resolve_url(&def.url, discovery.as_ref()).await
            }
            _ => Ok(def.url.clone()),
        }
    }
}

#[async_trait]
impl ContentLoader for HttpContentLoader {
    async fn load(&self, def: &FetchDefinition) -> Result<Arc<dyn Content>> {
        let url = self.target_url(def).await?;
        let client = if def.follow_redirects {
            &self.client
        } else {
            &self.no_redirect_client
        };

        let mut headers = HeaderMap::new();
        copy_headers(&def.header, &mut headers, FORWARD_REQUEST_HEADERS);

        let mut request = client
            .request(def.method.clone(), &url)
            .headers(headers)
            .timeout(def.timeout);
        if let Some(body) = &def.body {
            request = request.body(body.clone());
        }

        tracing::debug!("{} {}", def.method, url);
        let response = request.send().await?;
        let status = response.status().as_u16();
        if !(200..=399).contains(&status) {
            return Err(ComposeError::Status { url, status });
        }

        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();
        let mut raw = RawResponse {
            status,
            headers,
            body,
        };

        if let Some(processor) = &def.response_processor {
            processor.process(&mut raw, &url)?;
        }

        if is_html(&raw.headers) && !raw.headers.contains_key(NO_COMPOSITION_HEADER) {
            return parse_content(self.parser.as_ref(), &def.url, raw.status, raw.headers, &raw.body);
        }
        Ok(raw_content(&def.url, raw.status, raw.headers, raw.body))
    }
}
