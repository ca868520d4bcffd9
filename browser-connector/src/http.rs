//! Plain HTTP fetcher used for link discovery and asset downloads

use crate::traits::{FetchedResource, ResourceFetcher};
use site_archiver_core::*;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = "site-archiver/0.1";

/// `ResourceFetcher` backed by a shared `reqwest` client
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| ArchiverError::configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, timeout })
    }

    fn request_error(&self, url: &str, error: reqwest::Error) -> ArchiverError {
        if error.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }
            .into()
        } else {
            FetchError::RequestFailed {
                url: url.to_string(),
                reason: error.to_string(),
            }
            .into()
        }
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.request_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            }
            .into());
        }

        Ok(response)
    }
}

#[async_trait]
impl ResourceFetcher for HttpFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        tracing::debug!("Raw fetch: {}", url);
        let response = self.get(url).await?;
        response.text().await.map_err(|e| self.request_error(url, e))
    }

    async fn fetch_bytes(&self, url: &str) -> Result<FetchedResource> {
        tracing::debug!("Downloading resource: {}", url);
        let response = self.get(url).await?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.request_error(url, e))?;

        Ok(FetchedResource {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}
