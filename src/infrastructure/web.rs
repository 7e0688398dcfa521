use async_trait::async_trait;
use std::time::Duration;

use crate::domain::ports::{FetchedPage, PageFetcher};
use crate::domain::DomainError;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("ragflow/", env!("CARGO_PKG_VERSION"));

/// Plain HTTP GET; pages are taken as served, scripts are not run.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, DomainError> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| DomainError::internal(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, DomainError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                DomainError::timeout(format!("{url}: {e}"))
            } else {
                DomainError::external(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(DomainError::external(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response
            .bytes()
            .await
            .map_err(|e| DomainError::external(e.to_string()))?
            .to_vec();

        tracing::debug!(url, content_type = %content_type, size = body.len(), "page fetched");
        Ok(FetchedPage { content_type, body })
    }
}
