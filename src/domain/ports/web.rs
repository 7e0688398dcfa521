use async_trait::async_trait;

use crate::domain::DomainError;

/// Body and content type of a fetched page.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub content_type: String,
    pub body: Vec<u8>,
}

impl FetchedPage {
    pub fn is_html(&self) -> bool {
        self.content_type.contains("text/html")
    }
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, DomainError>;
}
