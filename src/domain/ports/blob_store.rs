use async_trait::async_trait;

use crate::domain::DomainError;

/// Object storage addressed by bucket and name.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, bucket: &str, name: &str, data: &[u8]) -> Result<(), DomainError>;
    async fn get(&self, bucket: &str, name: &str) -> Result<Vec<u8>, DomainError>;
    async fn remove(&self, bucket: &str, name: &str) -> Result<(), DomainError>;
    async fn exists(&self, bucket: &str, name: &str) -> Result<bool, DomainError>;
    async fn health(&self) -> Result<(), DomainError>;
    /// Short backend label reported by the status endpoint.
    fn kind(&self) -> &'static str;
}
