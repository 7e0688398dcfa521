use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::domain::ports::BlobStore;
use crate::domain::DomainError;

pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<(String, String), Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, bucket: &str, name: &str, data: &[u8]) -> Result<(), DomainError> {
        self.blobs
            .write()
            .map_err(|e| DomainError::internal(e.to_string()))?
            .insert((bucket.to_string(), name.to_string()), data.to_vec());
        Ok(())
    }

    async fn get(&self, bucket: &str, name: &str) -> Result<Vec<u8>, DomainError> {
        self.blobs
            .read()
            .map_err(|e| DomainError::internal(e.to_string()))?
            .get(&(bucket.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("Blob {bucket}/{name} not found")))
    }

    async fn remove(&self, bucket: &str, name: &str) -> Result<(), DomainError> {
        self.blobs
            .write()
            .map_err(|e| DomainError::internal(e.to_string()))?
            .remove(&(bucket.to_string(), name.to_string()));
        Ok(())
    }

    async fn exists(&self, bucket: &str, name: &str) -> Result<bool, DomainError> {
        Ok(self
            .blobs
            .read()
            .map_err(|e| DomainError::internal(e.to_string()))?
            .contains_key(&(bucket.to_string(), name.to_string())))
    }

    async fn health(&self) -> Result<(), DomainError> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
