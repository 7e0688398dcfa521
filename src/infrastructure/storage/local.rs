use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

use crate::domain::ports::BlobStore;
use crate::domain::DomainError;

/// Blobs kept on disk as `<root>/<bucket>/<name>`.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, bucket: &str, name: &str) -> Result<PathBuf, DomainError> {
        for part in [bucket, name] {
            let mut components = Path::new(part).components();
            let plain = matches!(components.next(), Some(Component::Normal(_)))
                && components.next().is_none();
            if !plain {
                return Err(DomainError::validation(format!("Invalid storage key: {part}")));
            }
        }
        Ok(self.root.join(bucket).join(name))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, bucket: &str, name: &str, data: &[u8]) -> Result<(), DomainError> {
        let path = self.path(bucket, name)?;
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| DomainError::internal(e.to_string()))?;
        }
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| DomainError::internal(e.to_string()))?;
        tracing::debug!(bucket, name, size = data.len(), "blob stored");
        Ok(())
    }

    async fn get(&self, bucket: &str, name: &str) -> Result<Vec<u8>, DomainError> {
        let path = self.path(bucket, name)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(DomainError::not_found(
                format!("Blob {bucket}/{name} not found"),
            )),
            Err(e) => Err(DomainError::internal(e.to_string())),
        }
    }

    async fn remove(&self, bucket: &str, name: &str) -> Result<(), DomainError> {
        let path = self.path(bucket, name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DomainError::internal(e.to_string())),
        }
    }

    async fn exists(&self, bucket: &str, name: &str) -> Result<bool, DomainError> {
        let path = self.path(bucket, name)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| DomainError::internal(e.to_string()))
    }

    async fn health(&self) -> Result<(), DomainError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| DomainError::internal(e.to_string()))?;
        let probe = self.root.join(".health");
        tokio::fs::write(&probe, b"_t@@@1")
            .await
            .map_err(|e| DomainError::internal(e.to_string()))?;
        tokio::fs::remove_file(&probe)
            .await
            .map_err(|e| DomainError::internal(e.to_string()))
    }

    fn kind(&self) -> &'static str {
        "local"
    }
}
