use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::domain::ports::{ChunkFilter, ChunkStore, ChunkUpdate};
use crate::domain::{DocumentChunk, DomainError, Embedding, SearchResult};

type Index = Vec<(DocumentChunk, Embedding)>;

pub struct InMemoryChunkStore {
    indices: RwLock<HashMap<String, Index>>,
}

impl InMemoryChunkStore {
    pub fn new() -> Self {
        Self {
            indices: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryChunkStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChunkStore for InMemoryChunkStore {
    async fn index_exists(&self, index: &str) -> Result<bool, DomainError> {
        let indices = self
            .indices
            .read()
            .map_err(|e| DomainError::internal(e.to_string()))?;
        Ok(indices.contains_key(index))
    }

    async fn delete_index(&self, index: &str, kb_id: &str) -> Result<(), DomainError> {
        let mut indices = self
            .indices
            .write()
            .map_err(|e| DomainError::internal(e.to_string()))?;
        if kb_id.is_empty() {
            indices.remove(index);
        } else if let Some(chunks) = indices.get_mut(index) {
            chunks.retain(|(c, _)| c.kb_id != kb_id);
        }
        Ok(())
    }

    async fn upsert(
        &self,
        index: &str,
        chunks: &[(DocumentChunk, Embedding)],
    ) -> Result<(), DomainError> {
        let mut indices = self
            .indices
            .write()
            .map_err(|e| DomainError::internal(e.to_string()))?;
        let store = indices.entry(index.to_string()).or_default();
        for (chunk, embedding) in chunks {
            store.retain(|(c, _)| c.id != chunk.id);
            store.push((chunk.clone(), embedding.clone()));
        }
        Ok(())
    }

    async fn search(
        &self,
        index: &str,
        query: Option<&Embedding>,
        filter: &ChunkFilter,
        limit: usize,
    ) -> Result<Vec<SearchResult>, DomainError> {
        let indices = self
            .indices
            .read()
            .map_err(|e| DomainError::internal(e.to_string()))?;
        let Some(store) = indices.get(index) else {
            return Ok(Vec::new());
        };

        let mut results: Vec<SearchResult> = store
            .iter()
            .filter(|(chunk, _)| filter.matches(chunk))
            .map(|(chunk, embedding)| SearchResult {
                chunk: chunk.clone(),
                score: query.map_or(0.0, |q| q.cosine_similarity(embedding)),
            })
            .collect();

        if query.is_some() {
            results.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        } else {
            results.sort_by(|a, b| {
                (&a.chunk.doc_id, a.chunk.chunk_index).cmp(&(&b.chunk.doc_id, b.chunk.chunk_index))
            });
        }

        results.truncate(limit);
        Ok(results)
    }

    async fn update(
        &self,
        index: &str,
        filter: &ChunkFilter,
        update: &ChunkUpdate,
    ) -> Result<u64, DomainError> {
        let mut indices = self
            .indices
            .write()
            .map_err(|e| DomainError::internal(e.to_string()))?;
        let Some(store) = indices.get_mut(index) else {
            return Ok(0);
        };
        let mut touched = 0;
        for (chunk, _) in store.iter_mut().filter(|(c, _)| filter.matches(c)) {
            update.apply(chunk);
            touched += 1;
        }
        Ok(touched)
    }

    async fn delete(&self, index: &str, filter: &ChunkFilter) -> Result<u64, DomainError> {
        let mut indices = self
            .indices
            .write()
            .map_err(|e| DomainError::internal(e.to_string()))?;
        let Some(store) = indices.get_mut(index) else {
            return Ok(0);
        };
        let before = store.len();
        store.retain(|(c, _)| !filter.matches(c));
        Ok((before - store.len()) as u64)
    }

    async fn health(&self) -> Result<serde_json::Value, DomainError> {
        let indices = self
            .indices
            .read()
            .map_err(|e| DomainError::internal(e.to_string()))?;
        Ok(serde_json::json!({
            "type": "memory",
            "indices": indices.len(),
        }))
    }
}
