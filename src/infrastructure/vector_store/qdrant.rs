use async_trait::async_trait;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, DeletePayloadPointsBuilder,
    DeletePointsBuilder, Distance, Filter, PointId, PointStruct, PointsIdsList,
    ScrollPointsBuilder, SearchPointsBuilder, SetPayloadPointsBuilder, UpsertPointsBuilder,
    VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use std::collections::HashMap;

use crate::domain::ports::{ChunkFilter, ChunkStore, ChunkUpdate};
use crate::domain::{DocumentChunk, DomainError, Embedding, SearchResult};

const SCROLL_PAGE: u32 = 256;

/// Chunk store backed by Qdrant, one collection per tenant index.
pub struct QdrantChunkStore {
    client: Qdrant,
}

impl QdrantChunkStore {
    pub fn new(url: &str) -> Result<Self, DomainError> {
        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| DomainError::external(e.to_string()))?;

        Ok(Self { client })
    }

    async fn ensure_collection(&self, index: &str, dimension: usize) -> Result<(), DomainError> {
        if self.index_exists(index).await? {
            return Ok(());
        }

        self.client
            .create_collection(
                CreateCollectionBuilder::new(index)
                    .vectors_config(VectorParamsBuilder::new(dimension as u64, Distance::Cosine)),
            )
            .await
            .map_err(|e| DomainError::external(e.to_string()))?;

        tracing::info!(index, dimension, "chunk index created");
        Ok(())
    }

    fn to_filter(filter: &ChunkFilter) -> Filter {
        let mut must = Vec::new();
        let mut must_not = Vec::new();

        match filter.kb_ids.as_slice() {
            [] => {}
            [kb_id] => must.push(Condition::matches("kb_id", kb_id.clone())),
            kb_ids => must.push(Condition::matches("kb_id", kb_ids.to_vec())),
        }
        if let Some(doc_id) = &filter.doc_id {
            must.push(Condition::matches("doc_id", doc_id.clone()));
        }
        if let Some(tag) = &filter.tag {
            must.push(Condition::matches("tag_kwd", tag.clone()));
        }
        if let Some(kwd) = &filter.knowledge_graph_kwd {
            must.push(Condition::matches("knowledge_graph_kwd", kwd.clone()));
        }
        if filter.available_only {
            must.push(Condition::matches("available_int", 1i64));
        }
        if filter.has_pagerank {
            must_not.push(Condition::is_empty("pagerank_fea"));
        }

        Filter {
            must,
            must_not,
            ..Default::default()
        }
    }

    fn to_chunk(payload: HashMap<String, qdrant_client::qdrant::Value>) -> Option<DocumentChunk> {
        let map: serde_json::Map<String, serde_json::Value> = payload
            .into_iter()
            .map(|(k, v)| (k, v.into_json()))
            .collect();
        serde_json::from_value(serde_json::Value::Object(map)).ok()
    }

    fn to_payload(chunk: &DocumentChunk) -> Result<Payload, DomainError> {
        serde_json::to_value(chunk)?
            .try_into()
            .map_err(|_| DomainError::internal("Failed to create payload"))
    }

    async fn scroll(
        &self,
        index: &str,
        filter: &ChunkFilter,
        limit: usize,
    ) -> Result<Vec<(PointId, DocumentChunk)>, DomainError> {
        let mut out = Vec::new();
        let mut offset: Option<PointId> = None;

        loop {
            let page = SCROLL_PAGE.min(limit.saturating_sub(out.len()) as u32);
            if page == 0 {
                break;
            }
            let mut builder = ScrollPointsBuilder::new(index)
                .filter(Self::to_filter(filter))
                .limit(page)
                .with_payload(true)
                .with_vectors(false);
            if let Some(offset) = offset.take() {
                builder = builder.offset(offset);
            }

            let response = self
                .client
                .scroll(builder)
                .await
                .map_err(|e| DomainError::external(e.to_string()))?;

            out.extend(response.result.into_iter().filter_map(|point| {
                let id = point.id?;
                Some((id, Self::to_chunk(point.payload)?))
            }));

            match response.next_page_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        Ok(out)
    }

    async fn count(&self, index: &str, filter: &ChunkFilter) -> Result<u64, DomainError> {
        let response = self
            .client
            .count(
                CountPointsBuilder::new(index)
                    .filter(Self::to_filter(filter))
                    .exact(true),
            )
            .await
            .map_err(|e| DomainError::external(e.to_string()))?;
        Ok(response.result.map_or(0, |r| r.count))
    }
}

#[async_trait]
impl ChunkStore for QdrantChunkStore {
    async fn index_exists(&self, index: &str) -> Result<bool, DomainError> {
        self.client
            .collection_exists(index)
            .await
            .map_err(|e| DomainError::external(e.to_string()))
    }

    async fn delete_index(&self, index: &str, kb_id: &str) -> Result<(), DomainError> {
        if !self.index_exists(index).await? {
            return Ok(());
        }

        if kb_id.is_empty() {
            self.client
                .delete_collection(index)
                .await
                .map_err(|e| DomainError::external(e.to_string()))?;
            tracing::info!(index, "chunk index dropped");
            return Ok(());
        }

        self.client
            .delete_points(
                DeletePointsBuilder::new(index)
                    .points(Self::to_filter(&ChunkFilter::kb(kb_id)))
                    .wait(true),
            )
            .await
            .map_err(|e| DomainError::external(e.to_string()))?;
        Ok(())
    }

    async fn upsert(
        &self,
        index: &str,
        chunks: &[(DocumentChunk, Embedding)],
    ) -> Result<(), DomainError> {
        let Some((_, first)) = chunks.first() else {
            return Ok(());
        };
        self.ensure_collection(index, first.dimension()).await?;

        let points = chunks
            .iter()
            .map(|(chunk, embedding)| {
                Ok(PointStruct::new(
                    chunk.id.clone(),
                    embedding.as_slice().to_vec(),
                    Self::to_payload(chunk)?,
                ))
            })
            .collect::<Result<Vec<_>, DomainError>>()?;

        self.client
            .upsert_points(UpsertPointsBuilder::new(index, points).wait(true))
            .await
            .map_err(|e| DomainError::external(e.to_string()))?;

        Ok(())
    }

    async fn search(
        &self,
        index: &str,
        query: Option<&Embedding>,
        filter: &ChunkFilter,
        limit: usize,
    ) -> Result<Vec<SearchResult>, DomainError> {
        if !self.index_exists(index).await? {
            return Ok(Vec::new());
        }

        let Some(query) = query else {
            return Ok(self
                .scroll(index, filter, limit)
                .await?
                .into_iter()
                .map(|(_, chunk)| SearchResult { chunk, score: 0.0 })
                .collect());
        };

        let results = self
            .client
            .search_points(
                SearchPointsBuilder::new(index, query.as_slice().to_vec(), limit as u64)
                    .filter(Self::to_filter(filter))
                    .with_payload(true),
            )
            .await
            .map_err(|e| DomainError::external(e.to_string()))?;

        Ok(results
            .result
            .into_iter()
            .filter_map(|point| {
                Some(SearchResult {
                    chunk: Self::to_chunk(point.payload)?,
                    score: point.score,
                })
            })
            .collect())
    }

    async fn update(
        &self,
        index: &str,
        filter: &ChunkFilter,
        update: &ChunkUpdate,
    ) -> Result<u64, DomainError> {
        if !self.index_exists(index).await? {
            return Ok(0);
        }

        let field_update = match update {
            ChunkUpdate::SetAvailable(on) => {
                Some(serde_json::json!({ "available_int": i64::from(*on) }))
            }
            ChunkUpdate::SetPagerank(v) => Some(serde_json::json!({ "pagerank_fea": v })),
            _ => None,
        };

        if let Some(fields) = field_update {
            let touched = self.count(index, filter).await?;
            let payload: Payload = fields
                .try_into()
                .map_err(|_| DomainError::internal("Failed to create payload"))?;
            self.client
                .set_payload(
                    SetPayloadPointsBuilder::new(index, payload)
                        .points_selector(Self::to_filter(filter))
                        .wait(true),
                )
                .await
                .map_err(|e| DomainError::external(e.to_string()))?;
            return Ok(touched);
        }

        if *update == ChunkUpdate::RemovePagerank {
            let touched = self.count(index, filter).await?;
            self.client
                .delete_payload(
                    DeletePayloadPointsBuilder::new(index, vec!["pagerank_fea".to_string()])
                        .points_selector(Self::to_filter(filter))
                        .wait(true),
                )
                .await
                .map_err(|e| DomainError::external(e.to_string()))?;
            return Ok(touched);
        }

        // Tag edits rewrite the list point by point.
        let mut touched = 0;
        for (id, mut chunk) in self.scroll(index, filter, usize::MAX).await? {
            update.apply(&mut chunk);
            let payload: Payload = serde_json::json!({ "tag_kwd": chunk.tag_kwd })
                .try_into()
                .map_err(|_| DomainError::internal("Failed to create payload"))?;
            self.client
                .set_payload(
                    SetPayloadPointsBuilder::new(index, payload)
                        .points_selector(PointsIdsList { ids: vec![id] })
                        .wait(true),
                )
                .await
                .map_err(|e| DomainError::external(e.to_string()))?;
            touched += 1;
        }
        Ok(touched)
    }

    async fn delete(&self, index: &str, filter: &ChunkFilter) -> Result<u64, DomainError> {
        if !self.index_exists(index).await? {
            return Ok(0);
        }

        let removed = self.count(index, filter).await?;
        self.client
            .delete_points(
                DeletePointsBuilder::new(index)
                    .points(Self::to_filter(filter))
                    .wait(true),
            )
            .await
            .map_err(|e| DomainError::external(e.to_string()))?;

        Ok(removed)
    }

    async fn health(&self) -> Result<serde_json::Value, DomainError> {
        let reply = self
            .client
            .health_check()
            .await
            .map_err(|e| DomainError::external(e.to_string()))?;
        Ok(serde_json::json!({
            "type": "qdrant",
            "title": reply.title,
            "version": reply.version,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_translation() {
        let filter = ChunkFilter::kbs(&["kb1".to_string(), "kb2".to_string()])
            .available()
            .with_pagerank();
        let translated = QdrantChunkStore::to_filter(&filter);
        assert_eq!(translated.must.len(), 2);
        assert_eq!(translated.must_not.len(), 1);
    }

    #[test]
    fn test_empty_filter_has_no_conditions() {
        let translated = QdrantChunkStore::to_filter(&ChunkFilter::default());
        assert!(translated.must.is_empty());
        assert!(translated.must_not.is_empty());
    }
}
