use async_trait::async_trait;

use crate::domain::{DocumentChunk, DomainError, Embedding, SearchResult};

/// Name of the per-tenant chunk index.
pub fn index_name(tenant_id: &str) -> String {
    format!("ragflow_{tenant_id}")
}

/// Conjunction of conditions selecting chunks inside one index.
#[derive(Debug, Clone, Default)]
pub struct ChunkFilter {
    pub kb_ids: Vec<String>,
    pub doc_id: Option<String>,
    pub tag: Option<String>,
    pub knowledge_graph_kwd: Option<String>,
    pub available_only: bool,
    pub has_pagerank: bool,
}

impl ChunkFilter {
    pub fn kb(kb_id: impl Into<String>) -> Self {
        Self {
            kb_ids: vec![kb_id.into()],
            ..Default::default()
        }
    }

    pub fn kbs(kb_ids: &[String]) -> Self {
        Self {
            kb_ids: kb_ids.to_vec(),
            ..Default::default()
        }
    }

    pub fn doc(kb_id: impl Into<String>, doc_id: impl Into<String>) -> Self {
        Self {
            kb_ids: vec![kb_id.into()],
            doc_id: Some(doc_id.into()),
            ..Default::default()
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_graph(mut self, kwd: impl Into<String>) -> Self {
        self.knowledge_graph_kwd = Some(kwd.into());
        self
    }

    pub fn available(mut self) -> Self {
        self.available_only = true;
        self
    }

    pub fn with_pagerank(mut self) -> Self {
        self.has_pagerank = true;
        self
    }

    pub fn matches(&self, chunk: &DocumentChunk) -> bool {
        (self.kb_ids.is_empty() || self.kb_ids.contains(&chunk.kb_id))
            && self.doc_id.as_ref().is_none_or(|d| *d == chunk.doc_id)
            && self.tag.as_ref().is_none_or(|t| chunk.tag_kwd.contains(t))
            && self
                .knowledge_graph_kwd
                .as_ref()
                .is_none_or(|k| chunk.knowledge_graph_kwd.as_ref() == Some(k))
            && (!self.available_only || chunk.available_int == 1)
            && (!self.has_pagerank || chunk.pagerank_fea.is_some())
    }
}

/// Field updates applied to every chunk a filter selects.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkUpdate {
    SetAvailable(bool),
    SetPagerank(i64),
    RemovePagerank,
    RemoveTag(String),
    RenameTag { from: String, to: String },
}

impl ChunkUpdate {
    pub fn apply(&self, chunk: &mut DocumentChunk) {
        match self {
            Self::SetAvailable(on) => chunk.available_int = i64::from(*on),
            Self::SetPagerank(v) => chunk.pagerank_fea = Some(*v),
            Self::RemovePagerank => chunk.pagerank_fea = None,
            Self::RemoveTag(tag) => chunk.tag_kwd.retain(|t| t != tag),
            Self::RenameTag { from, to } => {
                chunk.tag_kwd.retain(|t| t != from.trim());
                if !chunk.tag_kwd.contains(to) {
                    chunk.tag_kwd.push(to.clone());
                }
            }
        }
    }
}

/// Index of embedded chunks, one index per tenant.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    async fn index_exists(&self, index: &str) -> Result<bool, DomainError>;
    /// Drops a knowledge base's chunks, or the whole index when `kb_id` is empty.
    async fn delete_index(&self, index: &str, kb_id: &str) -> Result<(), DomainError>;
    async fn upsert(
        &self,
        index: &str,
        chunks: &[(DocumentChunk, Embedding)],
    ) -> Result<(), DomainError>;
    /// Vector search when `query` is given, plain filtered scan otherwise.
    async fn search(
        &self,
        index: &str,
        query: Option<&Embedding>,
        filter: &ChunkFilter,
        limit: usize,
    ) -> Result<Vec<SearchResult>, DomainError>;
    async fn update(
        &self,
        index: &str,
        filter: &ChunkFilter,
        update: &ChunkUpdate,
    ) -> Result<u64, DomainError>;
    async fn delete(&self, index: &str, filter: &ChunkFilter) -> Result<u64, DomainError>;
    async fn health(&self) -> Result<serde_json::Value, DomainError>;
}
