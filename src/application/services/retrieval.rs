use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;

use super::document::OWNER_ONLY;
use super::llm::LlmService;
use super::tenant::TenantService;
use crate::domain::ports::{index_name, ChunkFilter, ChunkStore, Repositories};
use crate::domain::{DomainError, Knowledgebase, SearchResult};

pub const DEFAULT_TOP_K: usize = 30;

/// Vector search over the chunks of one or more knowledge bases.
pub struct RetrievalService {
    repos: Repositories,
    chunks: Arc<dyn ChunkStore>,
    llms: Arc<LlmService>,
    tenants: Arc<TenantService>,
}

impl RetrievalService {
    pub fn new(
        repos: Repositories,
        chunks: Arc<dyn ChunkStore>,
        llms: Arc<LlmService>,
        tenants: Arc<TenantService>,
    ) -> Self {
        Self {
            repos,
            chunks,
            llms,
            tenants,
        }
    }

    async fn readable(&self, user_id: &str, kb_ids: &[String]) -> Result<Vec<Knowledgebase>, DomainError> {
        let mut kbs = Vec::with_capacity(kb_ids.len());
        for kb_id in kb_ids {
            let kb = match self.repos.knowledgebases.get(kb_id).await? {
                Some(kb) if self.tenants.is_member(user_id, &kb.tenant_id).await? => kb,
                _ => return Err(DomainError::not_permitted(OWNER_ONLY)),
            };
            kbs.push(kb);
        }
        Ok(kbs)
    }

    /// Embeds `question` and returns the closest available chunks, best first.
    /// `threshold` defaults to the first knowledge base's similarity threshold.
    #[instrument(skip(self, question))]
    pub async fn retrieval_test(
        &self,
        user_id: &str,
        kb_ids: &[String],
        question: &str,
        top_k: Option<usize>,
        threshold: Option<f64>,
    ) -> Result<Value, DomainError> {
        if kb_ids.is_empty() {
            return Err(DomainError::invalid_argument("Lack of \"KB ID\""));
        }
        let kbs = self.readable(user_id, kb_ids).await?;
        let first = &kbs[0];
        if kbs.iter().any(|kb| kb.embd_id != first.embd_id) {
            return Err(DomainError::validation(
                "Knowledge bases use different embedding models.",
            ));
        }

        let model = self
            .llms
            .embedding_model(&first.tenant_id, &first.embd_id)
            .await?;
        let (query, tokens) = model.encode_query(question).await?;
        self.llms
            .record_usage(&first.tenant_id, &first.embd_id, tokens)
            .await?;

        let top_k = top_k.unwrap_or(DEFAULT_TOP_K);
        let threshold = threshold.unwrap_or(first.similarity_threshold) as f32;

        let mut by_tenant: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for kb in &kbs {
            by_tenant.entry(&kb.tenant_id).or_default().push(kb.id.clone());
        }

        let mut hits: Vec<SearchResult> = Vec::new();
        for (tenant_id, ids) in by_tenant {
            let filter = ChunkFilter::kbs(&ids).available();
            hits.extend(
                self.chunks
                    .search(&index_name(tenant_id), Some(&query), &filter, top_k)
                    .await?,
            );
        }
        hits.retain(|h| h.score >= threshold);
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);

        let chunks: Vec<Value> = hits
            .iter()
            .map(|h| {
                json!({
                    "chunk_id": h.chunk.id,
                    "doc_id": h.chunk.doc_id,
                    "docnm_kwd": h.chunk.docnm_kwd,
                    "content_with_weight": h.chunk.content_with_weight,
                    "similarity": h.score,
                })
            })
            .collect();
        Ok(json!({ "total": chunks.len(), "chunks": chunks }))
    }
}
