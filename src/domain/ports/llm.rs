use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::domain::{DomainError, Embedding, LlmType};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GenConf {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Answer text plus the tokens it cost.
pub type Usage<T> = (T, u64);

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(
        &self,
        system: Option<&str>,
        history: &[ChatMessage],
        conf: &GenConf,
    ) -> Result<Usage<String>, DomainError>;
}

#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    async fn encode(&self, texts: &[String]) -> Result<Usage<Vec<Embedding>>, DomainError>;

    async fn encode_query(&self, text: &str) -> Result<Usage<Embedding>, DomainError> {
        let (mut vectors, tokens) = self.encode(&[text.to_string()]).await?;
        if vectors.is_empty() {
            return Err(DomainError::external("Embedding model returned no vector"));
        }
        Ok((vectors.swap_remove(0), tokens))
    }
}

#[async_trait]
pub trait RerankModel: Send + Sync {
    /// One relevance score per text, in input order.
    async fn similarity(&self, query: &str, texts: &[String]) -> Result<Usage<Vec<f32>>, DomainError>;
}

/// Credentials and endpoint used to build a model client.
#[derive(Debug, Clone, Default)]
pub struct ModelSpec {
    pub factory: String,
    pub model_name: String,
    pub api_key: String,
    pub base_url: Option<String>,
}

impl ModelSpec {
    pub fn new(
        factory: impl Into<String>,
        model_name: impl Into<String>,
        api_key: impl Into<String>,
        base_url: Option<String>,
    ) -> Self {
        Self {
            factory: factory.into(),
            model_name: model_name.into(),
            api_key: api_key.into(),
            base_url: base_url.filter(|u| !u.is_empty()),
        }
    }
}

/// Builds model clients per factory. Errors when the factory does not
/// offer the requested model kind.
pub trait ModelProvider: Send + Sync {
    fn chat(&self, spec: &ModelSpec) -> Result<Arc<dyn ChatModel>, DomainError>;
    fn embedding(&self, spec: &ModelSpec) -> Result<Arc<dyn EmbeddingModel>, DomainError>;
    fn rerank(&self, spec: &ModelSpec) -> Result<Arc<dyn RerankModel>, DomainError>;

    fn supports(&self, factory: &str, model_type: LlmType) -> bool;
}
