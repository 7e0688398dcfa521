use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::domain::ports::{ChatMessage, ChatModel, EmbeddingModel, GenConf, RerankModel, Usage};
use crate::domain::{DomainError, Embedding};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

/// Endpoint plus credentials for a server speaking the OpenAI REST dialect.
#[derive(Clone)]
pub struct OpenAiCompat {
    base_url: String,
    api_key: String,
    model: String,
    client: Client,
}

impl OpenAiCompat {
    pub fn new(base_url: &str, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            client: Client::new(),
        }
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, DomainError> {
        let url = format!("{}/{}", self.base_url, path);
        let mut request = self.client.post(&url).json(body).timeout(REQUEST_TIMEOUT);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let res = request.send().await.map_err(|e| {
            if e.is_timeout() {
                DomainError::timeout(format!("{url}: {e}"))
            } else {
                DomainError::external(e.to_string())
            }
        })?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(DomainError::external(format!("{status} from {url}: {text}")));
        }

        res.json().await.map_err(|e| DomainError::external(e.to_string()))
    }
}

#[derive(Deserialize)]
struct TokenUsage {
    #[serde(default)]
    total_tokens: u64,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankRow>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct RerankRow {
    index: usize,
    relevance_score: f32,
}

#[async_trait]
impl ChatModel for OpenAiCompat {
    async fn chat(
        &self,
        system: Option<&str>,
        history: &[ChatMessage],
        conf: &GenConf,
    ) -> Result<Usage<String>, DomainError> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if let Some(system) = system.filter(|s| !s.is_empty()) {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.extend(
            history
                .iter()
                .map(|m| json!({ "role": m.role, "content": m.content })),
        );

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
        });
        if let Some(obj) = body.as_object_mut() {
            if let Some(t) = conf.temperature {
                obj.insert("temperature".to_string(), json!(t));
            }
            if let Some(t) = conf.max_tokens {
                obj.insert("max_tokens".to_string(), json!(t));
            }
        }

        let payload = self.post("chat/completions", &body).await?;
        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let tokens = payload["usage"]["total_tokens"].as_u64().unwrap_or(0);

        Ok((content, tokens))
    }
}

#[async_trait]
impl EmbeddingModel for OpenAiCompat {
    async fn encode(&self, texts: &[String]) -> Result<Usage<Vec<Embedding>>, DomainError> {
        if texts.is_empty() {
            return Ok((Vec::new(), 0));
        }

        let body = json!({ "model": self.model, "input": texts });
        let payload = self.post("embeddings", &body).await?;
        let mut response: EmbeddingResponse = serde_json::from_value(payload)
            .map_err(|e| DomainError::external(format!("bad embedding response: {e}")))?;

        if response.data.len() != texts.len() {
            return Err(DomainError::external(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                response.data.len()
            )));
        }
        response.data.sort_by_key(|row| row.index);

        let tokens = response.usage.map_or(0, |u| u.total_tokens);
        Ok((
            response
                .data
                .into_iter()
                .map(|row| Embedding::new(row.embedding))
                .collect(),
            tokens,
        ))
    }
}

#[async_trait]
impl RerankModel for OpenAiCompat {
    async fn similarity(
        &self,
        query: &str,
        texts: &[String],
    ) -> Result<Usage<Vec<f32>>, DomainError> {
        if texts.is_empty() {
            return Ok((Vec::new(), 0));
        }

        let body = json!({
            "model": self.model,
            "query": query,
            "documents": texts,
            "top_n": texts.len(),
        });
        let payload = self.post("rerank", &body).await?;
        let response: RerankResponse = serde_json::from_value(payload)
            .map_err(|e| DomainError::external(format!("bad rerank response: {e}")))?;

        let mut scores = vec![0.0; texts.len()];
        for row in response.results {
            if let Some(slot) = scores.get_mut(row.index) {
                *slot = row.relevance_score;
            }
        }
        let tokens = response.usage.map_or(0, |u| u.total_tokens);
        Ok((scores, tokens))
    }
}
