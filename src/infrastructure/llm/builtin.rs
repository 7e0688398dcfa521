//! Clients for the server's own model account, authenticated from the
//! process environment (`OPENAI_API_KEY`).

use async_trait::async_trait;
use rig::client::{CompletionClient, EmbeddingsClient, ProviderClient};
use rig::completion::Prompt;
use rig::embeddings::EmbeddingsBuilder;
use rig::providers::openai;

use crate::domain::naming::num_tokens;
use crate::domain::ports::{ChatMessage, ChatModel, EmbeddingModel, GenConf, Usage};
use crate::domain::{DomainError, Embedding};

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

fn client() -> Result<openai::Client, DomainError> {
    match std::env::var(API_KEY_ENV) {
        Ok(key) if !key.is_empty() => Ok(openai::Client::from_env()),
        _ => Err(DomainError::external(format!(
            "{API_KEY_ENV} is not set for the built-in model factory"
        ))),
    }
}

pub struct RigEmbedding {
    model: String,
}

impl RigEmbedding {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

#[async_trait]
impl EmbeddingModel for RigEmbedding {
    async fn encode(&self, texts: &[String]) -> Result<Usage<Vec<Embedding>>, DomainError> {
        if texts.is_empty() {
            return Ok((Vec::new(), 0));
        }

        let model = client()?.embedding_model(&self.model);
        let mut builder = EmbeddingsBuilder::new(model);
        for text in texts {
            builder = builder
                .document(text.clone())
                .map_err(|e| DomainError::external(e.to_string()))?;
        }

        let embeddings = builder
            .build()
            .await
            .map_err(|e| DomainError::external(e.to_string()))?;

        let tokens = texts.iter().map(|t| num_tokens(t) as u64).sum();
        Ok((
            embeddings
                .into_iter()
                .map(|(_doc, emb)| Embedding::from(emb.first().vec))
                .collect(),
            tokens,
        ))
    }
}

pub struct RigChat {
    model: String,
}

impl RigChat {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

#[async_trait]
impl ChatModel for RigChat {
    async fn chat(
        &self,
        system: Option<&str>,
        history: &[ChatMessage],
        conf: &GenConf,
    ) -> Result<Usage<String>, DomainError> {
        let client = client()?;
        let mut builder = client.agent(&self.model);
        if let Some(system) = system.filter(|s| !s.is_empty()) {
            builder = builder.preamble(system);
        }
        if let Some(t) = conf.temperature {
            builder = builder.temperature(f64::from(t));
        }
        if let Some(t) = conf.max_tokens {
            builder = builder.max_tokens(u64::from(t));
        }
        let agent = builder.build();

        let prompt = history
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");

        let answer = agent
            .prompt(prompt.as_str())
            .await
            .map_err(|e| DomainError::external(e.to_string()))?;

        let tokens = (num_tokens(&prompt) + num_tokens(&answer)) as u64;
        Ok((answer, tokens))
    }
}
