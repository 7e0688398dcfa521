use std::sync::Arc;

use super::{AnthropicChat, OpenAiCompat, RigChat, RigEmbedding};
use crate::domain::ports::{ChatModel, EmbeddingModel, ModelProvider, ModelSpec, RerankModel};
use crate::domain::{DomainError, LlmType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Protocol {
    OpenAi,
    Anthropic,
}

/// What a factory's API looks like and which model kinds it serves.
struct Profile {
    name: &'static str,
    base_url: Option<&'static str>,
    protocol: Protocol,
    chat: bool,
    embedding: bool,
    rerank: bool,
}

const fn profile(
    name: &'static str,
    base_url: Option<&'static str>,
    chat: bool,
    embedding: bool,
    rerank: bool,
) -> Profile {
    Profile {
        name,
        base_url,
        protocol: Protocol::OpenAi,
        chat,
        embedding,
        rerank,
    }
}

const PROFILES: &[Profile] = &[
    profile("OpenAI", Some("https://api.openai.com/v1"), true, true, false),
    profile("Azure-OpenAI", None, true, true, false),
    profile("DeepSeek", Some("https://api.deepseek.com/v1"), true, false, false),
    profile("Moonshot", Some("https://api.moonshot.cn/v1"), true, false, false),
    profile("ZHIPU-AI", Some("https://open.bigmodel.cn/api/paas/v4"), true, true, false),
    profile(
        "Tongyi-Qianwen",
        Some("https://dashscope.aliyuncs.com/compatible-mode/v1"),
        true,
        true,
        false,
    ),
    profile("Mistral", Some("https://api.mistral.ai/v1"), true, true, false),
    profile("Groq", Some("https://api.groq.com/openai/v1"), true, false, false),
    profile("xAI", Some("https://api.x.ai/v1"), true, false, false),
    profile("OpenRouter", Some("https://openrouter.ai/api/v1"), true, false, false),
    profile("SILICONFLOW", Some("https://api.siliconflow.cn/v1"), true, true, true),
    profile("Jina", Some("https://api.jina.ai/v1"), false, true, true),
    profile("Voyage AI", Some("https://api.voyageai.com/v1"), false, true, true),
    profile("NVIDIA", Some("https://integrate.api.nvidia.com/v1"), true, true, false),
    profile("Ollama", Some("http://localhost:11434/v1"), true, true, false),
    profile("LM-Studio", Some("http://localhost:1234/v1"), true, true, false),
    profile("LocalAI", None, true, true, true),
    profile("Xinference", None, true, true, true),
    profile("VLLM", None, true, true, true),
    profile("GPUStack", None, true, true, true),
    profile("OpenAI-API-Compatible", None, true, true, true),
    Profile {
        name: "Anthropic",
        base_url: None,
        protocol: Protocol::Anthropic,
        chat: true,
        embedding: false,
        rerank: false,
    },
];

/// Resolves a [`ModelSpec`] to a concrete client.
///
/// Requests for the server's default factory that carry no key of their own
/// are served by the rig-backed clients with process credentials.
pub struct ModelRegistry {
    builtin_factory: String,
    builtin_api_key: String,
    builtin_base_url: Option<String>,
}

impl ModelRegistry {
    pub fn new(
        builtin_factory: impl Into<String>,
        builtin_api_key: impl Into<String>,
        builtin_base_url: Option<String>,
    ) -> Self {
        Self {
            builtin_factory: builtin_factory.into(),
            builtin_api_key: builtin_api_key.into(),
            builtin_base_url: builtin_base_url.filter(|u| !u.is_empty()),
        }
    }

    fn profile(factory: &str) -> Option<&'static Profile> {
        PROFILES.iter().find(|p| p.name == factory)
    }

    fn is_builtin(&self, spec: &ModelSpec) -> bool {
        spec.factory == self.builtin_factory && spec.api_key.is_empty()
    }

    /// Model names registered for local runtimes carry a `___<Runtime>` suffix.
    fn model_name(spec: &ModelSpec) -> &str {
        spec.model_name
            .split_once("___")
            .map_or(spec.model_name.as_str(), |(name, _)| name)
    }

    fn openai_compat(&self, spec: &ModelSpec, kind: LlmType) -> Result<OpenAiCompat, DomainError> {
        if !self.supports(&spec.factory, kind) {
            return Err(DomainError::validation(format!(
                "{} does not offer {} models",
                spec.factory, kind
            )));
        }

        let (api_key, base_url) = if self.is_builtin(spec) {
            (self.builtin_api_key.as_str(), self.builtin_base_url.clone())
        } else {
            (spec.api_key.as_str(), spec.base_url.clone())
        };

        let base_url = base_url
            .or_else(|| Self::profile(&spec.factory).and_then(|p| p.base_url.map(String::from)))
            .ok_or_else(|| {
                DomainError::validation(format!("{} requires a base_url", spec.factory))
            })?;

        Ok(OpenAiCompat::new(&base_url, api_key, Self::model_name(spec)))
    }

    fn use_rig(&self, spec: &ModelSpec) -> bool {
        self.is_builtin(spec) && self.builtin_api_key.is_empty() && spec.factory == "OpenAI"
    }
}

impl ModelProvider for ModelRegistry {
    fn chat(&self, spec: &ModelSpec) -> Result<Arc<dyn ChatModel>, DomainError> {
        if self.use_rig(spec) {
            return Ok(Arc::new(RigChat::new(Self::model_name(spec))));
        }
        if Self::profile(&spec.factory).is_some_and(|p| p.protocol == Protocol::Anthropic) {
            return Ok(Arc::new(AnthropicChat::new(
                spec.api_key.clone(),
                Self::model_name(spec),
                spec.base_url.as_deref(),
            )));
        }
        Ok(Arc::new(self.openai_compat(spec, LlmType::Chat)?))
    }

    fn embedding(&self, spec: &ModelSpec) -> Result<Arc<dyn EmbeddingModel>, DomainError> {
        if self.use_rig(spec) {
            return Ok(Arc::new(RigEmbedding::new(Self::model_name(spec))));
        }
        Ok(Arc::new(self.openai_compat(spec, LlmType::Embedding)?))
    }

    fn rerank(&self, spec: &ModelSpec) -> Result<Arc<dyn RerankModel>, DomainError> {
        Ok(Arc::new(self.openai_compat(spec, LlmType::Rerank)?))
    }

    fn supports(&self, factory: &str, model_type: LlmType) -> bool {
        match Self::profile(factory) {
            Some(p) => match model_type {
                LlmType::Chat => p.chat,
                LlmType::Embedding => p.embedding,
                LlmType::Rerank => p.rerank,
                _ => false,
            },
            None => false,
        }
    }
}
