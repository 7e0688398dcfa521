use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use crate::domain::ports::{ChatMessage, ChatModel, GenConf, Usage};
use crate::domain::DomainError;

const API_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Chat through the Anthropic messages API.
pub struct AnthropicChat {
    base_url: String,
    api_key: String,
    model: String,
    client: Client,
}

impl AnthropicChat {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, base_url: Option<&str>) -> Self {
        Self {
            base_url: base_url.unwrap_or(API_URL).trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl ChatModel for AnthropicChat {
    async fn chat(
        &self,
        system: Option<&str>,
        history: &[ChatMessage],
        conf: &GenConf,
    ) -> Result<Usage<String>, DomainError> {
        let messages: Vec<Value> = history
            .iter()
            .filter(|m| m.role != "system")
            .map(|m| json!({ "role": m.role, "content": m.content }))
            .collect();

        let mut body = json!({
            "model": self.model,
            "max_tokens": conf.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": messages,
        });
        if let Some(obj) = body.as_object_mut() {
            if let Some(system) = system.filter(|s| !s.is_empty()) {
                obj.insert("system".to_string(), json!(system));
            }
            if let Some(t) = conf.temperature {
                obj.insert("temperature".to_string(), json!(t));
            }
        }

        let res = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .timeout(Duration::from_secs(600))
            .send()
            .await
            .map_err(|e| DomainError::external(e.to_string()))?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(DomainError::external(format!("Anthropic {status}: {text}")));
        }

        let payload: Value = res
            .json()
            .await
            .map_err(|e| DomainError::external(e.to_string()))?;

        let content = payload["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        let tokens = payload["usage"]["input_tokens"].as_u64().unwrap_or(0)
            + payload["usage"]["output_tokens"].as_u64().unwrap_or(0);

        Ok((content, tokens))
    }
}
