use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::{DomainError, FileType};

/// Everything a task executor needs to parse one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub id: String,
    pub doc_id: String,
    pub kb_id: String,
    pub tenant_id: String,
    pub bucket: String,
    pub name: String,
    pub doc_name: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
    pub from_page: i64,
    pub to_page: i64,
    pub parser_id: String,
    pub parser_config: serde_json::Value,
    pub embd_id: String,
    pub language: String,
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn push(&self, task: &TaskMessage) -> Result<(), DomainError>;
    /// Waits up to `timeout_secs` for the next task.
    async fn pop(&self, timeout_secs: f64) -> Result<Option<TaskMessage>, DomainError>;
    async fn len(&self) -> Result<u64, DomainError>;
}

/// Liveness reports published by task executors.
#[async_trait]
pub trait ExecutorRegistry: Send + Sync {
    async fn report(
        &self,
        executor: &str,
        heartbeat: &serde_json::Value,
        at: f64,
    ) -> Result<(), DomainError>;
    /// Heartbeats per executor with timestamps in `[since, now]`.
    async fn heartbeats_since(
        &self,
        since: f64,
    ) -> Result<BTreeMap<String, Vec<serde_json::Value>>, DomainError>;
    async fn ping(&self) -> Result<bool, DomainError>;
}
