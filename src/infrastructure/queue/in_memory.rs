use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

use super::jobs::HEARTBEAT_RETENTION_SECONDS;
use crate::domain::ports::{ExecutorRegistry, TaskMessage, TaskQueue};
use crate::domain::DomainError;

pub struct InMemoryTaskQueue {
    tasks: Mutex<VecDeque<TaskMessage>>,
    pushed: Notify,
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
            pushed: Notify::new(),
        }
    }
}

impl Default for InMemoryTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn push(&self, task: &TaskMessage) -> Result<(), DomainError> {
        self.tasks.lock().await.push_back(task.clone());
        self.pushed.notify_one();
        Ok(())
    }

    async fn pop(&self, timeout_secs: f64) -> Result<Option<TaskMessage>, DomainError> {
        if let Some(task) = self.tasks.lock().await.pop_front() {
            return Ok(Some(task));
        }
        let wait = Duration::from_secs_f64(timeout_secs.max(0.0));
        if tokio::time::timeout(wait, self.pushed.notified()).await.is_err() {
            return Ok(None);
        }
        Ok(self.tasks.lock().await.pop_front())
    }

    async fn len(&self) -> Result<u64, DomainError> {
        Ok(self.tasks.lock().await.len() as u64)
    }
}

pub struct InMemoryExecutorRegistry {
    beats: Mutex<BTreeMap<String, Vec<(f64, serde_json::Value)>>>,
}

impl InMemoryExecutorRegistry {
    pub fn new() -> Self {
        Self {
            beats: Mutex::new(BTreeMap::new()),
        }
    }
}

impl Default for InMemoryExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutorRegistry for InMemoryExecutorRegistry {
    async fn report(
        &self,
        executor: &str,
        heartbeat: &serde_json::Value,
        at: f64,
    ) -> Result<(), DomainError> {
        let mut beats = self.beats.lock().await;
        let entries = beats.entry(executor.to_string()).or_default();
        entries.push((at, heartbeat.clone()));
        entries.retain(|(t, _)| *t > at - HEARTBEAT_RETENTION_SECONDS);
        Ok(())
    }

    async fn heartbeats_since(
        &self,
        since: f64,
    ) -> Result<BTreeMap<String, Vec<serde_json::Value>>, DomainError> {
        let beats = self.beats.lock().await;
        Ok(beats
            .iter()
            .map(|(name, entries)| {
                let recent = entries
                    .iter()
                    .filter(|(t, _)| *t >= since)
                    .map(|(_, v)| v.clone())
                    .collect();
                (name.clone(), recent)
            })
            .collect())
    }

    async fn ping(&self) -> Result<bool, DomainError> {
        Ok(true)
    }
}
