use async_trait::async_trait;
use deadpool_redis::redis::AsyncCommands;
use std::collections::BTreeMap;

use super::jobs::{keys, HEARTBEAT_RETENTION_SECONDS};
use crate::domain::ports::{ExecutorRegistry, TaskMessage, TaskQueue};
use crate::domain::DomainError;
use crate::infrastructure::redis_pool::{conn, ping, RedisError, RedisPool};

/// Task list consumed with BRPOP, so the oldest push is served first.
#[derive(Clone)]
pub struct RedisTaskQueue {
    pool: RedisPool,
    queue: String,
}

impl RedisTaskQueue {
    pub fn new(pool: RedisPool, queue: impl Into<String>) -> Self {
        Self {
            pool,
            queue: queue.into(),
        }
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn push(&self, task: &TaskMessage) -> Result<(), DomainError> {
        let payload = serde_json::to_string(task)?;
        let mut c = conn(&self.pool).await?;
        c.lpush::<_, _, ()>(&self.queue, payload)
            .await
            .map_err(RedisError::from)?;

        tracing::info!(task_id = %task.id, doc_id = %task.doc_id, queue = %self.queue, "task queued");
        Ok(())
    }

    async fn pop(&self, timeout_secs: f64) -> Result<Option<TaskMessage>, DomainError> {
        let mut c = conn(&self.pool).await?;
        let popped: Option<(String, String)> = c
            .brpop(&self.queue, timeout_secs)
            .await
            .map_err(RedisError::from)?;

        match popped {
            Some((_, json)) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn len(&self) -> Result<u64, DomainError> {
        let mut c = conn(&self.pool).await?;
        Ok(c.llen(&self.queue).await.map_err(RedisError::from)?)
    }
}

#[derive(Clone)]
pub struct RedisExecutorRegistry {
    pool: RedisPool,
}

impl RedisExecutorRegistry {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutorRegistry for RedisExecutorRegistry {
    async fn report(
        &self,
        executor: &str,
        heartbeat: &serde_json::Value,
        at: f64,
    ) -> Result<(), DomainError> {
        let key = keys::heartbeats(executor);
        let mut c = conn(&self.pool).await?;
        c.sadd::<_, _, ()>(keys::EXECUTORS, executor)
            .await
            .map_err(RedisError::from)?;
        c.zadd::<_, _, _, ()>(&key, heartbeat.to_string(), at)
            .await
            .map_err(RedisError::from)?;
        c.zrembyscore::<_, _, _, ()>(&key, 0.0, at - HEARTBEAT_RETENTION_SECONDS)
            .await
            .map_err(RedisError::from)?;
        Ok(())
    }

    async fn heartbeats_since(
        &self,
        since: f64,
    ) -> Result<BTreeMap<String, Vec<serde_json::Value>>, DomainError> {
        let mut c = conn(&self.pool).await?;
        let executors: Vec<String> = c
            .smembers(keys::EXECUTORS)
            .await
            .map_err(RedisError::from)?;

        let mut out = BTreeMap::new();
        for executor in executors {
            let raw: Vec<String> = c
                .zrangebyscore(keys::heartbeats(&executor), since, "+inf")
                .await
                .map_err(RedisError::from)?;
            let beats = raw
                .iter()
                .filter_map(|json| serde_json::from_str(json).ok())
                .collect();
            out.insert(executor, beats);
        }
        Ok(out)
    }

    async fn ping(&self) -> Result<bool, DomainError> {
        Ok(ping(&self.pool).await?)
    }
}
