use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

use super::common::unix_now;
use super::tenant::TenantService;
use crate::domain::clock::Stamp;
use crate::domain::ports::{BlobStore, ChunkStore, ExecutorRegistry, Repositories};
use crate::domain::{new_id, ApiToken, DomainError};

/// How far back the status page looks for executor heartbeats.
const HEARTBEAT_WINDOW_SECONDS: f64 = 30.0 * 60.0;

fn elapsed_ms(started: Instant) -> String {
    format!("{:.1}", started.elapsed().as_secs_f64() * 1000.0)
}

/// Version, component health and API tokens.
pub struct SystemService {
    repos: Repositories,
    tenants: Arc<TenantService>,
    blobs: Arc<dyn BlobStore>,
    chunks: Arc<dyn ChunkStore>,
    executors: Arc<dyn ExecutorRegistry>,
    doc_engine: String,
    database: String,
}

impl SystemService {
    pub fn new(
        repos: Repositories,
        tenants: Arc<TenantService>,
        blobs: Arc<dyn BlobStore>,
        chunks: Arc<dyn ChunkStore>,
        executors: Arc<dyn ExecutorRegistry>,
        doc_engine: String,
        database: String,
    ) -> Self {
        Self {
            repos,
            tenants,
            blobs,
            chunks,
            executors,
            doc_engine,
            database,
        }
    }

    pub fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    async fn doc_engine_status(&self) -> Value {
        let started = Instant::now();
        match self.chunks.health().await {
            Ok(mut health) => {
                if let Some(obj) = health.as_object_mut() {
                    obj.entry("type").or_insert_with(|| json!(self.doc_engine));
                    obj.entry("status").or_insert_with(|| json!("green"));
                    obj.insert("elapsed".into(), json!(elapsed_ms(started)));
                }
                health
            }
            Err(e) => json!({
                "type": "unknown",
                "status": "red",
                "elapsed": elapsed_ms(started),
                "error": e.to_string(),
            }),
        }
    }

    async fn storage_status(&self) -> Value {
        let started = Instant::now();
        let mut storage = json!({ "storage": self.blobs.kind() });
        match self.blobs.health().await {
            Ok(()) => storage["status"] = json!("green"),
            Err(e) => {
                storage["status"] = json!("red");
                storage["error"] = json!(e.to_string());
            }
        }
        storage["elapsed"] = json!(elapsed_ms(started));
        storage
    }

    async fn database_status(&self) -> Value {
        let started = Instant::now();
        let mut database = json!({ "database": self.database });
        match self.repos.knowledgebases.get("x").await {
            Ok(_) => database["status"] = json!("green"),
            Err(e) => {
                database["status"] = json!("red");
                database["error"] = json!(e.to_string());
            }
        }
        database["elapsed"] = json!(elapsed_ms(started));
        database
    }

    async fn redis_status(&self) -> Value {
        let started = Instant::now();
        match self.executors.ping().await {
            Ok(true) => json!({ "status": "green", "elapsed": elapsed_ms(started) }),
            Ok(false) => json!({
                "status": "red",
                "elapsed": elapsed_ms(started),
                "error": "Lost connection!",
            }),
            Err(e) => json!({
                "status": "red",
                "elapsed": elapsed_ms(started),
                "error": e.to_string(),
            }),
        }
    }

    async fn heartbeats(&self) -> Value {
        match self
            .executors
            .heartbeats_since(unix_now() - HEARTBEAT_WINDOW_SECONDS)
            .await
        {
            Ok(beats) => json!(beats),
            Err(e) => {
                tracing::warn!(error = %e, "reading executor heartbeats failed");
                json!({})
            }
        }
    }

    /// Probes every backend concurrently. Failures are reported per
    /// component, never returned as an error.
    #[instrument(skip(self))]
    pub async fn status(&self) -> Value {
        let (doc_engine, storage, database, redis, heartbeats) = futures::join!(
            self.doc_engine_status(),
            self.storage_status(),
            self.database_status(),
            self.redis_status(),
            self.heartbeats()
        );

        json!({
            "doc_engine": doc_engine,
            "storage": storage,
            "database": database,
            "redis": redis,
            "task_executor_heartbeats": heartbeats,
        })
    }

    async fn tenant_of(&self, user_id: &str) -> Result<String, DomainError> {
        self.tenants
            .first_tenant_id(user_id)
            .await?
            .ok_or_else(|| DomainError::not_found("Tenant not found!"))
    }

    /// Issues an API token for the user's first tenant.
    #[instrument(skip(self))]
    pub async fn new_token(&self, user_id: &str) -> Result<ApiToken, DomainError> {
        let tenant_id = self.tenant_of(user_id).await?;
        let stamp = Stamp::now();
        let token = ApiToken {
            tenant_id,
            token: format!("ragflow-{}", new_id()),
            beta: Some(new_id()),
            dialog_id: None,
            source: None,
            create_time: stamp.create_time,
            create_date: stamp.create_date,
            update_time: None,
            update_date: None,
        };
        self.repos.api_tokens.save(&token).await?;
        tracing::info!(tenant_id = %token.tenant_id, "api token issued");
        Ok(token)
    }

    /// The tenant's tokens, assigning a beta to any token missing one.
    pub async fn token_list(&self, user_id: &str) -> Result<Vec<ApiToken>, DomainError> {
        let tenant = self.tenant_of(user_id).await?;
        let mut tokens = self
            .repos
            .api_tokens
            .find(&|t: &ApiToken| t.tenant_id == tenant)
            .await?;
        tokens.sort_by_key(|t| t.create_time);
        for token in &mut tokens {
            if token.beta.as_deref().is_none_or(str::is_empty) {
                token.beta = Some(new_id());
                self.repos.api_tokens.save(token).await?;
            }
        }
        Ok(tokens)
    }

    /// Removes a token issued for the user's tenant.
    pub async fn remove_token(&self, user_id: &str, token: &str) -> Result<bool, DomainError> {
        let tenant = self.tenant_of(user_id).await?;
        match self.repos.api_tokens.get(token).await? {
            Some(t) if t.tenant_id == tenant => self.repos.api_tokens.delete(token).await,
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::testing;
    use crate::application::{Services, Settings};

    #[tokio::test]
    async fn test_status_reports_every_component() {
        let b = testing::backends();
        b.executors
            .report("worker-1", &json!({"name": "worker-1", "done": 3}), unix_now())
            .await
            .unwrap();
        let s = Services::new(b, Settings::default());

        let status = s.system.status().await;
        assert_eq!(status["doc_engine"]["status"], "green");
        assert_eq!(status["storage"]["status"], "green");
        assert_eq!(status["database"]["status"], "green");
        assert_eq!(status["redis"]["status"], "green");
        assert_eq!(status["task_executor_heartbeats"]["worker-1"][0]["done"], 3);

        let elapsed = status["storage"]["elapsed"].as_str().unwrap();
        assert!(elapsed.split_once('.').is_some_and(|(_, frac)| frac.len() == 1));
    }

    #[tokio::test]
    async fn test_token_lifecycle() {
        let b = testing::backends();
        let s = Services::new(b.clone(), Settings::default());

        let err = s.system.new_token("nobody").await.unwrap_err();
        assert_eq!(err.to_string(), "Tenant not found!");

        testing::owner(&b, "t1").await;
        let token = s.system.new_token("t1").await.unwrap();
        assert!(token.token.starts_with("ragflow-"));
        assert_eq!(token.token.len(), "ragflow-".len() + 32);

        let mut stale = token.clone();
        stale.token = "legacy".into();
        stale.beta = None;
        b.repos.api_tokens.save(&stale).await.unwrap();

        let listed = s.system.token_list("t1").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|t| t.beta.as_deref().is_some_and(|b| b.len() == 32)));

        testing::owner(&b, "t2").await;
        assert!(s.system.remove_token("t1", &token.token).await.unwrap());
        assert!(!s.system.remove_token("t2", "legacy").await.unwrap());
        assert_eq!(s.system.token_list("t1").await.unwrap().len(), 1);
    }
}
