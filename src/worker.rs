use clap::Parser;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tracing::info;

use ragflow::application::services::common::unix_now;
use ragflow::application::{Outcome, Services};
use ragflow::bootstrap;
use ragflow::domain::ports::{ExecutorRegistry, TaskMessage, TaskQueue};
use ragflow::infrastructure::{logging, AppConfig};

const POP_TIMEOUT_SECS: f64 = 1.0;

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Queue error: {0}")]
    Queue(String),
    #[error("Worker closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, WorkerError>;

#[derive(Debug, Parser)]
#[command(name = "ragflow-worker", about = "RAGFlow task executor")]
struct Cli {
    /// Executor name reported in heartbeats.
    #[arg(long, env = "CONSUMER_NAME")]
    name: Option<String>,
    /// Log at debug level.
    #[arg(long)]
    debug: bool,
}

/// Counters published with every heartbeat.
#[derive(Default)]
pub struct WorkerStats {
    done: AtomicU64,
    failed: AtomicU64,
    current: Mutex<BTreeSet<String>>,
}

impl WorkerStats {
    fn start(&self, task_id: &str) {
        if let Ok(mut current) = self.current.lock() {
            current.insert(task_id.to_string());
        }
    }

    fn finish(&self, task_id: &str, outcome: Option<Outcome>) {
        if let Ok(mut current) = self.current.lock() {
            current.remove(task_id);
        }
        match outcome {
            Some(Outcome::Done) => self.done.fetch_add(1, Ordering::Relaxed),
            Some(Outcome::Failed) | None => self.failed.fetch_add(1, Ordering::Relaxed),
            Some(Outcome::Canceled | Outcome::Skipped) => 0,
        };
    }

    fn current(&self) -> Vec<String> {
        self.current
            .lock()
            .map(|c| c.iter().cloned().collect())
            .unwrap_or_default()
    }
}

pub struct WorkerState {
    pub name: String,
    pub services: Services,
    pub queue: Arc<dyn TaskQueue>,
    pub executors: Arc<dyn ExecutorRegistry>,
    pub stats: WorkerStats,
    pub boot_at: String,
}

impl WorkerState {
    pub fn new(app: &AppConfig, name: String) -> anyhow::Result<Self> {
        let backends = bootstrap::backends(&app.config)?;
        let queue = backends.queue.clone();
        let executors = backends.executors.clone();
        let services = Services::new(backends, bootstrap::settings(&app.config));

        Ok(Self {
            name,
            services,
            queue,
            executors,
            stats: WorkerStats::default(),
            boot_at: chrono::Local::now().to_rfc3339(),
        })
    }

    async fn heartbeat(&self) -> Result<()> {
        let pending = self
            .queue
            .len()
            .await
            .map_err(|e| WorkerError::Queue(e.to_string()))?;
        let now = unix_now();
        let beat = json!({
            "name": self.name,
            "now": chrono::Local::now().to_rfc3339(),
            "boot_at": self.boot_at,
            "pending": pending,
            // A plain list has no consumer group, so nothing is ever delivered
            // and left unacknowledged.
            "lag": 0,
            "done": self.stats.done.load(Ordering::Relaxed),
            "failed": self.stats.failed.load(Ordering::Relaxed),
            "current": self.stats.current(),
        });
        self.executors
            .report(&self.name, &beat, now)
            .await
            .map_err(|e| WorkerError::Queue(e.to_string()))
    }
}

pub struct JobConsumer {
    state: Arc<WorkerState>,
    concurrency: usize,
}

impl JobConsumer {
    pub fn new(state: Arc<WorkerState>, concurrency: usize) -> Self {
        Self {
            state,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn start(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        tracing::info!(concurrency = self.concurrency, "consumer started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => permit.map_err(|_| WorkerError::Closed)?,
                _ = shutdown.changed() => break,
            };

            let message = match self.state.queue.pop(POP_TIMEOUT_SECS).await {
                Ok(Some(message)) => message,
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!(error = %e, "queue pop failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            let state = self.state.clone();
            tokio::spawn(async move {
                let _permit = permit;
                process_task(&state, message).await;
            });
        }

        // Wait for in-flight tasks.
        let _drained = semaphore
            .acquire_many(self.concurrency as u32)
            .await
            .map_err(|_| WorkerError::Closed)?;
        tracing::info!("consumer stopped");
        Ok(())
    }
}

async fn process_task(state: &WorkerState, message: TaskMessage) {
    tracing::info!(task_id = %message.id, doc = %message.doc_name, "processing task");
    state.stats.start(&message.id);

    let outcome = match state.services.executor.handle(&message).await {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            tracing::error!(task_id = %message.id, error = %e, "task handling failed");
            None
        }
    };
    state.stats.finish(&message.id, outcome);

    tracing::info!(task_id = %message.id, ?outcome, "task finished");
}

fn spawn_heartbeat(
    state: Arc<WorkerState>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = state.heartbeat().await {
                        tracing::warn!(error = %e, "heartbeat failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let app_config = AppConfig::load()?;
    let config = &app_config.config;
    logging::init(&config.logging, cli.debug || config.server.debug);

    let name = cli.name.unwrap_or_else(|| {
        let id = uuid::Uuid::new_v4().simple().to_string();
        format!("task_executor_{}", &id[..8])
    });
    let state = Arc::new(WorkerState::new(&app_config, name)?);
    info!(name = %state.name, "task executor connected");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let heartbeat = spawn_heartbeat(
        state.clone(),
        Duration::from_secs(config.worker.heartbeat_interval_seconds.max(1)),
        shutdown_rx.clone(),
    );

    bootstrap::spawn_shutdown_relay(bootstrap::shutdown_signal(), shutdown_tx);

    let consumer = JobConsumer::new(state, config.worker.concurrency);
    info!(concurrency = config.worker.concurrency, "worker started");
    consumer.start(shutdown_rx).await?;
    heartbeat.await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragflow::infrastructure::config::{Backend, DocEngine, StorageBackend};

    fn memory_state() -> WorkerState {
        let mut app = AppConfig::default();
        app.config.metadata.backend = Backend::Memory;
        app.config.storage.backend = StorageBackend::Memory;
        app.config.doc_engine.kind = DocEngine::Memory;
        WorkerState::new(&app, "task_executor_test".to_string()).unwrap()
    }

    #[tokio::test]
    async fn test_heartbeat_reports_stats() {
        let state = memory_state();
        state.stats.start("t1");
        state.stats.start("t2");
        state.stats.finish("t2", Some(Outcome::Done));

        state.heartbeat().await.unwrap();

        let beats = state.executors.heartbeats_since(0.0).await.unwrap();
        let beat = &beats["task_executor_test"][0];
        assert_eq!(beat["name"], "task_executor_test");
        assert_eq!(beat["pending"], 0);
        assert_eq!(beat["lag"], 0);
        assert_eq!(beat["done"], 1);
        assert_eq!(beat["failed"], 0);
        assert_eq!(beat["current"], json!(["t1"]));
    }
}
