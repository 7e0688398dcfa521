//! Wiring shared by the `api` and `worker` binaries: configured backends in,
//! ready services out.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::application::{Backends, DefaultModels, Services, Settings};
use crate::domain::ports::{BlobStore, ChunkStore, ExecutorRegistry, TaskQueue};
use crate::domain::DomainError;
use crate::infrastructure::config::{Backend, Config, DocEngine, StorageBackend};
use crate::infrastructure::{
    create_pool, in_memory_repositories, redis_repositories, AppConfig, HttpFetcher,
    InMemoryBlobStore, InMemoryChunkStore, InMemoryExecutorRegistry, InMemoryTaskQueue,
    LocalBlobStore, ModelRegistry, QdrantChunkStore, RedisExecutorRegistry, RedisTaskQueue,
};

pub fn settings(config: &Config) -> Settings {
    let llm = &config.default_llm;
    Settings {
        jwt_secret: config.auth.jwt_secret.clone(),
        token_ttl_hours: config.auth.token_ttl_hours,
        default_models: DefaultModels {
            factory: llm.factory.clone(),
            llm_id: llm.chat_id(),
            embd_id: llm.embedding_id(),
            asr_id: llm.asr_id(),
            img2txt_id: llm.image2text_id(),
            rerank_id: llm.rerank_id(),
        },
        doc_engine: config.doc_engine.kind.as_str().to_string(),
        database: match config.metadata.backend {
            Backend::Redis => "redis".to_string(),
            Backend::Memory => "memory".to_string(),
        },
        max_file_num_per_user: config.limits.max_file_num_per_user,
        lighten: config.limits.lighten,
        embedding_batch_size: config.worker.embedding_batch_size,
        default_chunk_token_num: config.worker.default_chunk_token_num,
    }
}

/// Builds every port from configuration. Memory backends live and die
/// with the process.
pub fn backends(config: &Config) -> Result<Backends, DomainError> {
    let (repos, queue, executors) = match config.metadata.backend {
        Backend::Redis => {
            let pool = create_pool(&config.redis.url)?;
            tracing::info!(url = %config.redis.url, "redis pool initialized");
            let queue: Arc<dyn TaskQueue> =
                Arc::new(RedisTaskQueue::new(pool.clone(), &config.worker.queue_name));
            let executors: Arc<dyn ExecutorRegistry> = Arc::new(RedisExecutorRegistry::new(pool.clone()));
            (redis_repositories(&pool), queue, executors)
        }
        Backend::Memory => {
            tracing::warn!("metadata and queue are in memory; nothing survives a restart");
            let queue: Arc<dyn TaskQueue> = Arc::new(InMemoryTaskQueue::new());
            let executors: Arc<dyn ExecutorRegistry> = Arc::new(InMemoryExecutorRegistry::new());
            (in_memory_repositories(), queue, executors)
        }
    };

    let blobs: Arc<dyn BlobStore> = match config.storage.backend {
        StorageBackend::Local => Arc::new(LocalBlobStore::new(&config.storage.root)),
        StorageBackend::Memory => Arc::new(InMemoryBlobStore::new()),
    };

    let chunks: Arc<dyn ChunkStore> = match config.doc_engine.kind {
        DocEngine::Qdrant | DocEngine::Infinity => {
            tracing::info!(url = %config.doc_engine.url, "connecting chunk store");
            Arc::new(QdrantChunkStore::new(&config.doc_engine.url)?)
        }
        DocEngine::Memory => Arc::new(InMemoryChunkStore::new()),
    };

    let llm = &config.default_llm;
    let models = Arc::new(ModelRegistry::new(
        &llm.factory,
        &llm.api_key,
        Some(llm.base_url.clone()),
    ));

    Ok(Backends {
        repos,
        blobs,
        chunks,
        queue,
        executors,
        models,
        fetcher: Arc::new(HttpFetcher::new()?),
    })
}

pub fn services(app: &AppConfig) -> Result<Services, DomainError> {
    let backends = backends(&app.config)?;
    Ok(Services::new(backends, settings(&app.config)))
}

/// Loads the model catalog into the catalog tables.
pub async fn seed_catalog(services: &Services, app: &AppConfig) -> Result<(), DomainError> {
    let factories: Vec<_> = app
        .llm_catalog
        .factories
        .iter()
        .map(|f| f.factory.clone())
        .collect();
    services
        .llms
        .seed_catalog(&factories, &app.llm_catalog.models())
        .await
}

/// Resolves on ctrl-c, or on SIGTERM where the platform has it.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

/// Flips `shutdown` to true once `signal` resolves.
pub fn spawn_shutdown_relay<F>(signal: F, shutdown: watch::Sender<bool>) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        signal.await;
        shutdown.send(true).ok();
    })
}
