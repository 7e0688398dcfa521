//! Application layer - Use cases and orchestration.
//!
//! Services depend on domain ports (traits) rather than concrete
//! implementations, so the same wiring runs over Redis/Qdrant in
//! production and over in-memory stores in tests.

pub mod services;

use std::sync::Arc;

use crate::domain::ports::{
    BlobStore, ChunkStore, ExecutorRegistry, ModelProvider, PageFetcher, Repositories, TaskQueue,
};

pub use services::*;

/// Ports every service draws from.
#[derive(Clone)]
pub struct Backends {
    pub repos: Repositories,
    pub blobs: Arc<dyn BlobStore>,
    pub chunks: Arc<dyn ChunkStore>,
    pub queue: Arc<dyn TaskQueue>,
    pub executors: Arc<dyn ExecutorRegistry>,
    pub models: Arc<dyn ModelProvider>,
    pub fetcher: Arc<dyn PageFetcher>,
}

/// Model ids (`name@factory`) a newly registered tenant starts with.
#[derive(Debug, Clone, Default)]
pub struct DefaultModels {
    pub factory: String,
    pub llm_id: String,
    pub embd_id: String,
    pub asr_id: String,
    pub img2txt_id: String,
    pub rerank_id: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    pub default_models: DefaultModels,
    /// Labels reported by the status endpoint.
    pub doc_engine: String,
    pub database: String,
    pub max_file_num_per_user: usize,
    pub lighten: bool,
    pub embedding_batch_size: usize,
    pub default_chunk_token_num: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            jwt_secret: "dev-secret-key".to_string(),
            token_ttl_hours: 24,
            default_models: DefaultModels::default(),
            doc_engine: "memory".to_string(),
            database: "memory".to_string(),
            max_file_num_per_user: 0,
            lighten: false,
            embedding_batch_size: 16,
            default_chunk_token_num: 128,
        }
    }
}

/// Every service, wired once and shared by the API server and workers.
#[derive(Clone)]
pub struct Services {
    pub users: Arc<UserService>,
    pub tenants: Arc<TenantService>,
    pub knowledgebases: Arc<KnowledgebaseService>,
    pub documents: Arc<DocumentService>,
    pub files: Arc<FileService>,
    pub file2documents: Arc<File2DocumentService>,
    pub llms: Arc<LlmService>,
    pub system: Arc<SystemService>,
    pub tasks: Arc<TaskService>,
    pub retrieval: Arc<RetrievalService>,
    pub executor: Arc<TaskExecutor>,
}

impl Services {
    pub fn new(backends: Backends, settings: Settings) -> Self {
        let repos = backends.repos.clone();

        let tenants = Arc::new(TenantService::new(repos.clone()));
        let files = Arc::new(FileService::new(
            repos.clone(),
            backends.blobs.clone(),
            settings.max_file_num_per_user,
        ));
        let tasks = Arc::new(TaskService::new(repos.clone(), backends.queue.clone()));
        let documents = Arc::new(DocumentService::new(
            repos.clone(),
            backends.blobs.clone(),
            backends.chunks.clone(),
            files.clone(),
            tasks.clone(),
            tenants.clone(),
            backends.fetcher.clone(),
        ));
        let llms = Arc::new(LlmService::new(
            repos.clone(),
            backends.models.clone(),
            settings.default_models.factory.clone(),
            settings.lighten,
        ));
        let knowledgebases = Arc::new(KnowledgebaseService::new(
            repos.clone(),
            backends.chunks.clone(),
            documents.clone(),
            files.clone(),
            tenants.clone(),
            llms.clone(),
            settings.doc_engine.clone(),
        ));
        let file2documents = Arc::new(File2DocumentService::new(
            repos.clone(),
            documents.clone(),
            files.clone(),
        ));
        let users = Arc::new(UserService::new(
            repos.clone(),
            files.clone(),
            AuthSettings {
                jwt_secret: settings.jwt_secret.clone(),
                token_ttl_hours: settings.token_ttl_hours,
                default_models: settings.default_models.clone(),
            },
        ));
        let system = Arc::new(SystemService::new(
            repos.clone(),
            tenants.clone(),
            backends.blobs.clone(),
            backends.chunks.clone(),
            backends.executors.clone(),
            settings.doc_engine.clone(),
            settings.database.clone(),
        ));
        let retrieval = Arc::new(RetrievalService::new(
            repos.clone(),
            backends.chunks.clone(),
            llms.clone(),
            tenants.clone(),
        ));
        let executor = Arc::new(TaskExecutor::new(
            repos,
            backends.blobs,
            backends.chunks,
            llms.clone(),
            tasks.clone(),
            settings.embedding_batch_size,
            settings.default_chunk_token_num,
        ));

        Self {
            users,
            tenants,
            knowledgebases,
            documents,
            files,
            file2documents,
            llms,
            system,
            tasks,
            retrieval,
            executor,
        }
    }
}
