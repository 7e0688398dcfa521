pub mod config;
pub mod llm;
pub mod logging;
pub mod parser;
pub mod queue;
pub mod redis_pool;
pub mod repository;
pub mod storage;
pub mod vector_store;
pub mod web;

pub use config::{AppConfig, Config};
pub use llm::ModelRegistry;
pub use queue::{
    keys, queues, InMemoryExecutorRegistry, InMemoryTaskQueue, RedisExecutorRegistry,
    RedisTaskQueue,
};
pub use redis_pool::{create_pool, RedisPool};
pub use repository::{in_memory_repositories, redis_repositories};
pub use storage::{InMemoryBlobStore, LocalBlobStore};
pub use vector_store::{InMemoryChunkStore, QdrantChunkStore};
pub use web::HttpFetcher;
