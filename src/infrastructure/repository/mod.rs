mod in_memory;
mod redis_hash;

use std::sync::Arc;

pub use in_memory::InMemoryRepository;
pub use redis_hash::{RedisRepository, TABLE_PREFIX};

use crate::domain::ports::Repositories;
use crate::infrastructure::redis_pool::RedisPool;

pub fn in_memory_repositories() -> Repositories {
    Repositories {
        users: Arc::new(InMemoryRepository::new()),
        tenants: Arc::new(InMemoryRepository::new()),
        user_tenants: Arc::new(InMemoryRepository::new()),
        api_tokens: Arc::new(InMemoryRepository::new()),
        knowledgebases: Arc::new(InMemoryRepository::new()),
        documents: Arc::new(InMemoryRepository::new()),
        files: Arc::new(InMemoryRepository::new()),
        file2documents: Arc::new(InMemoryRepository::new()),
        tasks: Arc::new(InMemoryRepository::new()),
        llm_factories: Arc::new(InMemoryRepository::new()),
        llms: Arc::new(InMemoryRepository::new()),
        tenant_llms: Arc::new(InMemoryRepository::new()),
    }
}

pub fn redis_repositories(pool: &RedisPool) -> Repositories {
    Repositories {
        users: Arc::new(RedisRepository::new(pool.clone())),
        tenants: Arc::new(RedisRepository::new(pool.clone())),
        user_tenants: Arc::new(RedisRepository::new(pool.clone())),
        api_tokens: Arc::new(RedisRepository::new(pool.clone())),
        knowledgebases: Arc::new(RedisRepository::new(pool.clone())),
        documents: Arc::new(RedisRepository::new(pool.clone())),
        files: Arc::new(RedisRepository::new(pool.clone())),
        file2documents: Arc::new(RedisRepository::new(pool.clone())),
        tasks: Arc::new(RedisRepository::new(pool.clone())),
        llm_factories: Arc::new(RedisRepository::new(pool.clone())),
        llms: Arc::new(RedisRepository::new(pool.clone())),
        tenant_llms: Arc::new(RedisRepository::new(pool.clone())),
    }
}
