use deadpool_redis::{redis::cmd, Config, Connection, Pool, Runtime};

use crate::domain::DomainError;

pub type RedisPool = Pool;

#[derive(Debug, thiserror::Error)]
pub enum RedisError {
    #[error("Redis pool error: {0}")]
    Pool(String),
    #[error("Redis error: {0}")]
    Redis(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<RedisError> for DomainError {
    fn from(e: RedisError) -> Self {
        match e {
            RedisError::Serialization(e) => e.into(),
            other => DomainError::external(other.to_string()),
        }
    }
}

impl From<deadpool_redis::redis::RedisError> for RedisError {
    fn from(e: deadpool_redis::redis::RedisError) -> Self {
        Self::Redis(e.to_string())
    }
}

pub fn create_pool(redis_url: &str) -> Result<RedisPool, RedisError> {
    let cfg = Config::from_url(redis_url);
    cfg.create_pool(Some(Runtime::Tokio1))
        .map_err(|e| RedisError::Pool(e.to_string()))
}

pub async fn conn(pool: &RedisPool) -> Result<Connection, RedisError> {
    pool.get().await.map_err(|e| RedisError::Pool(e.to_string()))
}

pub async fn ping(pool: &RedisPool) -> Result<bool, RedisError> {
    let mut conn = conn(pool).await?;
    let pong: String = cmd("PING").query_async(&mut *conn).await?;
    Ok(pong == "PONG")
}
