use async_trait::async_trait;
use deadpool_redis::redis::{cmd, pipe, AsyncCommands};
use std::collections::HashMap;
use std::marker::PhantomData;

use crate::domain::ports::{Entity, Repository};
use crate::domain::DomainError;
use crate::infrastructure::redis_pool::{conn, RedisError, RedisPool};

pub const TABLE_PREFIX: &str = "ragflow";

/// Optimistic transactions retried before `update` gives up.
const MAX_UPDATE_ATTEMPTS: usize = 64;

/// One Redis hash per table: `ragflow:<table>`, field id, value JSON.
pub struct RedisRepository<T> {
    pool: RedisPool,
    key: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> RedisRepository<T> {
    pub fn new(pool: RedisPool) -> Self {
        Self {
            pool,
            key: format!("{TABLE_PREFIX}:{}", T::TABLE),
            _marker: PhantomData,
        }
    }

    fn decode(json: &str) -> Result<T, RedisError> {
        Ok(serde_json::from_str::<T>(json)?.loaded())
    }
}

#[async_trait]
impl<T: Entity> Repository<T> for RedisRepository<T> {
    async fn get(&self, id: &str) -> Result<Option<T>, DomainError> {
        let mut c = conn(&self.pool).await?;
        let json: Option<String> = c.hget(&self.key, id).await.map_err(RedisError::from)?;
        Ok(json.as_deref().map(Self::decode).transpose()?)
    }

    async fn list(&self) -> Result<Vec<T>, DomainError> {
        let mut c = conn(&self.pool).await?;
        let rows: HashMap<String, String> =
            c.hgetall(&self.key).await.map_err(RedisError::from)?;
        Ok(rows
            .values()
            .map(|json| Self::decode(json))
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn save(&self, entity: &T) -> Result<(), DomainError> {
        let mut entity = entity.clone();
        entity.touch();
        let json = serde_json::to_string(&entity)?;
        let mut c = conn(&self.pool).await?;
        c.hset::<_, _, _, ()>(&self.key, entity.id(), json)
            .await
            .map_err(RedisError::from)?;
        tracing::debug!(table = T::TABLE, id = entity.id(), "row saved");
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, DomainError> {
        let mut c = conn(&self.pool).await?;
        let removed: i64 = c.hdel(&self.key, id).await.map_err(RedisError::from)?;
        Ok(removed > 0)
    }

    /// WATCH/MULTI/EXEC on the table hash. EXEC returns nil when another
    /// client wrote the hash in between, and the read is redone.
    async fn update(
        &self,
        id: &str,
        apply: &(dyn for<'a> Fn(&'a mut T) + Send + Sync),
    ) -> Result<Option<T>, DomainError> {
        let mut c = conn(&self.pool).await?;
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            cmd("WATCH")
                .arg(&self.key)
                .query_async::<()>(&mut *c)
                .await
                .map_err(RedisError::from)?;

            let json: Option<String> = c.hget(&self.key, id).await.map_err(RedisError::from)?;
            let staged = json
                .as_deref()
                .map(|json| -> Result<(T, String), RedisError> {
                    let mut entity = Self::decode(json)?;
                    apply(&mut entity);
                    entity.touch();
                    let encoded = serde_json::to_string(&entity)?;
                    Ok((entity, encoded))
                })
                .transpose();
            let (entity, encoded) = match staged {
                Ok(Some(staged)) => staged,
                missing_or_invalid => {
                    cmd("UNWATCH")
                        .query_async::<()>(&mut *c)
                        .await
                        .map_err(RedisError::from)?;
                    return missing_or_invalid.map(|_| None).map_err(Into::into);
                }
            };

            let committed: Option<(i64,)> = pipe()
                .atomic()
                .hset(&self.key, id, encoded)
                .query_async(&mut *c)
                .await
                .map_err(RedisError::from)?;
            if committed.is_some() {
                return Ok(Some(entity));
            }
            tracing::debug!(table = T::TABLE, id, attempt, "update raced, retrying");
        }
        Err(DomainError::external(format!(
            "Too much contention updating {} {id}",
            T::TABLE
        )))
    }
}
