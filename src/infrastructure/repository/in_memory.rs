use async_trait::async_trait;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::RwLock;

use crate::domain::ports::{Entity, Repository};
use crate::domain::DomainError;

/// Table kept as serialized rows, so reads never alias stored values.
pub struct InMemoryRepository<T> {
    rows: RwLock<HashMap<String, String>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> InMemoryRepository<T> {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            _marker: PhantomData,
        }
    }
}

impl<T> Default for InMemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Entity> Repository<T> for InMemoryRepository<T> {
    async fn get(&self, id: &str) -> Result<Option<T>, DomainError> {
        let rows = self
            .rows
            .read()
            .map_err(|e| DomainError::internal(e.to_string()))?;
        rows.get(id)
            .map(|json| serde_json::from_str::<T>(json).map(Entity::loaded))
            .transpose()
            .map_err(Into::into)
    }

    async fn list(&self) -> Result<Vec<T>, DomainError> {
        let rows = self
            .rows
            .read()
            .map_err(|e| DomainError::internal(e.to_string()))?;
        rows.values()
            .map(|json| serde_json::from_str::<T>(json).map(Entity::loaded))
            .collect::<Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    async fn save(&self, entity: &T) -> Result<(), DomainError> {
        let mut entity = entity.clone();
        entity.touch();
        let json = serde_json::to_string(&entity)?;
        let mut rows = self
            .rows
            .write()
            .map_err(|e| DomainError::internal(e.to_string()))?;
        rows.insert(entity.id().to_string(), json);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, DomainError> {
        let mut rows = self
            .rows
            .write()
            .map_err(|e| DomainError::internal(e.to_string()))?;
        Ok(rows.remove(id).is_some())
    }

    async fn update(
        &self,
        id: &str,
        apply: &(dyn for<'a> Fn(&'a mut T) + Send + Sync),
    ) -> Result<Option<T>, DomainError> {
        let mut rows = self
            .rows
            .write()
            .map_err(|e| DomainError::internal(e.to_string()))?;
        let Some(json) = rows.get_mut(id) else {
            return Ok(None);
        };
        let mut entity = serde_json::from_str::<T>(json)?.loaded();
        apply(&mut entity);
        entity.touch();
        *json = serde_json::to_string(&entity)?;
        Ok(Some(entity))
    }
}
