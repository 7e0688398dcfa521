use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;

use crate::domain::{
    ApiToken, CatalogLlm, Document, DomainError, File, File2Document, Knowledgebase, LlmFactory,
    Task, Tenant, TenantLlm, User, UserTenant,
};

/// A row type persisted in a named table.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const TABLE: &'static str;

    fn id(&self) -> &str;

    /// Refreshes the update stamp before a write.
    fn touch(&mut self);

    /// Hook applied to every row read back from storage.
    fn loaded(self) -> Self {
        self
    }
}

/// Keyed storage for one table. Filtering happens in the services.
#[async_trait]
pub trait Repository<T: Entity>: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<T>, DomainError>;
    async fn list(&self) -> Result<Vec<T>, DomainError>;
    /// Inserts or replaces the row with the entity's id.
    async fn save(&self, entity: &T) -> Result<(), DomainError>;
    /// Returns whether a row was removed.
    async fn delete(&self, id: &str) -> Result<bool, DomainError>;

    /// Applies `apply` to the stored row atomically with respect to every
    /// other write to the table, returning the row as written. `apply` may
    /// run more than once and must only depend on the row it is handed.
    /// Returns `None` when no row has this id.
    async fn update(
        &self,
        id: &str,
        apply: &(dyn for<'a> Fn(&'a mut T) + Send + Sync),
    ) -> Result<Option<T>, DomainError>;

    async fn find(&self, pred: &(dyn for<'a> Fn(&'a T) -> bool + Send + Sync)) -> Result<Vec<T>, DomainError> {
        Ok(self.list().await?.into_iter().filter(|e| pred(e)).collect())
    }

    async fn find_one(
        &self,
        pred: &(dyn for<'a> Fn(&'a T) -> bool + Send + Sync),
    ) -> Result<Option<T>, DomainError> {
        Ok(self.list().await?.into_iter().find(|e| pred(e)))
    }

    async fn delete_where(
        &self,
        pred: &(dyn for<'a> Fn(&'a T) -> bool + Send + Sync),
    ) -> Result<usize, DomainError> {
        let doomed = self.find(pred).await?;
        for entity in &doomed {
            self.delete(entity.id()).await?;
        }
        Ok(doomed.len())
    }
}

/// All metadata tables the services work against.
#[derive(Clone)]
pub struct Repositories {
    pub users: Arc<dyn Repository<User>>,
    pub tenants: Arc<dyn Repository<Tenant>>,
    pub user_tenants: Arc<dyn Repository<UserTenant>>,
    pub api_tokens: Arc<dyn Repository<ApiToken>>,
    pub knowledgebases: Arc<dyn Repository<Knowledgebase>>,
    pub documents: Arc<dyn Repository<Document>>,
    pub files: Arc<dyn Repository<File>>,
    pub file2documents: Arc<dyn Repository<File2Document>>,
    pub tasks: Arc<dyn Repository<Task>>,
    pub llm_factories: Arc<dyn Repository<LlmFactory>>,
    pub llms: Arc<dyn Repository<CatalogLlm>>,
    pub tenant_llms: Arc<dyn Repository<TenantLlm>>,
}
