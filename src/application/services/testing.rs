//! In-memory backends and scripted model clients for service tests.

use async_trait::async_trait;
use std::sync::Arc;

use crate::application::Backends;
use crate::domain::ports::{
    ChatMessage, ChatModel, EmbeddingModel, FetchedPage, GenConf, ModelProvider, ModelSpec,
    PageFetcher, RerankModel, Usage,
};
use crate::domain::{
    DomainError, Embedding, Knowledgebase, LlmType, StatusEnum, Tenant, TenantLlm, User, UserTenant,
    UserTenantRole,
};
use crate::domain::clock::Stamp;
use crate::infrastructure::{
    in_memory_repositories, InMemoryBlobStore, InMemoryChunkStore, InMemoryExecutorRegistry,
    InMemoryTaskQueue,
};

/// Key that every fake model client rejects.
pub const BAD_KEY: &str = "bad-key";

/// Bag-of-letters vectors, so texts sharing words land close together.
pub fn embed(text: &str) -> Embedding {
    let mut v = vec![0.0f32; 26];
    for c in text.to_lowercase().chars().filter(char::is_ascii_lowercase) {
        v[(c as u8 - b'a') as usize] += 1.0;
    }
    Embedding::new(v)
}

struct FakeEmbedding;

#[async_trait]
impl EmbeddingModel for FakeEmbedding {
    async fn encode(&self, texts: &[String]) -> Result<Usage<Vec<Embedding>>, DomainError> {
        let tokens = texts.iter().map(|t| t.split_whitespace().count() as u64).sum();
        Ok((texts.iter().map(|t| embed(t)).collect(), tokens))
    }
}

struct FakeChat;

#[async_trait]
impl ChatModel for FakeChat {
    async fn chat(
        &self,
        _system: Option<&str>,
        history: &[ChatMessage],
        _conf: &GenConf,
    ) -> Result<Usage<String>, DomainError> {
        let last = history.last().map(|m| m.content.clone()).unwrap_or_default();
        Ok((format!("echo: {last}"), 5))
    }
}

struct FakeRerank;

#[async_trait]
impl RerankModel for FakeRerank {
    async fn similarity(&self, _query: &str, texts: &[String]) -> Result<Usage<Vec<f32>>, DomainError> {
        Ok((vec![0.5; texts.len()], texts.len() as u64))
    }
}

/// Serves every factory except `Unsupported`; rejects [`BAD_KEY`].
pub struct FakeModels;

impl FakeModels {
    fn check(spec: &ModelSpec, kind: LlmType) -> Result<(), DomainError> {
        if spec.api_key == BAD_KEY {
            return Err(DomainError::external("401 invalid api key"));
        }
        if spec.factory == "Unsupported" {
            return Err(DomainError::validation(format!(
                "{} does not offer {} models",
                spec.factory, kind
            )));
        }
        Ok(())
    }
}

impl ModelProvider for FakeModels {
    fn chat(&self, spec: &ModelSpec) -> Result<Arc<dyn ChatModel>, DomainError> {
        Self::check(spec, LlmType::Chat)?;
        Ok(Arc::new(FakeChat))
    }

    fn embedding(&self, spec: &ModelSpec) -> Result<Arc<dyn EmbeddingModel>, DomainError> {
        Self::check(spec, LlmType::Embedding)?;
        Ok(Arc::new(FakeEmbedding))
    }

    fn rerank(&self, spec: &ModelSpec) -> Result<Arc<dyn RerankModel>, DomainError> {
        Self::check(spec, LlmType::Rerank)?;
        Ok(Arc::new(FakeRerank))
    }

    fn supports(&self, factory: &str, _model_type: LlmType) -> bool {
        factory != "Unsupported"
    }
}

/// Answers every URL with a small HTML page, except hosts named `down`.
pub struct FakeFetcher;

#[async_trait]
impl PageFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, DomainError> {
        if url.contains("://down") {
            return Err(DomainError::external("connection refused"));
        }
        Ok(FetchedPage {
            content_type: "text/html; charset=utf-8".to_string(),
            body: format!("<html><body><h1>Page</h1><p>Fetched from {url}</p></body></html>")
                .into_bytes(),
        })
    }
}

pub fn backends() -> Backends {
    Backends {
        repos: in_memory_repositories(),
        blobs: Arc::new(InMemoryBlobStore::new()),
        chunks: Arc::new(InMemoryChunkStore::new()),
        queue: Arc::new(InMemoryTaskQueue::new()),
        executors: Arc::new(InMemoryExecutorRegistry::new()),
        models: Arc::new(FakeModels),
        fetcher: Arc::new(FakeFetcher),
    }
}

/// A user owning a tenant with the same id, keyed for the `Test` factory.
pub async fn owner(b: &Backends, id: &str) -> User {
    let mut user = User::new(format!("{id}@example.com"), id, "hash");
    user.id = id.to_string();
    b.repos.users.save(&user).await.unwrap();
    b.repos
        .tenants
        .save(&Tenant {
            id: id.to_string(),
            name: format!("{id}'s Kingdom"),
            llm_id: "chat@Test".to_string(),
            embd_id: "embed@Test".to_string(),
            asr_id: String::new(),
            img2txt_id: String::new(),
            rerank_id: String::new(),
            tts_id: None,
            parser_ids: String::new(),
            credit: 512,
            status: StatusEnum::Valid,
            stamp: Stamp::now(),
        })
        .await
        .unwrap();
    b.repos
        .user_tenants
        .save(&UserTenant::new(id, id, UserTenantRole::Owner, id))
        .await
        .unwrap();
    for (name, kind) in [("chat", LlmType::Chat), ("embed", LlmType::Embedding), ("rerank", LlmType::Rerank)] {
        let mut row = TenantLlm::new(id, "Test", name, kind);
        row.api_key = Some("test-key".to_string());
        b.repos.tenant_llms.save(&row).await.unwrap();
    }
    user
}

pub async fn join(b: &Backends, user_id: &str, tenant_id: &str, role: UserTenantRole) {
    b.repos
        .user_tenants
        .save(&UserTenant::new(user_id, tenant_id, role, tenant_id))
        .await
        .unwrap();
}

/// A knowledge base owned by `tenant_id`, creating the owner if needed.
pub async fn knowledgebase(b: &Backends, tenant_id: &str, name: &str) -> Knowledgebase {
    if b.repos.tenants.get(tenant_id).await.unwrap().is_none() {
        owner(b, tenant_id).await;
    }
    let kb = Knowledgebase::new(tenant_id, name, "embed@Test", tenant_id);
    b.repos.knowledgebases.save(&kb).await.unwrap();
    kb
}
