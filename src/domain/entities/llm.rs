use serde::{Deserialize, Serialize};

use super::{LlmType, StatusEnum};
use crate::domain::clock::Stamp;
use crate::domain::ports::Entity;

/// A model vendor from the built-in catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmFactory {
    pub name: String,
    #[serde(default)]
    pub logo: String,
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub status: StatusEnum,
}

/// A catalog model offered by a factory (`fid`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Llm {
    pub llm_name: String,
    pub model_type: LlmType,
    pub fid: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: i64,
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub status: StatusEnum,
}

fn default_max_tokens() -> i64 {
    8192
}

impl Llm {
    pub fn key(&self) -> String {
        format!("{}@{}", self.llm_name, self.fid)
    }
}

/// A tenant's credentials for one factory model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantLlm {
    pub tenant_id: String,
    pub llm_factory: String,
    pub model_type: LlmType,
    pub llm_name: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<i64>,
    #[serde(default)]
    pub used_tokens: i64,
    #[serde(flatten)]
    pub stamp: Stamp,
    #[serde(skip)]
    row_id: String,
}

impl TenantLlm {
    pub fn new(
        tenant_id: impl Into<String>,
        llm_factory: impl Into<String>,
        llm_name: impl Into<String>,
        model_type: LlmType,
    ) -> Self {
        let tenant_id = tenant_id.into();
        let llm_factory = llm_factory.into();
        let llm_name = llm_name.into();
        Self {
            row_id: Self::row_key(&tenant_id, &llm_factory, &llm_name),
            tenant_id,
            llm_factory,
            model_type,
            llm_name,
            api_key: None,
            api_base: None,
            max_tokens: None,
            used_tokens: 0,
            stamp: Stamp::now(),
        }
    }

    pub fn row_key(tenant_id: &str, llm_factory: &str, llm_name: &str) -> String {
        format!("{tenant_id}:{llm_factory}:{llm_name}")
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    /// Restores the composite key after deserialization.
    pub fn rekey(mut self) -> Self {
        self.row_id = Self::row_key(&self.tenant_id, &self.llm_factory, &self.llm_name);
        self
    }
}

impl Entity for TenantLlm {
    const TABLE: &'static str = "tenant_llm";

    fn id(&self) -> &str {
        &self.row_id
    }

    fn touch(&mut self) {
        self.stamp.touch();
    }

    fn loaded(self) -> Self {
        self.rekey()
    }
}

impl Entity for LlmFactory {
    const TABLE: &'static str = "llm_factories";

    fn id(&self) -> &str {
        &self.name
    }

    fn touch(&mut self) {}
}

/// Catalog rows are keyed `name@factory`; the key is rebuilt on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogLlm {
    #[serde(flatten)]
    pub llm: Llm,
    #[serde(skip)]
    key: String,
}

impl From<Llm> for CatalogLlm {
    fn from(llm: Llm) -> Self {
        Self {
            key: llm.key(),
            llm,
        }
    }
}

impl Entity for CatalogLlm {
    const TABLE: &'static str = "llm";

    fn id(&self) -> &str {
        &self.key
    }

    fn touch(&mut self) {}

    fn loaded(self) -> Self {
        Self::from(self.llm)
    }
}

/// Splits a model reference such as `text-embedding-3-small@OpenAI`.
pub fn split_model_id(model_id: &str) -> (&str, Option<&str>) {
    match model_id.rsplit_once('@') {
        Some((name, factory)) if !factory.is_empty() => (name, Some(factory)),
        _ => (model_id, None),
    }
}
