use serde::{Deserialize, Serialize};

use super::{new_id, StatusEnum};
use crate::domain::clock::Stamp;
use crate::domain::ports::Entity;

pub const DATASET_NAME_LIMIT: usize = 128;

/// Who besides the owner can see a knowledge base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    #[default]
    Me,
    Team,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Knowledgebase {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub description: Option<String>,
    pub embd_id: String,
    #[serde(default)]
    pub permission: Permission,
    pub created_by: String,
    #[serde(default)]
    pub doc_num: i64,
    #[serde(default)]
    pub token_num: i64,
    #[serde(default)]
    pub chunk_num: i64,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_vector_similarity_weight")]
    pub vector_similarity_weight: f64,
    #[serde(default = "default_parser_id")]
    pub parser_id: String,
    #[serde(default = "default_parser_config")]
    pub parser_config: serde_json::Value,
    #[serde(default)]
    pub pagerank: i64,
    #[serde(default)]
    pub status: StatusEnum,
    #[serde(flatten)]
    pub stamp: Stamp,
}

fn default_language() -> String {
    "English".to_string()
}

fn default_similarity_threshold() -> f64 {
    0.2
}

fn default_vector_similarity_weight() -> f64 {
    0.3
}

fn default_parser_id() -> String {
    "naive".to_string()
}

pub fn default_parser_config() -> serde_json::Value {
    serde_json::json!({ "pages": [[1, 1000000]] })
}

impl Knowledgebase {
    pub fn new(
        tenant_id: impl Into<String>,
        name: impl Into<String>,
        embd_id: impl Into<String>,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id(),
            tenant_id: tenant_id.into(),
            name: name.into(),
            avatar: None,
            language: default_language(),
            description: None,
            embd_id: embd_id.into(),
            permission: Permission::Me,
            created_by: created_by.into(),
            doc_num: 0,
            token_num: 0,
            chunk_num: 0,
            similarity_threshold: default_similarity_threshold(),
            vector_similarity_weight: default_vector_similarity_weight(),
            parser_id: default_parser_id(),
            parser_config: default_parser_config(),
            pagerank: 0,
            status: StatusEnum::Valid,
            stamp: Stamp::now(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.status == StatusEnum::Valid
    }
}

impl Entity for Knowledgebase {
    const TABLE: &'static str = "knowledgebase";

    fn id(&self) -> &str {
        &self.id
    }

    fn touch(&mut self) {
        self.stamp.touch();
    }
}
