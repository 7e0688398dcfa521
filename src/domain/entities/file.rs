use serde::{Deserialize, Serialize};

use super::{new_id, FileSource, FileType};
use crate::domain::clock::Stamp;
use crate::domain::ports::Entity;

pub const ROOT_FOLDER_NAME: &str = "/";
pub const KNOWLEDGEBASE_FOLDER_NAME: &str = ".knowledgebase";

/// A node in a tenant's file-manager tree. The root folder is its own parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct File {
    pub id: String,
    pub parent_id: String,
    pub tenant_id: String,
    pub created_by: String,
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub size: i64,
    #[serde(rename = "type")]
    pub file_type: FileType,
    #[serde(default)]
    pub source_type: FileSource,
    #[serde(flatten)]
    pub stamp: Stamp,
}

impl File {
    pub fn folder(
        parent_id: Option<&str>,
        tenant_id: impl Into<String>,
        name: impl Into<String>,
        source_type: FileSource,
    ) -> Self {
        let id = new_id();
        let tenant_id = tenant_id.into();
        Self {
            parent_id: parent_id.map(str::to_string).unwrap_or_else(|| id.clone()),
            id,
            created_by: tenant_id.clone(),
            tenant_id,
            name: name.into(),
            location: None,
            size: 0,
            file_type: FileType::Folder,
            source_type,
            stamp: Stamp::now(),
        }
    }

    pub fn is_folder(&self) -> bool {
        self.file_type == FileType::Folder
    }

    pub fn is_root(&self) -> bool {
        self.parent_id == self.id
    }
}

impl Entity for File {
    const TABLE: &'static str = "file";

    fn id(&self) -> &str {
        &self.id
    }

    fn touch(&mut self) {
        self.stamp.touch();
    }
}

/// Link between a file-manager entry and a knowledge-base document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct File2Document {
    pub id: String,
    pub file_id: String,
    pub document_id: String,
    #[serde(flatten)]
    pub stamp: Stamp,
}

impl File2Document {
    pub fn new(file_id: impl Into<String>, document_id: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            file_id: file_id.into(),
            document_id: document_id.into(),
            stamp: Stamp::now(),
        }
    }
}

impl Entity for File2Document {
    const TABLE: &'static str = "file2document";

    fn id(&self) -> &str {
        &self.id
    }

    fn touch(&mut self) {
        self.stamp.touch();
    }
}
