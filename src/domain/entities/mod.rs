mod document;
mod embedding;
mod file;
mod graph;
mod knowledgebase;
mod llm;
mod status;
mod task;
mod tenant;

pub use document::{chunk_content, Document, DocumentChunk, SearchResult, IMG_BASE64_PREFIX};
pub use embedding::Embedding;
pub use file::{File, File2Document, KNOWLEDGEBASE_FOLDER_NAME, ROOT_FOLDER_NAME};
pub use graph::{trim_graph, MAX_GRAPH_EDGES, MAX_GRAPH_NODES};
pub use knowledgebase::{default_parser_config, Knowledgebase, Permission, DATASET_NAME_LIMIT};
pub use llm::{split_model_id, CatalogLlm, Llm, LlmFactory, TenantLlm};
pub use status::{FileSource, FileType, LlmType, ParserType, StatusEnum, TaskStatus};
pub use task::{Task, MAX_PAGE};
pub use tenant::{ApiToken, Tenant, User, UserTenant, UserTenantRole};

/// Row ids are 32-char lowercase hex.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
