pub mod common;
pub mod counters;
pub mod document;
pub mod executor;
pub mod file;
pub mod file2document;
pub mod knowledgebase;
pub mod llm;
pub mod retrieval;
pub mod system;
pub mod task;
pub mod tenant;
pub mod user;

#[cfg(test)]
pub mod testing;

pub use common::PageQuery;
pub use document::{DocumentService, Download};
pub use executor::{Outcome, TaskExecutor};
pub use file::{FileService, UploadedFile};
pub use file2document::File2DocumentService;
pub use knowledgebase::KnowledgebaseService;
pub use llm::LlmService;
pub use retrieval::RetrievalService;
pub use system::SystemService;
pub use task::TaskService;
pub use tenant::{TenantService, NO_AUTHORIZATION};
pub use user::{AuthSettings, Claims, UserService};
