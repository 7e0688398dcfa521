mod blob_store;
mod chunk_store;
mod llm;
mod repository;
mod task_queue;
mod web;

pub use blob_store::BlobStore;
pub use chunk_store::{index_name, ChunkFilter, ChunkStore, ChunkUpdate};
pub use llm::{
    ChatMessage, ChatModel, EmbeddingModel, GenConf, ModelProvider, ModelSpec, RerankModel, Usage,
};
pub use repository::{Entity, Repositories, Repository};
pub use task_queue::{ExecutorRegistry, TaskMessage, TaskQueue};
pub use web::{FetchedPage, PageFetcher};
