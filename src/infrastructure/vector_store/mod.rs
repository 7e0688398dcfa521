mod in_memory;
mod qdrant;

pub use in_memory::InMemoryChunkStore;
pub use qdrant::QdrantChunkStore;
