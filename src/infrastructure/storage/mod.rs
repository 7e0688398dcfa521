mod in_memory;
mod local;

pub use in_memory::InMemoryBlobStore;
pub use local::LocalBlobStore;
