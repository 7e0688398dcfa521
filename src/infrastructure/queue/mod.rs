mod in_memory;
mod jobs;
mod redis_list;

pub use in_memory::{InMemoryExecutorRegistry, InMemoryTaskQueue};
pub use jobs::{keys, queues, HEARTBEAT_RETENTION_SECONDS};
pub use redis_list::{RedisExecutorRegistry, RedisTaskQueue};
