mod anthropic;
mod builtin;
mod openai_compat;
mod registry;

pub use anthropic::AnthropicChat;
pub use builtin::{RigChat, RigEmbedding};
pub use openai_compat::OpenAiCompat;
pub use registry::ModelRegistry;
