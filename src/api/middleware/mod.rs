pub mod auth;
pub mod logging;

pub use auth::{require_user, CurrentUser};
pub use logging::request_logger;
