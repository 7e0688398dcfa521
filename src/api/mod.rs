pub mod middleware;
pub mod progress;
pub mod response;
pub mod routes;
pub mod state;

pub use progress::spawn_progress_updater;
pub use response::{ApiError, ApiResult, RetCode};
pub use routes::create_router;
pub use state::AppState;
