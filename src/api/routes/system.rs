use axum::{
    extract::{Path, State},
    routing::{delete, get, post},
    Extension, Router,
};

use crate::api::middleware::CurrentUser;
use crate::api::response::{get_json_result, ApiResult};
use crate::api::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/version", get(version))
        .route("/status", get(status))
        .route("/new_token", post(new_token))
        .route("/token_list", get(token_list))
        .route("/token/{token}", delete(remove_token))
}

pub async fn version(State(state): State<AppState>) -> ApiResult {
    get_json_result(state.services.system.version())
}

pub async fn status(State(state): State<AppState>) -> ApiResult {
    get_json_result(state.services.system.status().await)
}

pub async fn new_token(State(state): State<AppState>, Extension(CurrentUser(user)): Extension<CurrentUser>) -> ApiResult {
    get_json_result(state.services.system.new_token(&user.id).await?)
}

pub async fn token_list(State(state): State<AppState>, Extension(CurrentUser(user)): Extension<CurrentUser>) -> ApiResult {
    get_json_result(state.services.system.token_list(&user.id).await?)
}

pub async fn remove_token(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(token): Path<String>,
) -> ApiResult {
    state.services.system.remove_token(&user.id, &token).await?;
    get_json_result(true)
}
