use axum::{extract::State, routing::post, Extension, Json, Router};
use serde_json::{Map, Value};

use crate::api::middleware::CurrentUser;
use crate::api::response::{get_json_result, ids_arg, require, ApiResult};
use crate::api::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/convert", post(convert))
        .route("/rm", post(rm))
}

pub async fn convert(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(req): Json<Map<String, Value>>,
) -> ApiResult {
    require(&req, &["file_ids", "kb_ids"])?;
    let links = state
        .services
        .file2documents
        .convert(&user.id, &ids_arg(&req, "file_ids"), &ids_arg(&req, "kb_ids"))
        .await?;
    get_json_result(links)
}

pub async fn rm(State(state): State<AppState>, Json(req): Json<Map<String, Value>>) -> ApiResult {
    require(&req, &["file_ids"])?;
    state
        .services
        .file2documents
        .rm(&ids_arg(&req, "file_ids"))
        .await?;
    get_json_result(true)
}
