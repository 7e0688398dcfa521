use axum::{extract::State, routing::post, Extension, Json, Router};
use serde_json::{Map, Value};

use crate::api::middleware::CurrentUser;
use crate::api::response::{get_json_result, ids_arg, require, str_arg, ApiResult};
use crate::api::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/retrieval_test", post(retrieval_test))
}

pub async fn retrieval_test(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(req): Json<Map<String, Value>>,
) -> ApiResult {
    require(&req, &["kb_id", "question"])?;
    let top_k = req
        .get("top_k")
        .and_then(Value::as_u64)
        .map(|k| k as usize);
    let threshold = req.get("similarity_threshold").and_then(Value::as_f64);
    let result = state
        .services
        .retrieval
        .retrieval_test(
            &user.id,
            &ids_arg(&req, "kb_id"),
            &str_arg(&req, "question"),
            top_k,
            threshold,
        )
        .await?;
    get_json_result(result)
}
