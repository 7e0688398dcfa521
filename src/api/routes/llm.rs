use axum::{
    extract::{Query, State},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::api::middleware::CurrentUser;
use crate::api::response::{get_json_result, require, str_arg, ApiResult};
use crate::api::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/factories", get(factories))
        .route("/set_api_key", post(set_api_key))
        .route("/add_llm", post(add_llm))
        .route("/delete_llm", post(delete_llm))
        .route("/delete_factory", post(delete_factory))
        .route("/my_llms", get(my_llms))
        .route("/list", get(list))
}

#[derive(Debug, Deserialize)]
pub struct ModelTypeFilter {
    pub model_type: Option<String>,
}

pub async fn factories(State(state): State<AppState>) -> ApiResult {
    get_json_result(state.services.llms.factories().await?)
}

pub async fn set_api_key(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(req): Json<Map<String, Value>>,
) -> ApiResult {
    require(&req, &["llm_factory", "api_key"])?;
    let base_url = str_arg(&req, "base_url");
    state
        .services
        .llms
        .set_api_key(
            &user.id,
            &str_arg(&req, "llm_factory"),
            &str_arg(&req, "api_key"),
            Some(base_url.as_str()).filter(|b| !b.is_empty()),
        )
        .await?;
    get_json_result(true)
}

pub async fn add_llm(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(req): Json<Map<String, Value>>,
) -> ApiResult {
    require(&req, &["llm_factory"])?;
    state.services.llms.add_llm(&user.id, &req).await?;
    get_json_result(true)
}

pub async fn delete_llm(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(req): Json<Map<String, Value>>,
) -> ApiResult {
    require(&req, &["llm_factory", "llm_name"])?;
    state
        .services
        .llms
        .delete_llm(&user.id, &str_arg(&req, "llm_factory"), &str_arg(&req, "llm_name"))
        .await?;
    get_json_result(true)
}

pub async fn delete_factory(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(req): Json<Map<String, Value>>,
) -> ApiResult {
    require(&req, &["llm_factory"])?;
    state
        .services
        .llms
        .delete_factory(&user.id, &str_arg(&req, "llm_factory"))
        .await?;
    get_json_result(true)
}

pub async fn my_llms(State(state): State<AppState>, Extension(CurrentUser(user)): Extension<CurrentUser>) -> ApiResult {
    get_json_result(state.services.llms.my_llms(&user.id).await?)
}

pub async fn list(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(filter): Query<ModelTypeFilter>,
) -> ApiResult {
    let model_type = filter.model_type.as_deref().filter(|t| !t.is_empty());
    get_json_result(state.services.llms.list(&user.id, model_type).await?)
}
