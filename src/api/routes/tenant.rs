use axum::{
    extract::{Path, State},
    routing::{delete, get, post, put},
    Extension, Json, Router,
};
use serde_json::{Map, Value};

use crate::api::middleware::CurrentUser;
use crate::api::response::{get_json_result, require, str_arg, ApiResult};
use crate::api::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/{tenant_id}/user/list", get(user_list))
        .route("/{tenant_id}/user", post(create))
        .route("/{tenant_id}/user/{user_id}", delete(rm))
        .route("/list", get(tenant_list))
        .route("/agree/{tenant_id}", put(agree))
}

pub async fn user_list(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(tenant_id): Path<String>,
) -> ApiResult {
    get_json_result(state.services.tenants.list_members(&user.id, &tenant_id).await?)
}

pub async fn create(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(tenant_id): Path<String>,
    Json(req): Json<Map<String, Value>>,
) -> ApiResult {
    require(&req, &["email"])?;
    let invited = state
        .services
        .tenants
        .invite(&user.id, &tenant_id, &str_arg(&req, "email"))
        .await?;
    get_json_result(invited)
}

pub async fn rm(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path((tenant_id, member_id)): Path<(String, String)>,
) -> ApiResult {
    state
        .services
        .tenants
        .remove_member(&user.id, &tenant_id, &member_id)
        .await?;
    get_json_result(true)
}

pub async fn tenant_list(State(state): State<AppState>, Extension(CurrentUser(user)): Extension<CurrentUser>) -> ApiResult {
    get_json_result(state.services.tenants.joined(&user.id).await?)
}

pub async fn agree(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(tenant_id): Path<String>,
) -> ApiResult {
    state.services.tenants.agree(&user.id, &tenant_id).await?;
    get_json_result(true)
}
