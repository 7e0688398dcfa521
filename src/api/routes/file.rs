use axum::{
    extract::{Multipart, Query, State},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{Form, ListParams};
use crate::api::middleware::CurrentUser;
use crate::api::response::{get_json_result, require, str_arg, ApiResult};
use crate::api::state::AppState;
use crate::domain::FileType;

const DEFAULT_PAGE_SIZE: usize = 15;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/upload", post(upload))
        .route("/create", post(create))
        .route("/list", get(list))
}

#[derive(Debug, Deserialize)]
pub struct ParentFilter {
    pub parent_id: Option<String>,
}

pub async fn upload(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    multipart: Multipart,
) -> ApiResult {
    let form = Form::read(multipart).await?;
    let files = state
        .services
        .files
        .upload(&user.id, form.field("parent_id"), form.files()?)
        .await?;
    get_json_result(files)
}

pub async fn create(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(req): Json<Map<String, Value>>,
) -> ApiResult {
    require(&req, &["name"])?;
    let file_type = match str_arg(&req, "type").as_str() {
        "folder" => FileType::Folder,
        _ => FileType::Virtual,
    };
    let parent_id = str_arg(&req, "parent_id");
    let parent_id = Some(parent_id.as_str()).filter(|p| !p.is_empty());
    let file = state
        .services
        .files
        .create(&user.id, parent_id, &str_arg(&req, "name"), file_type)
        .await?;
    get_json_result(file)
}

pub async fn list(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(params): Query<ListParams>,
    Query(filter): Query<ParentFilter>,
) -> ApiResult {
    let parent_id = filter.parent_id.as_deref().filter(|p| !p.is_empty());
    let files = state
        .services
        .files
        .list(&user.id, parent_id, params.keywords(), &params.page_query(DEFAULT_PAGE_SIZE))
        .await?;
    get_json_result(files)
}
