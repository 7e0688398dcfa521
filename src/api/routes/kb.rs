use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::ListParams;
use crate::api::middleware::CurrentUser;
use crate::api::response::{
    get_json_result, not_allowed, require, split_ids, str_arg, ApiError, ApiResult,
};
use crate::api::state::AppState;

const DEFAULT_PAGE_SIZE: usize = 150;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/create", post(create))
        .route("/update", post(update))
        .route("/detail", get(detail))
        .route("/list", get(list))
        .route("/rm", post(rm))
        .route("/tags", get(list_tags_from_kbs))
        .route("/{kb_id}/tags", get(list_tags))
        .route("/{kb_id}/rm_tags", post(rm_tags))
        .route("/{kb_id}/rename_tag", post(rename_tag))
        .route("/{kb_id}/knowledge_graph", get(knowledge_graph))
}

#[derive(Debug, Deserialize)]
pub struct KbQuery {
    pub kb_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ParserFilter {
    pub parser_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TagsQuery {
    pub kb_ids: Option<String>,
}

pub async fn create(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(req): Json<Map<String, Value>>,
) -> ApiResult {
    require(&req, &["name"])?;
    let kb_id = state.services.knowledgebases.create(&user.id, &req).await?;
    get_json_result(json!({ "kb_id": kb_id }))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(req): Json<Map<String, Value>>,
) -> ApiResult {
    require(&req, &["kb_id", "name", "description", "permission", "parser_id"])?;
    not_allowed(
        &req,
        &["id", "tenant_id", "created_by", "create_time", "update_time", "create_date", "update_date"],
    )?;
    let kb_id = str_arg(&req, "kb_id");
    let mut fields = req;
    fields.remove("kb_id");
    get_json_result(state.services.knowledgebases.update(&user.id, &kb_id, &fields).await?)
}

pub async fn detail(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(q): Query<KbQuery>,
) -> ApiResult {
    let kb_id = q.kb_id.unwrap_or_default();
    get_json_result(state.services.knowledgebases.detail(&user.id, &kb_id).await?)
}

pub async fn list(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(params): Query<ListParams>,
    Query(filter): Query<ParserFilter>,
) -> ApiResult {
    let page = params.page_query(DEFAULT_PAGE_SIZE);
    let parser_id = filter.parser_id.as_deref().filter(|p| !p.is_empty());
    let kbs = state
        .services
        .knowledgebases
        .list(&user.id, params.keywords(), parser_id, &page)
        .await?;
    get_json_result(kbs)
}

pub async fn rm(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(req): Json<Map<String, Value>>,
) -> ApiResult {
    require(&req, &["kb_id"])?;
    state
        .services
        .knowledgebases
        .rm(&user.id, &str_arg(&req, "kb_id"))
        .await?;
    get_json_result(true)
}

pub async fn list_tags(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(kb_id): Path<String>,
) -> ApiResult {
    get_json_result(state.services.knowledgebases.tags(&user.id, &[kb_id]).await?)
}

pub async fn list_tags_from_kbs(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(q): Query<TagsQuery>,
) -> ApiResult {
    let kb_ids = split_ids(q.kb_ids.as_deref().unwrap_or_default());
    if kb_ids.is_empty() {
        return Err(ApiError::argument_error(r#"Lack of "KB ID""#));
    }
    get_json_result(state.services.knowledgebases.tags(&user.id, &kb_ids).await?)
}

pub async fn rm_tags(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(kb_id): Path<String>,
    Json(req): Json<Map<String, Value>>,
) -> ApiResult {
    require(&req, &["tags"])?;
    let tags: Vec<String> = req
        .get("tags")
        .and_then(Value::as_array)
        .map(|tags| tags.iter().filter_map(|t| t.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    state.services.knowledgebases.rm_tags(&user.id, &kb_id, &tags).await?;
    get_json_result(true)
}

pub async fn rename_tag(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(kb_id): Path<String>,
    Json(req): Json<Map<String, Value>>,
) -> ApiResult {
    require(&req, &["from_tag", "to_tag"])?;
    state
        .services
        .knowledgebases
        .rename_tag(&user.id, &kb_id, &str_arg(&req, "from_tag"), &str_arg(&req, "to_tag"))
        .await?;
    get_json_result(true)
}

pub async fn knowledge_graph(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(kb_id): Path<String>,
) -> ApiResult {
    get_json_result(state.services.knowledgebases.knowledge_graph(&user.id, &kb_id).await?)
}
