use axum::{
    extract::{FromRequest, Multipart, Path, Query, Request, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{Form, ListParams};
use crate::api::middleware::CurrentUser;
use crate::api::response::{
    get_json_result, ids_arg, require, split_ids, str_arg, ApiError, ApiResult,
};
use crate::api::state::AppState;
use crate::application::Download;
use crate::domain::TaskStatus;

const DEFAULT_PAGE_SIZE: usize = 15;
const LACK_KB_ID: &str = r#"Lack of "KB ID""#;

/// Served without a session: thumbnails and images are loaded by `<img>`
/// tags that cannot carry a bearer token.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/document/thumbnails", get(thumbnails))
        .route("/document/get/{doc_id}", get(get_document))
        .route("/document/image/{image_id}", get(get_image))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/upload", post(upload))
        .route("/web_crawl", post(web_crawl))
        .route("/create", post(create))
        .route("/list", get(list))
        .route("/infos", post(infos))
        .route("/change_status", post(change_status))
        .route("/rm", post(rm))
        .route("/run", post(run))
        .route("/rename", post(rename))
        .route("/change_parser", post(change_parser))
        .route("/parse", post(parse))
        .route("/set_meta", post(set_meta))
}

#[derive(Debug, Deserialize)]
pub struct KbFilter {
    pub kb_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DocIdsQuery {
    pub doc_ids: Option<String>,
}

fn raw(download: Download) -> Response {
    ([(header::CONTENT_TYPE, download.content_type)], download.data).into_response()
}

fn bulk_result(errors: Vec<String>) -> ApiResult {
    if errors.is_empty() {
        get_json_result(true)
    } else {
        Err(ApiError::server_error(errors.join("\n")))
    }
}

pub async fn upload(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    multipart: Multipart,
) -> ApiResult {
    let form = Form::read(multipart).await?;
    let kb_id = form
        .field("kb_id")
        .ok_or_else(|| ApiError::argument_error(LACK_KB_ID))?;
    let files = form.files()?;
    let errors = state.services.documents.upload(&user.id, kb_id, files).await?;
    bulk_result(errors)
}

pub async fn web_crawl(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    multipart: Multipart,
) -> ApiResult {
    let form = Form::read(multipart).await?;
    let kb_id = form
        .field("kb_id")
        .ok_or_else(|| ApiError::argument_error(LACK_KB_ID))?;
    let name = form.field("name").unwrap_or_default();
    let url = form.field("url").unwrap_or_default();
    state
        .services
        .documents
        .web_crawl(&user.id, kb_id, name, url)
        .await?;
    get_json_result(true)
}

pub async fn create(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(req): Json<Map<String, Value>>,
) -> ApiResult {
    require(&req, &["name", "kb_id"])?;
    let kb_id = str_arg(&req, "kb_id");
    if kb_id.is_empty() {
        return Err(ApiError::argument_error(LACK_KB_ID));
    }
    let doc = state
        .services
        .documents
        .create(&user.id, &kb_id, &str_arg(&req, "name"))
        .await?;
    get_json_result(doc)
}

pub async fn list(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(params): Query<ListParams>,
    Query(filter): Query<KbFilter>,
) -> ApiResult {
    let kb_id = filter
        .kb_id
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ApiError::argument_error(LACK_KB_ID))?;
    let docs = state
        .services
        .documents
        .list(&user.id, &kb_id, params.keywords(), &params.page_query(DEFAULT_PAGE_SIZE))
        .await?;
    get_json_result(docs)
}

pub async fn infos(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(req): Json<Map<String, Value>>,
) -> ApiResult {
    let doc_ids = ids_arg(&req, "doc_ids");
    get_json_result(state.services.documents.infos(&user.id, &doc_ids).await?)
}

pub async fn thumbnails(State(state): State<AppState>, Query(q): Query<DocIdsQuery>) -> ApiResult {
    let doc_ids = split_ids(q.doc_ids.as_deref().unwrap_or_default());
    if doc_ids.is_empty() {
        return Err(ApiError::argument_error(r#"Lack of "Document ID""#));
    }
    get_json_result(state.services.documents.thumbnails(&doc_ids).await?)
}

pub async fn change_status(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(req): Json<Map<String, Value>>,
) -> ApiResult {
    require(&req, &["doc_id", "status"])?;
    state
        .services
        .documents
        .change_status(&user.id, &str_arg(&req, "doc_id"), &str_arg(&req, "status"))
        .await?;
    get_json_result(true)
}

pub async fn rm(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(req): Json<Map<String, Value>>,
) -> ApiResult {
    require(&req, &["doc_id"])?;
    let doc_ids = ids_arg(&req, "doc_id");
    let errors = state.services.documents.remove(&user.id, &doc_ids).await?;
    bulk_result(errors)
}

pub async fn run(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(req): Json<Map<String, Value>>,
) -> ApiResult {
    require(&req, &["doc_ids", "run"])?;
    let run = TaskStatus::parse(&str_arg(&req, "run"))
        .ok_or_else(|| ApiError::argument_error("Invalid run status."))?;
    let delete = req.get("delete").and_then(Value::as_bool).unwrap_or(false);
    state
        .services
        .documents
        .run(&user.id, &ids_arg(&req, "doc_ids"), run, delete)
        .await?;
    get_json_result(true)
}

pub async fn rename(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(req): Json<Map<String, Value>>,
) -> ApiResult {
    require(&req, &["doc_id", "name"])?;
    state
        .services
        .documents
        .rename(&user.id, &str_arg(&req, "doc_id"), &str_arg(&req, "name"))
        .await?;
    get_json_result(true)
}

pub async fn get_document(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
) -> Result<Response, ApiError> {
    Ok(raw(state.services.documents.download(&doc_id).await?))
}

pub async fn change_parser(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(req): Json<Map<String, Value>>,
) -> ApiResult {
    require(&req, &["doc_id", "parser_id"])?;
    state
        .services
        .documents
        .change_parser(
            &user.id,
            &str_arg(&req, "doc_id"),
            &str_arg(&req, "parser_id"),
            req.get("parser_config"),
        )
        .await?;
    get_json_result(true)
}

pub async fn get_image(
    State(state): State<AppState>,
    Path(image_id): Path<String>,
) -> Result<Response, ApiError> {
    Ok(raw(state.services.documents.image(&image_id).await?))
}

/// Text of a URL (JSON body) or of uploaded files (multipart body).
pub async fn parse(State(state): State<AppState>, request: Request) -> ApiResult {
    let is_json = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));

    let documents = &state.services.documents;
    if is_json {
        let Json(req) = Json::<Map<String, Value>>::from_request(request, &state)
            .await
            .map_err(|e| ApiError::argument_error(e.body_text()))?;
        let url = str_arg(&req, "url");
        if !url.is_empty() {
            return get_json_result(documents.parse_url(&url).await?);
        }
        return Err(ApiError::argument_error("No file part!"));
    }

    let multipart = Multipart::from_request(request, &state)
        .await
        .map_err(|e| ApiError::argument_error(e.body_text()))?;
    let form = Form::read(multipart).await?;
    get_json_result(documents.parse_files(form.files()?)?)
}

pub async fn set_meta(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(req): Json<Map<String, Value>>,
) -> ApiResult {
    require(&req, &["doc_id", "meta"])?;
    let meta = match req.get("meta") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    state
        .services
        .documents
        .set_meta(&user.id, &str_arg(&req, "doc_id"), &meta)
        .await?;
    get_json_result(true)
}
