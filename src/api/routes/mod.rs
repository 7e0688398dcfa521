pub mod chunk;
pub mod document;
pub mod file;
pub mod file2document;
pub mod health;
pub mod kb;
pub mod llm;
pub mod system;
pub mod tenant;
pub mod user;

use axum::extract::{DefaultBodyLimit, Multipart};
use axum::http::{header, Method};
use axum::{middleware, routing::get, Router};
use serde::Deserialize;
use std::collections::HashMap;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::middleware::{request_logger, require_user};
use crate::api::response::ApiError;
use crate::api::state::AppState;
use crate::application::{PageQuery, UploadedFile};

pub fn create_router(state: AppState) -> Router {
    let cors = build_cors(&state.config.config.cors.allowed_origins);
    let body_limit = state.config.config.server.max_content_length;

    let protected = Router::new()
        .merge(user::protected_routes())
        .nest("/system", system::routes())
        .nest("/tenant", tenant::routes())
        .nest("/kb", kb::routes())
        .nest("/document", document::routes())
        .nest("/file2document", file2document::routes())
        .nest("/file", file::routes())
        .nest("/llm", llm::routes())
        .nest("/chunk", chunk::routes())
        .route_layer(middleware::from_fn_with_state(state.clone(), require_user));

    let v1 = Router::new()
        .merge(user::public_routes())
        .merge(document::public_routes())
        .merge(protected);

    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .nest("/v1", v1)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(request_logger))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}

fn build_cors(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        cors.allow_origin(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        cors.allow_origin(origins)
    }
}

/// `page`, `page_size`, `orderby` and `desc` as list endpoints take them.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub keywords: Option<String>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
    pub orderby: Option<String>,
    pub desc: Option<String>,
}

impl ListParams {
    pub fn keywords(&self) -> &str {
        self.keywords.as_deref().unwrap_or_default()
    }

    pub fn page_query(&self, default_page_size: usize) -> PageQuery {
        let desc = self
            .desc
            .as_deref()
            .is_none_or(|d| !matches!(d.to_lowercase().as_str(), "false" | "0" | ""));
        PageQuery::new(
            self.page.unwrap_or(1),
            self.page_size.unwrap_or(default_page_size),
            self.orderby.clone().unwrap_or_else(|| "create_time".to_string()),
            desc,
        )
    }
}

/// A decoded multipart body: plain fields plus the parts sent as `file`.
#[derive(Debug, Default)]
pub struct Form {
    pub fields: HashMap<String, String>,
    pub files: Vec<UploadedFile>,
    /// Whether any `file` part was present, even with an empty name.
    pub has_file_part: bool,
}

impl Form {
    pub async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = Form::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::argument_error(e.to_string()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if name == "file" {
                form.has_file_part = true;
                let filename = field.file_name().unwrap_or_default().to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::argument_error(e.to_string()))?;
                form.files.push(UploadedFile::new(filename, data.to_vec()));
            } else {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::argument_error(e.to_string()))?;
                form.fields.insert(name, text);
            }
        }
        Ok(form)
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// The uploaded files, rejecting requests without any or with a nameless one.
    pub fn files(&self) -> Result<&[UploadedFile], ApiError> {
        if !self.has_file_part {
            return Err(ApiError::argument_error("No file part!"));
        }
        if self.files.iter().any(|f| f.filename.is_empty()) {
            return Err(ApiError::argument_error("No file selected!"));
        }
        Ok(&self.files)
    }
}
