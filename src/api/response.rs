//! The `{code, message, data}` envelope every JSON endpoint answers with.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::domain::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum RetCode {
    Success = 0,
    NotEffective = 10,
    ExceptionError = 100,
    ArgumentError = 101,
    DataError = 102,
    OperatingError = 103,
    ConnectionError = 105,
    Running = 106,
    PermissionError = 108,
    AuthenticationError = 109,
    Unauthorized = 401,
    Forbidden = 403,
    NotFound = 404,
    ServerError = 500,
}

impl RetCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// A failed request. Rendered with HTTP 200 unless `status` says otherwise.
#[derive(Debug)]
pub struct ApiError {
    pub code: RetCode,
    pub message: String,
    pub data: Value,
    pub status: StatusCode,
}

impl ApiError {
    pub fn new(code: RetCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: Value::Null,
            status: StatusCode::OK,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn data_error(message: impl Into<String>) -> Self {
        Self::new(RetCode::DataError, message)
    }

    pub fn argument_error(message: impl Into<String>) -> Self {
        Self::new(RetCode::ArgumentError, message)
    }

    /// Per-item failures collected by a bulk operation.
    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(RetCode::ServerError, message).with_data(json!(false))
    }

    pub fn unauthenticated() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            ..Self::new(RetCode::Unauthorized, "Unauthorized")
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::NotFound(m) | DomainError::Validation(m) | DomainError::Conflict(m) => {
                Self::data_error(m)
            }
            DomainError::InvalidArgument(m) => Self::argument_error(m),
            DomainError::NotPermitted(m) => Self::new(RetCode::OperatingError, m),
            DomainError::Unauthorized(m) | DomainError::Forbidden(m) => {
                Self::new(RetCode::AuthenticationError, m).with_data(json!(false))
            }
            other => {
                tracing::error!(error = %other, "request failed");
                Self::new(RetCode::ExceptionError, other.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "code": self.code.code(),
            "message": self.message,
            "data": self.data,
        });
        (self.status, Json(body)).into_response()
    }
}

pub type ApiResult = Result<Json<Value>, ApiError>;

pub fn get_json_result(data: impl Serialize) -> ApiResult {
    let data = serde_json::to_value(data).map_err(DomainError::from)?;
    Ok(Json(json!({
        "code": RetCode::Success.code(),
        "message": "success",
        "data": data,
    })))
}

/// Fails with every listed field the request lacks.
pub fn require(req: &Map<String, Value>, fields: &[&str]) -> Result<(), ApiError> {
    let missing: Vec<&str> = fields
        .iter()
        .copied()
        .filter(|f| !req.contains_key(*f))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(ApiError::argument_error(format!(
        "required argument are missing: {}; ",
        missing.join(",")
    )))
}

/// Rejects fields a client may not set.
pub fn not_allowed(req: &Map<String, Value>, fields: &[&str]) -> Result<(), ApiError> {
    match fields.iter().find(|f| req.contains_key(**f)) {
        Some(field) => Err(ApiError::argument_error(format!(
            "Parameter {field} isn't allowed"
        ))),
        None => Ok(()),
    }
}

/// The field as text: strings as-is, numbers and booleans printed, else empty.
pub fn str_arg(req: &Map<String, Value>, key: &str) -> String {
    match req.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// A single id or a list of ids.
pub fn ids_arg(req: &Map<String, Value>, key: &str) -> Vec<String> {
    match req.get(key) {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

/// Splits a comma separated query parameter.
pub fn split_ids(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
