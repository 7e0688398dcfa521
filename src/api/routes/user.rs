use axum::{
    extract::State,
    routing::{get, post},
    Extension, Json, Router,
};
use regex::Regex;
use serde_json::{json, Map, Value};
use std::sync::LazyLock;

use crate::api::middleware::CurrentUser;
use crate::api::response::{get_json_result, require, str_arg, ApiError, ApiResult};
use crate::api::state::AppState;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\w._-]+@([\w_-]+\.)+[\w-]{2,5}$").expect("static regex")
});

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/user/register", post(register))
        .route("/user/login", post(login))
}

pub fn protected_routes() -> Router<AppState> {
    Router::new().route("/user/info", get(info))
}

fn with_token(mut profile: Value, token: String) -> Value {
    profile["access_token"] = json!(token);
    profile
}

pub async fn register(State(state): State<AppState>, Json(req): Json<Map<String, Value>>) -> ApiResult {
    require(&req, &["email", "password", "nickname"])?;
    let email = str_arg(&req, "email");
    if !EMAIL_RE.is_match(&email) {
        return Err(ApiError::data_error(format!("Invalid email address: {email}!")));
    }

    let users = &state.services.users;
    let user = users
        .register(&email, &str_arg(&req, "password"), &str_arg(&req, "nickname"))
        .await?;
    let token = users.issue_token(&user.id)?;
    get_json_result(with_token(user.profile(), token))
}

pub async fn login(State(state): State<AppState>, Json(req): Json<Map<String, Value>>) -> ApiResult {
    require(&req, &["email", "password"])?;
    let (token, profile) = state
        .services
        .users
        .login(&str_arg(&req, "email"), &str_arg(&req, "password"))
        .await?;
    get_json_result(with_token(profile, token))
}

pub async fn info(State(state): State<AppState>, Extension(CurrentUser(user)): Extension<CurrentUser>) -> ApiResult {
    get_json_result(state.services.users.info(&user.id).await?)
}
