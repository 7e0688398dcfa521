use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::api::response::ApiError;
use crate::api::state::AppState;
use crate::domain::User;

/// The authenticated caller, set by [`require_user`].
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

fn bearer(request: &Request) -> Option<&str> {
    let value = request.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .unwrap_or(value)
        .trim();
    (!token.is_empty()).then_some(token)
}

/// Resolves `Authorization: Bearer <jwt | api token>` to a user, or answers 401.
pub async fn require_user(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let Some(token) = bearer(&request) else {
        return ApiError::unauthenticated().into_response();
    };

    match state.services.users.authenticate(token).await {
        Ok(user) => {
            request.extensions_mut().insert(CurrentUser(user));
            next.run(request).await
        }
        Err(e) => {
            tracing::debug!(error = %e, "authentication rejected");
            ApiError::unauthenticated().into_response()
        }
    }
}
