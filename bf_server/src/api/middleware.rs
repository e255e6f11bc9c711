//! Gateway authentication middleware.
//!
//! Extracts the signed bearer token from the HTTP-only `token` cookie and
//! injects the authenticated user id into request extensions. Requests
//! without a token stop with 401, invalid tokens with 403 — both carrying
//! the usual `{error, title}` body.

use axum::{
    Json,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::auth::token_from_headers;

use super::{AppState, AuthUser};

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = token_from_headers(request.headers()) else {
        return error_response(StatusCode::UNAUTHORIZED, "No token provided");
    };

    match state.tokens.verify(&token) {
        Ok(user_id) => {
            request.extensions_mut().insert(AuthUser(user_id));
            next.run(request).await
        }
        Err(_) => error_response(StatusCode::FORBIDDEN, "Invalid token"),
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    let body = json!({
        "error": message,
        "title": "Authentication Error",
    });
    (status, Json(body)).into_response()
}
