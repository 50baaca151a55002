//! Resolves the bearer token on protected routes into a [`sync_security::Principal`]
//! and stashes it in request extensions for downstream extraction.

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request};
use axum::middleware::Next;
use axum::response::Response;
use sync_errors::AppError;

use crate::state::AppState;

pub async fn require_principal(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    let principal = state.auth_gate.resolve(header.as_deref()).await?;
    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}
