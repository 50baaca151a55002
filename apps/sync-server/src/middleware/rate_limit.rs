//! Pre-auth (IP-keyed) and post-auth (API-key-keyed) fixed-window admission.
//!
//! Rejections are recorded as rate-limit-violation observability events,
//! converting from the in-memory [`sync_ratelimit::EndpointClass`] to the
//! persisted [`sync_db::EndpointClass`] (distinct types, same variants).

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use sync_errors::AppError;
use sync_ratelimit::{ip_key, key_key, EndpointClass};
use sync_security::Principal;

use crate::state::AppState;

pub async fn pre_auth_ip_limit(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let limit = state.config.rate_limit.limit_for(EndpointClass::Auth);
    let key = ip_key(&addr.ip().to_string());
    if state.rate_limiter.check(&key, limit) {
        Ok(next.run(req).await)
    } else {
        record_violation(&state, &key, EndpointClass::Auth).await;
        Err(AppError::RateLimited)
    }
}

pub async fn post_auth_key_limit(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let principal = req
        .extensions()
        .get::<Principal>()
        .cloned()
        .ok_or(AppError::Unauthorized)?;
    let class = classify(req.uri().path());
    let limit = state.config.rate_limit.limit_for(class);
    let key = key_key(&principal.key_id.to_string(), limit);
    if state.rate_limiter.check(&key, limit) {
        Ok(next.run(req).await)
    } else {
        record_violation(&state, &key, class).await;
        Err(AppError::RateLimited)
    }
}

fn classify(path: &str) -> EndpointClass {
    if path.ends_with("/sync/push") {
        EndpointClass::Push
    } else if path.ends_with("/sync/pull") {
        EndpointClass::Pull
    } else {
        EndpointClass::Other
    }
}

async fn record_violation(state: &AppState, principal_key: &str, class: EndpointClass) {
    let db_class = match class {
        EndpointClass::Auth => sync_db::EndpointClass::Auth,
        EndpointClass::Push => sync_db::EndpointClass::Push,
        EndpointClass::Pull => sync_db::EndpointClass::Pull,
        EndpointClass::Other => sync_db::EndpointClass::Other,
    };
    if let Err(err) = state
        .catalog
        .record_rate_limit_event(principal_key, db_class)
        .await
    {
        tracing::warn!(error = %err, "failed to record rate-limit violation event");
    }
}
