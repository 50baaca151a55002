//! Router assembly. Four sub-routers (bare health check, public auth-path,
//! authenticated data-path, admin) each carry their own scoped middleware
//! before merging; global layers apply last so they wrap outermost.
//!
//! Layer order, outermost to innermost (last `.layer()` call wins the
//! outer position):
//!
//! 1. Panic recovery — must see every response, including ones a handler
//!    panicked producing.
//! 2. Request-id injection (`Set` then `Propagate`, so the id is minted
//!    before it is echoed back).
//! 3. Request tracing (`tower_http::trace`) — spans the whole request,
//!    including the layers inside it.
//! 4. Metrics counters.
//! 5. Whole-request timeout, standing in for the write/idle budget.
//! 6. Body size cap.
//! 7. CORS — admin sub-router only, and outer to its auth check so a
//!    preflight `OPTIONS` never reaches it.
//! 8. Pre-auth per-IP rate limit — the `/auth/*`/`/v1/auth/*` sub-router
//!    only, ahead of the handler entirely. `/healthz` sits in its own
//!    sub-router with no rate limiting, so a shared-IP load balancer's
//!    liveness probe never competes with login traffic for the same bucket.
//! 9. Auth (`require_principal`) — outer to the post-auth rate limit so a
//!    rejected request never counts against the per-key bucket.
//! 10. Post-auth per-key rate limit.

use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, StatusCode};
use axum::middleware::from_fn_with_state;
use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{admin, auth_flow, health, members, projects, sync};
use crate::middleware::auth::require_principal;
use crate::middleware::metrics::record_metrics;
use crate::middleware::rate_limit::{post_auth_key_limit, pre_auth_ip_limit};
use crate::request_id::MakeUuidRequestId;
use crate::state::AppState;

const REQUEST_ID_HEADER: &str = "x-request-id";
const BODY_LIMIT_BYTES: usize = 10 * 1024 * 1024;
const REQUEST_WRITE_TIMEOUT: Duration = Duration::from_secs(60);

/// Builds the full HTTP router.
#[must_use]
pub fn build_router(state: AppState) -> Router {
    let health = Router::new()
        .route("/healthz", get(health::healthz))
        .with_state(state.clone());

    let public = Router::new()
        .route("/v1/auth/login/start", post(auth_flow::login_start))
        .route("/v1/auth/login/poll", post(auth_flow::login_poll))
        .route(
            "/auth/verify",
            get(auth_flow::verify_form).post(auth_flow::verify_submit),
        )
        .layer(from_fn_with_state(state.clone(), pre_auth_ip_limit))
        .with_state(state.clone());

    let data = Router::new()
        .route(
            "/v1/projects",
            post(projects::create_project).get(projects::list_projects),
        )
        .route(
            "/v1/projects/{id}",
            get(projects::get_project)
                .patch(projects::update_project)
                .delete(projects::delete_project),
        )
        .route(
            "/v1/projects/{id}/members",
            post(members::add_member).get(members::list_members),
        )
        .route(
            "/v1/projects/{id}/members/{user_id}",
            patch(members::update_member_role).delete(members::remove_member),
        )
        .route("/v1/projects/{id}/sync/push", post(sync::push))
        .route("/v1/projects/{id}/sync/pull", get(sync::pull))
        .route("/v1/projects/{id}/sync/status", get(sync::status))
        .route("/v1/projects/{id}/sync/snapshot", get(sync::snapshot))
        .layer(from_fn_with_state(state.clone(), post_auth_key_limit))
        .layer(from_fn_with_state(state.clone(), require_principal))
        .with_state(state.clone());

    let admin = Router::new()
        .route("/v1/admin/server/overview", get(admin::server_overview))
        .route("/v1/admin/projects", get(admin::list_projects))
        .route(
            "/v1/admin/projects/{id}/events",
            get(admin::project_events),
        )
        .route(
            "/v1/admin/projects/{id}/snapshot/meta",
            get(admin::snapshot_meta),
        )
        .route(
            "/v1/admin/projects/{id}/snapshot/query",
            get(admin::snapshot_query),
        )
        .layer(from_fn_with_state(state.clone(), post_auth_key_limit))
        .layer(from_fn_with_state(state.clone(), require_principal))
        .layer(cors_layer(&state))
        .with_state(state.clone());

    let request_id_header = HeaderName::from_static(REQUEST_ID_HEADER);

    Router::new()
        .merge(health)
        .merge(public)
        .merge(data)
        .merge(admin)
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::GATEWAY_TIMEOUT,
            REQUEST_WRITE_TIMEOUT,
        ))
        .layer(from_fn_with_state(state.clone(), record_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(SetRequestIdLayer::new(request_id_header, MakeUuidRequestId))
        .layer(CatchPanicLayer::new())
}

fn cors_layer(state: &AppState) -> CorsLayer {
    let origins = &state.config.cors_allowed_origins;
    if origins.is_empty() {
        return CorsLayer::new();
    }
    let allowed: Vec<_> = origins
        .iter()
        .filter_map(|origin| axum::http::HeaderValue::from_str(origin).ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
}
