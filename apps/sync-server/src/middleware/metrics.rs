//! Records every response's status class against the process-wide counters.

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

use crate::state::AppState;

pub async fn record_metrics(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    let response = next.run(req).await;
    state.metrics.record_request(response.status());
    response
}
