use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::state::AppState;

pub async fn healthz(State(state): State<AppState>) -> Json<Value> {
    match state.catalog.ping().await {
        Ok(()) => Json(json!({"status": "ok"})),
        Err(err) => {
            tracing::warn!(error = %err, "catalog ping failed");
            Json(json!({"status": "error"}))
        }
    }
}
