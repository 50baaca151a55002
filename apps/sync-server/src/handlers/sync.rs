//! `/v1/projects/{id}/sync/{push,pull,status,snapshot}` — the event-log
//! push/pull surface and the on-demand snapshot download.

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sync_db::{NewEvent, PushOutcome, ALLOWED_ENTITY_TYPES};
use sync_errors::AppError;
use sync_security::{Principal, Role};
use tokio_util::io::ReaderStream;

use crate::errors::map_db_error;
use crate::state::AppState;

const MAX_PUSH_BATCH: usize = 1000;
const DEFAULT_PULL_LIMIT: i64 = 1000;
const MAX_PULL_LIMIT: i64 = 10_000;

#[derive(Debug, Deserialize)]
pub struct PushEventRequest {
    pub client_action_id: i64,
    pub action_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub payload: serde_json::Value,
    pub client_ts: String,
}

#[derive(Debug, Deserialize)]
pub struct PushRequest {
    pub device_id: String,
    pub session_id: String,
    pub events: Vec<PushEventRequest>,
}

#[derive(Debug, Serialize)]
pub struct Ack {
    pub client_action_id: i64,
    pub server_seq: i64,
}

#[derive(Debug, Serialize)]
pub struct Rejected {
    pub client_action_id: i64,
    pub reason: &'static str,
    pub server_seq: i64,
}

#[derive(Debug, Serialize)]
pub struct PushResponse {
    pub accepted: usize,
    pub acks: Vec<Ack>,
    pub rejected: Vec<Rejected>,
}

pub async fn push(
    State(state): State<AppState>,
    principal: Principal,
    Path(project_id): Path<String>,
    Json(body): Json<PushRequest>,
) -> Result<Json<PushResponse>, AppError> {
    state
        .projects
        .authorize(&project_id, principal.user_id, Role::Writer)
        .await?;

    if body.device_id.trim().is_empty() || body.session_id.trim().is_empty() {
        return Err(AppError::bad_request(
            "device_id and session_id must not be empty",
        ));
    }
    if body.events.is_empty() {
        return Err(AppError::bad_request("events must not be empty"));
    }
    if body.events.len() > MAX_PUSH_BATCH {
        return Err(AppError::bad_request(format!(
            "batch exceeds max size of {MAX_PUSH_BATCH}"
        )));
    }

    let mut events = Vec::with_capacity(body.events.len());
    for event in &body.events {
        if !ALLOWED_ENTITY_TYPES.contains(&event.entity_type.as_str()) {
            return Err(AppError::bad_request(format!(
                "unknown entity type {:?}",
                event.entity_type
            )));
        }
        let client_ts: DateTime<Utc> = DateTime::parse_from_rfc3339(&event.client_ts)
            .map_err(|_| {
                AppError::bad_request(format!("invalid client_ts {:?}", event.client_ts))
            })?
            .with_timezone(&Utc);
        events.push(NewEvent {
            client_action_id: event.client_action_id,
            action_type: event.action_type.clone(),
            entity_type: event.entity_type.clone(),
            entity_id: event.entity_id.clone(),
            payload: event.payload.to_string(),
            client_ts,
        });
    }

    let project = state
        .project_pool
        .get(&project_id)
        .await
        .map_err(map_db_error)?;
    let result = project
        .push(&body.device_id, &body.session_id, &events)
        .await
        .map_err(map_db_error)?;

    let mut acks = Vec::new();
    let mut rejected = Vec::new();
    for outcome in result.outcomes {
        match outcome {
            PushOutcome::Accepted {
                client_action_id,
                server_seq,
            } => acks.push(Ack {
                client_action_id,
                server_seq,
            }),
            PushOutcome::Duplicate {
                client_action_id,
                server_seq,
            } => rejected.push(Rejected {
                client_action_id,
                reason: "duplicate",
                server_seq,
            }),
        }
    }
    state
        .metrics
        .record_push_accepted(u64::try_from(result.accepted).unwrap_or(u64::MAX));

    Ok(Json(PushResponse {
        accepted: result.accepted,
        acks,
        rejected,
    }))
}

#[derive(Debug, Deserialize)]
pub struct PullQuery {
    #[serde(default)]
    pub after_server_seq: i64,
    pub limit: Option<i64>,
    pub exclude_client: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PullResponse {
    pub events: Vec<sync_db::Event>,
    pub last_server_seq: i64,
    pub has_more: bool,
}

pub async fn pull(
    State(state): State<AppState>,
    principal: Principal,
    Path(project_id): Path<String>,
    Query(query): Query<PullQuery>,
) -> Result<Json<PullResponse>, AppError> {
    state
        .projects
        .authorize(&project_id, principal.user_id, Role::Reader)
        .await?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PULL_LIMIT)
        .clamp(1, MAX_PULL_LIMIT);
    let project = state
        .project_pool
        .get(&project_id)
        .await
        .map_err(map_db_error)?;
    let result = project
        .pull(query.after_server_seq, limit, query.exclude_client.as_deref())
        .await
        .map_err(map_db_error)?;
    state.metrics.record_pull();
    Ok(Json(PullResponse {
        events: result.events,
        last_server_seq: result.last_server_seq,
        has_more: result.has_more,
    }))
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub count: i64,
    pub max_server_seq: i64,
    pub latest_event_at: Option<DateTime<Utc>>,
}

pub async fn status(
    State(state): State<AppState>,
    principal: Principal,
    Path(project_id): Path<String>,
) -> Result<Json<StatusResponse>, AppError> {
    state
        .projects
        .authorize(&project_id, principal.user_id, Role::Reader)
        .await?;
    let project = state
        .project_pool
        .get(&project_id)
        .await
        .map_err(map_db_error)?;
    let result = project.status().await.map_err(map_db_error)?;
    Ok(Json(StatusResponse {
        count: result.count,
        max_server_seq: result.max_server_seq,
        latest_event_at: result.latest_event_at,
    }))
}

pub async fn snapshot(
    State(state): State<AppState>,
    principal: Principal,
    Path(project_id): Path<String>,
) -> Result<Response, AppError> {
    state
        .projects
        .authorize(&project_id, principal.user_id, Role::Reader)
        .await?;
    let project = state
        .project_pool
        .get(&project_id)
        .await
        .map_err(map_db_error)?;
    let path = state
        .snapshots
        .ensure_built(&project, &project_id)
        .await
        .map_err(AppError::from)?;
    let seq = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("0")
        .to_owned();
    let file = tokio::fs::File::open(&path).await.map_err(|err| {
        tracing::warn!(error = %err, "failed to open snapshot artifact");
        AppError::internal("snapshot store error")
    })?;
    let body = axum::body::Body::from_stream(ReaderStream::new(file));
    axum::http::Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-sqlite3")
        .header("x-snapshot-seq", seq)
        .body(body)
        .map_err(|_| AppError::internal("failed to build snapshot response"))
}
