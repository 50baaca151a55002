//! `/v1/admin/*` — the read-only operator surface, gated on the admin flag
//! plus a specific [`Scope::AdminRead`] per resource rather than on project
//! membership.

use axum::extract::{Path, Query, State};
use axum::Json;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sync_auth::require_admin_scope;
use sync_db::{EventFilter, Project};
use sync_errors::AppError;
use sync_security::{AdminResource, Principal, Scope};
use sync_snapshot::{QueryPage, SnapshotMeta};

use crate::errors::map_db_error;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ServerOverview {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub total_requests: u64,
    pub responses_5xx: u64,
    pub responses_4xx: u64,
    pub push_events_accepted: u64,
    pub pull_requests: u64,
    pub user_count: i64,
    pub admin_count: i64,
    pub project_count: i64,
}

pub async fn server_overview(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<ServerOverview>, AppError> {
    require_admin_scope(&principal, Scope::AdminRead(AdminResource::Server))?;
    let metrics = state.metrics.snapshot();
    let status = if state.catalog.ping().await.is_ok() {
        "ok"
    } else {
        "error"
    };
    let user_count = state.catalog.count_users().await.map_err(map_db_error)?;
    let admin_count = state.catalog.count_admins().await.map_err(map_db_error)?;
    let project_count = state.catalog.count_projects().await.map_err(map_db_error)?;
    Ok(Json(ServerOverview {
        status,
        uptime_secs: metrics.uptime_secs,
        total_requests: metrics.total_requests,
        responses_5xx: metrics.responses_5xx,
        responses_4xx: metrics.responses_4xx,
        push_events_accepted: metrics.push_events_accepted,
        pull_requests: metrics.pull_requests,
        user_count,
        admin_count,
        project_count,
    }))
}

#[derive(Debug, Deserialize)]
pub struct AdminProjectsQuery {
    pub cursor: Option<String>,
    pub limit: Option<i64>,
    #[serde(default)]
    pub include_deleted: bool,
}

#[derive(Debug, Serialize)]
pub struct AdminProjectsPage {
    pub projects: Vec<Project>,
    pub next_cursor: Option<String>,
}

pub async fn list_projects(
    State(state): State<AppState>,
    principal: Principal,
    Query(query): Query<AdminProjectsQuery>,
) -> Result<Json<AdminProjectsPage>, AppError> {
    require_admin_scope(&principal, Scope::AdminRead(AdminResource::Projects))?;
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let after_id = query
        .cursor
        .as_deref()
        .map(decode_project_cursor)
        .transpose()?;
    let projects = state
        .catalog
        .list_projects_admin(after_id.as_deref(), limit, query.include_deleted)
        .await
        .map_err(map_db_error)?;
    let next_cursor = if i64::try_from(projects.len()).unwrap_or(0) == limit {
        projects.last().map(|p| encode_project_cursor(&p.id))
    } else {
        None
    };
    Ok(Json(AdminProjectsPage {
        projects,
        next_cursor,
    }))
}

fn encode_project_cursor(id: &str) -> String {
    URL_SAFE_NO_PAD.encode(id)
}

fn decode_project_cursor(token: &str) -> Result<String, AppError> {
    let raw = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| AppError::invalid_query("malformed cursor"))?;
    String::from_utf8(raw).map_err(|_| AppError::invalid_query("malformed cursor"))
}

#[derive(Debug, Deserialize)]
pub struct AdminEventsQuery {
    pub entity_type: Option<String>,
    pub action_type: Option<String>,
    pub device_id: Option<String>,
    pub session_id: Option<String>,
    pub entity_id: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub after_seq: Option<i64>,
    pub limit: Option<i64>,
}

pub async fn project_events(
    State(state): State<AppState>,
    principal: Principal,
    Path(project_id): Path<String>,
    Query(query): Query<AdminEventsQuery>,
) -> Result<Json<Vec<sync_db::Event>>, AppError> {
    require_admin_scope(&principal, Scope::AdminRead(AdminResource::Events))?;
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let from = query.from.as_deref().map(parse_admin_timestamp).transpose()?;
    let to = query.to.as_deref().map(parse_admin_timestamp).transpose()?;
    let filter = EventFilter {
        entity_type: query.entity_type,
        action_type: query.action_type,
        device_id: query.device_id,
        session_id: query.session_id,
        entity_id: query.entity_id,
        from,
        to,
        after_seq: query.after_seq,
        limit,
    };
    let project = state
        .project_pool
        .get(&project_id)
        .await
        .map_err(map_db_error)?;
    let events = project.query_admin(&filter).await.map_err(map_db_error)?;
    Ok(Json(events))
}

fn parse_admin_timestamp(raw: &str) -> Result<DateTime<Utc>, AppError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|_| AppError::bad_request(format!("invalid timestamp {raw:?}")))
}

pub async fn snapshot_meta(
    State(state): State<AppState>,
    principal: Principal,
    Path(project_id): Path<String>,
) -> Result<Json<SnapshotMeta>, AppError> {
    require_admin_scope(&principal, Scope::AdminRead(AdminResource::Snapshots))?;
    let project = state
        .project_pool
        .get(&project_id)
        .await
        .map_err(map_db_error)?;
    let meta = state
        .snapshots
        .meta(&project, &project_id)
        .await
        .map_err(AppError::from)?;
    Ok(Json(meta))
}

#[derive(Debug, Deserialize)]
pub struct SnapshotQueryParams {
    pub q: Option<String>,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

pub async fn snapshot_query(
    State(state): State<AppState>,
    principal: Principal,
    Path(project_id): Path<String>,
    Query(query): Query<SnapshotQueryParams>,
) -> Result<Json<QueryPage>, AppError> {
    require_admin_scope(&principal, Scope::AdminRead(AdminResource::Snapshots))?;
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let project = state
        .project_pool
        .get(&project_id)
        .await
        .map_err(map_db_error)?;
    let page = state
        .snapshots
        .query(
            &project,
            &project_id,
            query.q.as_deref(),
            query.cursor.as_deref(),
            limit,
        )
        .await
        .map_err(AppError::from)?;
    Ok(Json(page))
}
