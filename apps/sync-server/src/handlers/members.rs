//! `/v1/projects/{id}/members`. Every route requires `Owner`, except listing
//! which only requires `Reader`.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use sync_db::Membership;
use sync_errors::AppError;
use sync_security::{Principal, Role};
use uuid::Uuid;

use crate::errors::map_db_error;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub user_id: Option<Uuid>,
    pub email: Option<String>,
    pub role: Role,
}

pub async fn add_member(
    State(state): State<AppState>,
    principal: Principal,
    Path(project_id): Path<String>,
    Json(body): Json<AddMemberRequest>,
) -> Result<Json<Membership>, AppError> {
    state
        .projects
        .authorize(&project_id, principal.user_id, Role::Owner)
        .await?;
    let user_id = resolve_user_id(&state, body.user_id, body.email.as_deref()).await?;
    let membership = state.projects.add_member(&project_id, user_id, body.role).await?;
    Ok(Json(membership))
}

async fn resolve_user_id(
    state: &AppState,
    user_id: Option<Uuid>,
    email: Option<&str>,
) -> Result<Uuid, AppError> {
    if let Some(id) = user_id {
        return Ok(id);
    }
    let email = email.ok_or_else(|| AppError::bad_request("user_id or email is required"))?;
    let user = state
        .catalog
        .get_user_by_email(email)
        .await
        .map_err(map_db_error)?
        .ok_or(AppError::NotFound)?;
    Ok(user.id)
}

pub async fn list_members(
    State(state): State<AppState>,
    principal: Principal,
    Path(project_id): Path<String>,
) -> Result<Json<Vec<Membership>>, AppError> {
    state
        .projects
        .authorize(&project_id, principal.user_id, Role::Reader)
        .await?;
    Ok(Json(state.projects.list_members(&project_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct UpdateMemberRoleRequest {
    pub role: Role,
}

pub async fn update_member_role(
    State(state): State<AppState>,
    principal: Principal,
    Path((project_id, user_id)): Path<(String, Uuid)>,
    Json(body): Json<UpdateMemberRoleRequest>,
) -> Result<Json<Membership>, AppError> {
    state
        .projects
        .authorize(&project_id, principal.user_id, Role::Owner)
        .await?;
    let membership = state
        .projects
        .update_member_role(&project_id, user_id, body.role)
        .await?;
    Ok(Json(membership))
}

pub async fn remove_member(
    State(state): State<AppState>,
    principal: Principal,
    Path((project_id, user_id)): Path<(String, Uuid)>,
) -> Result<StatusCode, AppError> {
    state
        .projects
        .authorize(&project_id, principal.user_id, Role::Owner)
        .await?;
    state.projects.remove_member(&project_id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
