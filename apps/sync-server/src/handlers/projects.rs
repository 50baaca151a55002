//! `/v1/projects` CRUD: creation provisions both the catalog row and the
//! project's event-log database file, since [`sync_db::ProjectDbPool::get`]
//! refuses to open a file that was never created.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use sync_db::Project;
use sync_errors::AppError;
use sync_security::{Principal, Role};

use crate::errors::map_db_error;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub description: Option<String>,
}

pub async fn create_project(
    State(state): State<AppState>,
    principal: Principal,
    Json(body): Json<CreateProjectRequest>,
) -> Result<Json<Project>, AppError> {
    let project = state
        .projects
        .create_project(principal.user_id, &body.name, body.description.as_deref())
        .await?;
    state
        .project_pool
        .create(&project.id)
        .await
        .map_err(map_db_error)?;
    Ok(Json(project))
}

pub async fn list_projects(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<Vec<Project>>, AppError> {
    Ok(Json(state.projects.list_projects(principal.user_id).await?))
}

pub async fn get_project(
    State(state): State<AppState>,
    principal: Principal,
    Path(project_id): Path<String>,
) -> Result<Json<Project>, AppError> {
    let project = state
        .projects
        .authorize(&project_id, principal.user_id, Role::Reader)
        .await?;
    Ok(Json(project))
}

#[derive(Debug, Deserialize)]
pub struct UpdateProjectRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

pub async fn update_project(
    State(state): State<AppState>,
    principal: Principal,
    Path(project_id): Path<String>,
    Json(body): Json<UpdateProjectRequest>,
) -> Result<Json<Project>, AppError> {
    state
        .projects
        .authorize(&project_id, principal.user_id, Role::Writer)
        .await?;
    let project = state
        .projects
        .update_project(&project_id, body.name.as_deref(), body.description.as_deref())
        .await?;
    Ok(Json(project))
}

pub async fn delete_project(
    State(state): State<AppState>,
    principal: Principal,
    Path(project_id): Path<String>,
) -> Result<StatusCode, AppError> {
    state
        .projects
        .authorize(&project_id, principal.user_id, Role::Owner)
        .await?;
    state.projects.soft_delete_project(&project_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
