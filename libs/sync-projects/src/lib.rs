//! Project and membership business logic: creation, role authorization, and
//! the last-owner invariant, layered over the catalog store.

mod ids;

use std::sync::Arc;

use sync_db::{CatalogStore, DbError, Membership, Project, RoleRow};
use sync_errors::AppError;
use sync_security::Role;
use uuid::Uuid;

pub use ids::new_project_id;

#[derive(Clone)]
pub struct ProjectService {
    catalog: Arc<CatalogStore>,
}

impl ProjectService {
    #[must_use]
    pub fn new(catalog: Arc<CatalogStore>) -> Self {
        Self { catalog }
    }

    #[tracing::instrument(skip(self))]
    pub async fn create_project(
        &self,
        owner_user_id: Uuid,
        name: &str,
        description: Option<&str>,
    ) -> Result<Project, AppError> {
        if name.trim().is_empty() {
            return Err(AppError::bad_request("project name must not be empty"));
        }
        let id = new_project_id();
        self.catalog
            .create_project(&id, name, description, owner_user_id)
            .await
            .map_err(db_error_to_app)
    }

    pub async fn list_projects(&self, user_id: Uuid) -> Result<Vec<Project>, AppError> {
        self.catalog
            .list_projects_for_user(user_id)
            .await
            .map_err(db_error_to_app)
    }

    pub async fn update_project(
        &self,
        project_id: &str,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Project, AppError> {
        self.catalog
            .update_project(project_id, name, description)
            .await
            .map_err(db_error_to_app)?
            .ok_or(AppError::NotFound)
    }

    pub async fn soft_delete_project(&self, project_id: &str) -> Result<(), AppError> {
        let deleted = self
            .catalog
            .soft_delete_project(project_id)
            .await
            .map_err(db_error_to_app)?;
        if deleted {
            Ok(())
        } else {
            Err(AppError::NotFound)
        }
    }

    pub async fn add_member(
        &self,
        project_id: &str,
        user_id: Uuid,
        role: Role,
    ) -> Result<Membership, AppError> {
        self.catalog
            .add_membership(project_id, user_id, role.into())
            .await
            .map_err(db_error_to_app)
    }

    pub async fn list_members(&self, project_id: &str) -> Result<Vec<Membership>, AppError> {
        self.catalog
            .list_memberships(project_id)
            .await
            .map_err(db_error_to_app)
    }

    pub async fn update_member_role(
        &self,
        project_id: &str,
        user_id: Uuid,
        role: Role,
    ) -> Result<Membership, AppError> {
        self.catalog
            .update_membership_role(project_id, user_id, role.into())
            .await
            .map_err(db_error_to_app)?
            .ok_or(AppError::NotFound)
    }

    pub async fn remove_member(&self, project_id: &str, user_id: Uuid) -> Result<(), AppError> {
        let removed = self
            .catalog
            .remove_membership(project_id, user_id)
            .await
            .map_err(db_error_to_app)?;
        if removed {
            Ok(())
        } else {
            Err(AppError::NotFound)
        }
    }

    /// Loads the project and confirms the caller's membership satisfies
    /// `required`. Soft-deleted projects reject every non-admin op with
    /// `project_deleted` rather than `not_found`, since the caller's
    /// membership (and thus their right to know the project once existed)
    /// is still intact.
    ///
    /// # Errors
    ///
    /// `not_found` if the project never existed; `project_deleted` if it was
    /// soft-deleted; `forbidden` if the caller has no membership or an
    /// insufficient role.
    pub async fn authorize(
        &self,
        project_id: &str,
        user_id: Uuid,
        required: Role,
    ) -> Result<Project, AppError> {
        let project = self
            .catalog
            .get_project(project_id, true)
            .await
            .map_err(db_error_to_app)?
            .ok_or(AppError::NotFound)?;
        let membership = self
            .catalog
            .get_membership(project_id, user_id)
            .await
            .map_err(db_error_to_app)?
            .ok_or(AppError::Forbidden)?;
        if project.is_deleted() {
            return Err(AppError::ProjectDeleted);
        }
        let role: Role = membership.role.into();
        if !role.satisfies(required) {
            return Err(AppError::Forbidden);
        }
        Ok(project)
    }
}

fn db_error_to_app(err: DbError) -> AppError {
    match err {
        DbError::AlreadyExists(what) => AppError::bad_request(format!("already exists: {what}")),
        DbError::LastOwner => AppError::bad_request("project must keep at least one owner"),
        DbError::ProjectNotFound(_) => AppError::NotFound,
        DbError::Sql(err) => {
            tracing::warn!(error = %err, "catalog sql error");
            AppError::internal("catalog store error")
        }
        DbError::Io(err) => {
            tracing::warn!(error = %err, "catalog io error");
            AppError::internal("catalog store error")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_db::CatalogStore;

    async fn service() -> (ProjectService, Uuid) {
        let dir = tempfile::tempdir().unwrap();
        let catalog = CatalogStore::open(&dir.path().join("server.db")).await.unwrap();
        let owner = catalog.create_user("owner@example.com").await.unwrap();
        (ProjectService::new(Arc::new(catalog)), owner.id)
    }

    #[tokio::test]
    async fn authorize_allows_sufficient_role() {
        let (svc, owner) = service().await;
        let project = svc.create_project(owner, "Demo", None).await.unwrap();
        assert!(svc.authorize(&project.id, owner, Role::Reader).await.is_ok());
        assert!(svc.authorize(&project.id, owner, Role::Owner).await.is_ok());
    }

    #[tokio::test]
    async fn authorize_rejects_non_member() {
        let (svc, owner) = service().await;
        let project = svc.create_project(owner, "Demo", None).await.unwrap();
        let stranger = Uuid::new_v4();
        let err = svc
            .authorize(&project.id, stranger, Role::Reader)
            .await
            .unwrap_err();
        assert_eq!(err, AppError::Forbidden);
    }

    #[tokio::test]
    async fn authorize_rejects_soft_deleted_project_for_its_own_member() {
        let (svc, owner) = service().await;
        let project = svc.create_project(owner, "Demo", None).await.unwrap();
        svc.soft_delete_project(&project.id).await.unwrap();
        let err = svc
            .authorize(&project.id, owner, Role::Reader)
            .await
            .unwrap_err();
        assert_eq!(err, AppError::ProjectDeleted);
    }

    #[tokio::test]
    async fn removing_last_owner_is_rejected() {
        let (svc, owner) = service().await;
        let project = svc.create_project(owner, "Demo", None).await.unwrap();
        let err = svc.remove_member(&project.id, owner).await.unwrap_err();
        assert_eq!(err.code(), "bad_request");
    }
}
