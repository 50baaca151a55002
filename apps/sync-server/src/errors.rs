//! Maps [`sync_db::DbError`] to [`sync_errors::AppError`] for handlers that
//! talk to the catalog store or a project's event-log pool directly rather
//! than through [`sync_projects::ProjectService`].

use sync_db::DbError;
use sync_errors::AppError;

pub fn map_db_error(err: DbError) -> AppError {
    match err {
        DbError::AlreadyExists(what) => AppError::bad_request(format!("already exists: {what}")),
        DbError::LastOwner => AppError::bad_request("project must keep at least one owner"),
        DbError::ProjectNotFound(_) => AppError::NotFound,
        DbError::Sql(err) => {
            tracing::warn!(error = %err, "store sql error");
            AppError::internal("store error")
        }
        DbError::Io(err) => {
            tracing::warn!(error = %err, "store io error");
            AppError::internal("store error")
        }
    }
}
