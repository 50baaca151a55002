use thiserror::Error;

/// Errors surfaced by the catalog store and project DB pool.
///
/// Not-found is deliberately *not* a variant here: lookups return
/// `Option`/empty collections, and only genuine failures (I/O, constraint
/// violations, pool exhaustion) become a `DbError`.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("last owner: project must keep at least one owner")]
    LastOwner,

    #[error("project database not found for {0}")]
    ProjectNotFound(String),

    #[error(transparent)]
    Sql(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DbError {
    #[must_use]
    pub fn is_unique_violation(err: &sqlx::Error) -> bool {
        matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
    }
}
