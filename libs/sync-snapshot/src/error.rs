use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("no events")]
    NoEvents,

    #[error("snapshot unavailable")]
    Unavailable,

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error(transparent)]
    Sql(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Db(#[from] sync_db::DbError),
}

impl From<SnapshotError> for sync_errors::AppError {
    fn from(err: SnapshotError) -> Self {
        match err {
            SnapshotError::NoEvents => Self::NoEvents,
            SnapshotError::Unavailable => Self::SnapshotUnavailable,
            SnapshotError::InvalidQuery(msg) => Self::invalid_query(msg),
            SnapshotError::Sql(err) => {
                tracing::warn!(error = %err, "snapshot sql error");
                Self::internal("snapshot store error")
            }
            SnapshotError::Io(err) => {
                tracing::warn!(error = %err, "snapshot io error");
                Self::internal("snapshot store error")
            }
            SnapshotError::Db(err) => {
                tracing::warn!(error = %err, "snapshot catalog error");
                Self::internal("snapshot store error")
            }
        }
    }
}
