//! Catalog store and per-project event-log database pool.
//!
//! Two SQLite layers: [`CatalogStore`] owns the process-wide catalog
//! (`server.db`), and [`ProjectDbPool`] lazily opens one event-log database
//! per project (`<data>/projects/<id>/events.db`). Both follow a
//! single-writer-per-file discipline with WAL journaling.

mod catalog;
mod error;
mod models;
mod project_pool;

pub use catalog::CatalogStore;
pub use error::DbError;
pub use models::{
    ApiKey, AuthEvent, DeviceAuthRequest, DeviceAuthStatus, EndpointClass, Event, Membership,
    NewApiKey, Project, RateLimitEvent, RoleRow, SyncCursor, User, ALLOWED_ENTITY_TYPES,
};
pub use project_pool::{
    EventFilter, NewEvent, ProjectDbPool, ProjectHandle, PullResult, PushOutcome, PushResult,
    StatusResult,
};
