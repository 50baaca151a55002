//! Shared application state, cloned (cheaply, behind `Arc`s) into every
//! handler and middleware via axum's `State` extractor.

use std::sync::Arc;

use sync_auth::{AuthGate, DeviceAuthService};
use sync_db::{CatalogStore, ProjectDbPool};
use sync_projects::ProjectService;
use sync_ratelimit::RateLimiter;
use sync_snapshot::SnapshotEngine;

use crate::config::AppConfig;
use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub catalog: Arc<CatalogStore>,
    pub project_pool: Arc<ProjectDbPool>,
    pub projects: ProjectService,
    pub snapshots: Arc<SnapshotEngine>,
    pub rate_limiter: Arc<RateLimiter>,
    pub device_auth: Arc<DeviceAuthService>,
    pub auth_gate: Arc<AuthGate>,
    pub metrics: Arc<Metrics>,
}
