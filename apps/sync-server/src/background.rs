//! Periodic sweeps: expired device-auth requests, stale rate-limit buckets,
//! and observability-event retention. Each runs on its own ticker,
//! cooperatively cancelled via `CancellationToken` at shutdown.

use std::sync::Arc;
use std::time::Duration;

use sync_auth::DeviceAuthService;
use sync_db::CatalogStore;
use sync_ratelimit::RateLimiter;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
const RATE_LIMIT_BUCKET_MAX_AGE: Duration = Duration::from_secs(2 * 60);
const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

pub fn spawn_device_auth_sweep(
    device_auth: Arc<DeviceAuthService>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match device_auth.sweep_expired().await {
                        Ok(count) if count > 0 => {
                            tracing::debug!(count, "swept expired device-auth requests");
                        }
                        Ok(_) => {}
                        Err(err) => tracing::warn!(error = %err, "device-auth sweep failed"),
                    }
                }
            }
        }
    })
}

pub fn spawn_rate_limit_gc(limiter: Arc<RateLimiter>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = limiter.evict_older_than(RATE_LIMIT_BUCKET_MAX_AGE);
                    if evicted > 0 {
                        tracing::debug!(evicted, "evicted stale rate-limit buckets");
                    }
                }
            }
        }
    })
}

pub fn spawn_observability_retention(
    catalog: Arc<CatalogStore>,
    auth_retention: chrono::Duration,
    rate_limit_retention: chrono::Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RETENTION_SWEEP_INTERVAL);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = catalog.cleanup_auth_events(auth_retention).await {
                        tracing::warn!(error = %err, "auth-event retention cleanup failed");
                    }
                    if let Err(err) = catalog.cleanup_rate_limit_events(rate_limit_retention).await {
                        tracing::warn!(error = %err, "rate-limit-event retention cleanup failed");
                    }
                }
            }
        }
    })
}
