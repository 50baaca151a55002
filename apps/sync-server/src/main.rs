//! Process entry point: load config, wire up state, serve HTTP, and drain
//! background tasks on shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use sync_auth::{AuthGate, DeviceAuthService};
use sync_db::{CatalogStore, ProjectDbPool};
use sync_projects::ProjectService;
use sync_ratelimit::RateLimiter;
use sync_server::config::{AppConfig, LogFormat};
use sync_server::metrics::Metrics;
use sync_server::state::AppState;
use sync_server::{background, router};
use sync_snapshot::{GenericEntityApplier, SnapshotEngine};
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env().context("loading configuration")?;
    init_tracing(&config);

    let catalog = Arc::new(
        CatalogStore::open(&config.server_db_path)
            .await
            .context("opening catalog store")?,
    );
    let project_pool = Arc::new(ProjectDbPool::new(config.project_data_dir.clone()));
    let projects = ProjectService::new(catalog.clone());
    let snapshots = Arc::new(SnapshotEngine::new(
        config.project_data_dir.clone(),
        Arc::new(GenericEntityApplier),
    ));
    let rate_limiter = Arc::new(RateLimiter::new());
    let device_auth = Arc::new(DeviceAuthService::new(
        catalog.clone(),
        config.base_url.clone(),
        config.allow_signup,
    ));
    let auth_gate = Arc::new(AuthGate::new(catalog.clone()));
    let metrics = Arc::new(Metrics::new());

    let state = AppState {
        config: Arc::new(config.clone()),
        catalog: catalog.clone(),
        project_pool: project_pool.clone(),
        projects,
        snapshots,
        rate_limiter: rate_limiter.clone(),
        device_auth: device_auth.clone(),
        auth_gate,
        metrics,
    };

    let cancel = CancellationToken::new();
    let auth_retention = chrono::Duration::from_std(config.auth_event_retention)
        .unwrap_or_else(|_| chrono::Duration::days(90));
    let rate_limit_retention = chrono::Duration::from_std(config.rate_limit_event_retention)
        .unwrap_or_else(|_| chrono::Duration::days(30));
    let background_tasks = vec![
        background::spawn_device_auth_sweep(device_auth, cancel.clone()),
        background::spawn_rate_limit_gc(rate_limiter, cancel.clone()),
        background::spawn_observability_retention(
            catalog,
            auth_retention,
            rate_limit_retention,
            cancel.clone(),
        ),
    ];

    let app = router::build_router(state);
    let addr: SocketAddr = config.socket_addr().context("resolving listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "sync-server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("serving HTTP")?;

    tracing::info!("shutting down, draining background tasks");
    cancel.cancel();
    let drain = futures_join_all(background_tasks);
    if tokio::time::timeout(config.shutdown_timeout, drain)
        .await
        .is_err()
    {
        tracing::warn!("background tasks did not drain within the shutdown timeout");
    }
    project_pool.close_all().await;

    Ok(())
}

async fn futures_join_all(tasks: Vec<tokio::task::JoinHandle<()>>) {
    for task in tasks {
        if let Err(err) = task.await {
            tracing::warn!(error = %err, "background task panicked");
        }
    }
}

fn init_tracing(config: &AppConfig) {
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => tracing::error!(error = %err, "failed to install SIGTERM handler"),
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
