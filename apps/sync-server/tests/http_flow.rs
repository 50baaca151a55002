//! End-to-end HTTP coverage: device-code login, project/role enforcement,
//! push/pull, snapshot download, and the admin scope gate — all driven
//! against the in-process router via `tower::ServiceExt::oneshot`.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::connect_info::ConnectInfo;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use sync_auth::{AuthGate, DeviceAuthService};
use sync_db::{CatalogStore, ProjectDbPool};
use sync_projects::ProjectService;
use sync_ratelimit::RateLimiter;
use sync_server::config::{AppConfig, LogFormat};
use sync_server::metrics::Metrics;
use sync_server::router::build_router;
use sync_server::state::AppState;
use sync_snapshot::{GenericEntityApplier, SnapshotEngine};
use tower::ServiceExt as _;

async fn test_state() -> (AppState, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let server_db = dir.path().join("server.db");
    let project_dir = dir.path().join("projects");

    let catalog = Arc::new(CatalogStore::open(&server_db).await.unwrap());
    let project_pool = Arc::new(ProjectDbPool::new(project_dir.clone()));
    let projects = ProjectService::new(catalog.clone());
    let snapshots = Arc::new(SnapshotEngine::new(project_dir, Arc::new(GenericEntityApplier)));
    let rate_limiter = Arc::new(RateLimiter::new());
    let device_auth = Arc::new(DeviceAuthService::new(
        catalog.clone(),
        "http://localhost:8080".to_owned(),
        true,
    ));
    let auth_gate = Arc::new(AuthGate::new(catalog.clone()));
    let metrics = Arc::new(Metrics::new());

    let config = AppConfig {
        listen_addr: ":8080".to_owned(),
        server_db_path: server_db,
        project_data_dir: dir.path().join("projects"),
        shutdown_timeout: std::time::Duration::from_secs(5),
        allow_signup: true,
        base_url: "http://localhost:8080".to_owned(),
        log_format: LogFormat::Pretty,
        log_level: "info".to_owned(),
        rate_limit: sync_ratelimit::RateLimitTiers {
            auth: 1000,
            push: 1000,
            pull: 1000,
            other: 1000,
        },
        cors_allowed_origins: Vec::new(),
        auth_event_retention: std::time::Duration::from_secs(60 * 60 * 24 * 90),
        rate_limit_event_retention: std::time::Duration::from_secs(60 * 60 * 24 * 30),
    };

    let state = AppState {
        config: Arc::new(config),
        catalog,
        project_pool,
        projects,
        snapshots,
        rate_limiter,
        device_auth,
        auth_gate,
        metrics,
    };
    (state, dir)
}

fn with_connect_info(mut request: Request<Body>) -> Request<Body> {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 0);
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    with_connect_info(builder.body(Body::from(body.to_string())).unwrap())
}

fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    with_connect_info(builder.body(Body::empty()).unwrap())
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn healthz_reports_ok() {
    let (state, _dir) = test_state().await;
    let app = build_router(state);
    let res = app
        .oneshot(get_request("/healthz", None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

/// Completes the device-code flow entirely through the catalog/service
/// layer (bypassing the HTML verify form) and returns a `sync`-scoped API
/// key plaintext.
async fn issue_sync_key(state: &AppState, email: &str) -> String {
    let start = state.device_auth.start(email).await.unwrap();
    state.device_auth.verify(&start.user_code).await.unwrap();
    match state.device_auth.poll(&start.device_code).await.unwrap() {
        sync_auth::PollResponse::Complete { api_key, .. } => api_key,
        sync_auth::PollResponse::Pending => panic!("expected completion after verify"),
    }
}

#[tokio::test]
async fn device_code_login_over_http_reaches_completion() {
    let (state, _dir) = test_state().await;
    let app = build_router(state.clone());

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/auth/login/start",
            None,
            json!({"email": "alice@example.com"}),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let start_body = body_json(res).await;
    let device_code = start_body["device_code"].as_str().unwrap().to_owned();
    let user_code = start_body["user_code"].as_str().unwrap().to_owned();

    let res = app
        .clone()
        .oneshot(with_connect_info(
            Request::builder()
                .method("POST")
                .uri("/auth/verify")
                .header("content-type", "application/x-www-form-urlencoded")
                .body(Body::from(format!("user_code={user_code}")))
                .unwrap(),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = app
        .oneshot(json_request(
            "POST",
            "/v1/auth/login/poll",
            None,
            json!({"device_code": device_code}),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let poll_body = body_json(res).await;
    assert_eq!(poll_body["status"], "complete");
    assert!(poll_body["api_key"].as_str().unwrap().starts_with("sk_"));
}

#[tokio::test]
async fn project_lifecycle_and_role_enforcement() {
    let (state, _dir) = test_state().await;
    let owner_key = issue_sync_key(&state, "owner@example.com").await;
    let stranger_key = issue_sync_key(&state, "stranger@example.com").await;
    let app = build_router(state);

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/projects",
            Some(&owner_key),
            json!({"name": "Demo", "description": "a project"}),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let project = body_json(res).await;
    let project_id = project["id"].as_str().unwrap().to_owned();

    let res = app
        .clone()
        .oneshot(get_request(
            &format!("/v1/projects/{project_id}"),
            Some(&stranger_key),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = app
        .oneshot(get_request(
            &format!("/v1/projects/{project_id}"),
            Some(&owner_key),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn push_then_pull_round_trips_events() {
    let (state, _dir) = test_state().await;
    let owner_key = issue_sync_key(&state, "owner2@example.com").await;
    let app = build_router(state);

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/projects",
            Some(&owner_key),
            json!({"name": "Sync Demo"}),
        ))
        .await
        .unwrap();
    let project_id = body_json(res).await["id"].as_str().unwrap().to_owned();

    let push_body = json!({
        "device_id": "dev-1",
        "session_id": "sess-1",
        "events": [{
            "client_action_id": 1,
            "action_type": "upsert",
            "entity_type": "issue",
            "entity_id": "issue-1",
            "payload": {"status": "open", "title": "first bug"},
            "client_ts": "2026-01-01T00:00:00Z",
        }],
    });
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/v1/projects/{project_id}/sync/push"),
            Some(&owner_key),
            push_body,
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let push_response = body_json(res).await;
    assert_eq!(push_response["accepted"], 1);
    assert_eq!(push_response["acks"][0]["server_seq"], 1);

    let res = app
        .oneshot(get_request(
            &format!("/v1/projects/{project_id}/sync/pull?after_server_seq=0"),
            Some(&owner_key),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let pull_response = body_json(res).await;
    assert_eq!(pull_response["events"].as_array().unwrap().len(), 1);
    assert_eq!(pull_response["last_server_seq"], 1);
    assert_eq!(pull_response["has_more"], false);
}

#[tokio::test]
async fn snapshot_download_requires_events_and_returns_sqlite_bytes() {
    let (state, _dir) = test_state().await;
    let owner_key = issue_sync_key(&state, "owner3@example.com").await;
    let app = build_router(state);

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/projects",
            Some(&owner_key),
            json!({"name": "Snap Demo"}),
        ))
        .await
        .unwrap();
    let project_id = body_json(res).await["id"].as_str().unwrap().to_owned();

    let res = app
        .clone()
        .oneshot(get_request(
            &format!("/v1/projects/{project_id}/sync/snapshot"),
            Some(&owner_key),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let push_body = json!({
        "device_id": "dev-1",
        "session_id": "sess-1",
        "events": [{
            "client_action_id": 1,
            "action_type": "upsert",
            "entity_type": "issue",
            "entity_id": "issue-1",
            "payload": {"status": "open"},
            "client_ts": "2026-01-01T00:00:00Z",
        }],
    });
    app.clone()
        .oneshot(json_request(
            "POST",
            &format!("/v1/projects/{project_id}/sync/push"),
            Some(&owner_key),
            push_body,
        ))
        .await
        .unwrap();

    let res = app
        .oneshot(get_request(
            &format!("/v1/projects/{project_id}/sync/snapshot"),
            Some(&owner_key),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        res.headers().get("content-type").unwrap(),
        "application/x-sqlite3"
    );
    assert_eq!(res.headers().get("x-snapshot-seq").unwrap(), "1");
}

#[tokio::test]
async fn admin_routes_require_admin_scope() {
    let (state, _dir) = test_state().await;
    // The first user ever created becomes the admin (catalog invariant),
    // but its key here only carries the `sync` scope, so the admin gate
    // must still reject it.
    let plain_key = issue_sync_key(&state, "first-user@example.com").await;
    let app = build_router(state);

    let res = app
        .oneshot(get_request("/v1/admin/server/overview", Some(&plain_key)))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_overview_succeeds_with_admin_scope() {
    let (state, _dir) = test_state().await;
    let user = state.catalog.create_user("root@example.com").await.unwrap();
    let key = state
        .catalog
        .generate_api_key(user.id, "admin key", "sync,admin:read:server", None)
        .await
        .unwrap();
    let app = build_router(state);

    let res = app
        .oneshot(get_request(
            "/v1/admin/server/overview",
            Some(&key.plaintext),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["status"], "ok");
}
