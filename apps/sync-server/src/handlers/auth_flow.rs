//! `/v1/auth/login/{start,poll}` (JSON, device-code flow) and `/auth/verify`
//! (HTML form, entered by a human on a second device).

use axum::extract::{Form, State};
use axum::response::{Html, IntoResponse};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sync_auth::PollResponse;
use sync_errors::AppError;
use uuid::Uuid;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginStartRequest {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct LoginStartResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in: i64,
    pub interval: i64,
}

pub async fn login_start(
    State(state): State<AppState>,
    Json(body): Json<LoginStartRequest>,
) -> Result<Json<LoginStartResponse>, AppError> {
    let email = body.email.trim();
    if email.is_empty() {
        return Err(AppError::bad_request("email must not be empty"));
    }
    let start = state.device_auth.start(email).await?;
    Ok(Json(LoginStartResponse {
        device_code: start.device_code,
        user_code: start.user_code,
        verification_uri: start.verification_uri,
        expires_in: start.expires_in,
        interval: start.interval,
    }))
}

#[derive(Debug, Deserialize)]
pub struct LoginPollRequest {
    pub device_code: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoginPollResponse {
    Pending,
    Complete {
        api_key: String,
        user_id: Uuid,
        email: String,
        expires_at: Option<DateTime<Utc>>,
    },
}

pub async fn login_poll(
    State(state): State<AppState>,
    Json(body): Json<LoginPollRequest>,
) -> Result<Json<LoginPollResponse>, AppError> {
    let outcome = state.device_auth.poll(&body.device_code).await?;
    Ok(Json(match outcome {
        PollResponse::Pending => LoginPollResponse::Pending,
        PollResponse::Complete {
            api_key,
            user_id,
            email,
            expires_at,
        } => LoginPollResponse::Complete {
            api_key,
            user_id,
            email,
            expires_at,
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct VerifyForm {
    pub user_code: String,
}

pub async fn verify_form() -> Html<&'static str> {
    Html(VERIFY_PAGE)
}

pub async fn verify_submit(State(state): State<AppState>, Form(form): Form<VerifyForm>) -> impl IntoResponse {
    match state.device_auth.verify(form.user_code.trim()).await {
        Ok(()) => Html(SUCCESS_PAGE.to_owned()),
        Err(err) => Html(format!(
            "<html><body><h1>Verification failed</h1><p>{err}</p></body></html>"
        )),
    }
}

const VERIFY_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Device verification</title></head>
<body>
<h1>Enter your device code</h1>
<form method="post" action="/auth/verify">
<input type="text" name="user_code" autocomplete="off" autocapitalize="characters" required>
<button type="submit">Verify</button>
</form>
</body>
</html>"#;

const SUCCESS_PAGE: &str = "<!DOCTYPE html>\n<html><head><title>Device verified</title></head><body><h1>Device verified</h1><p>You may return to your device.</p></body></html>";
