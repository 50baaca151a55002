//! Shared error envelope for the sync server.
//!
//! Every layer of the stack (catalog store, project pool, snapshot engine,
//! rate limiter, auth) returns its own `thiserror` domain error. At the HTTP
//! edge those convert into [`AppError`], which implements
//! `axum::response::IntoResponse` and renders the wire shape fixed by the
//! spec: `{"error":{"code","message"}}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// One variant per error kind the HTTP surface can produce.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("insufficient admin scope")]
    InsufficientAdminScope,

    #[error("not found")]
    NotFound,

    #[error("rate limited")]
    RateLimited,

    #[error("signup disabled")]
    SignupDisabled,

    #[error("expired")]
    Expired,

    #[error("already used")]
    AlreadyUsed,

    #[error("no events")]
    NoEvents,

    #[error("project deleted")]
    ProjectDeleted,

    #[error("snapshot unavailable")]
    SnapshotUnavailable,

    #[error("export too large")]
    ExportTooLarge,

    #[error("{0}")]
    InvalidQuery(String),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::InsufficientAdminScope => "insufficient_admin_scope",
            Self::NotFound => "not_found",
            Self::RateLimited => "rate_limited",
            Self::SignupDisabled => "signup_disabled",
            Self::Expired => "expired",
            Self::AlreadyUsed => "already_used",
            Self::NoEvents => "no_events",
            Self::ProjectDeleted => "project_deleted",
            Self::SnapshotUnavailable => "snapshot_unavailable",
            Self::ExportTooLarge => "export_too_large",
            Self::InvalidQuery(_) => "invalid_query",
            Self::Internal(_) => "internal",
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden
            | Self::InsufficientAdminScope
            | Self::SignupDisabled
            | Self::ProjectDeleted => StatusCode::FORBIDDEN,
            Self::NotFound | Self::NoEvents | Self::SnapshotUnavailable => {
                StatusCode::NOT_FOUND
            }
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Expired | Self::AlreadyUsed => StatusCode::GONE,
            Self::ExportTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    #[must_use]
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery(message.into())
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    code: &'a str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status() == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "internal error");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code(),
                message: self.to_string(),
            },
        };
        (self.status(), Json(body)).into_response()
    }
}
