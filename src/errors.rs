use crate::models::trash::EntityKind;
use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{fmt, io};
use thiserror::Error;

/// Outcome kinds of every lifecycle operation.
///
/// Everything except `Sqlx` and `Io` is an expected, recoverable outcome.
/// Those two are the internal store failures and are surfaced verbatim.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("`{0}` is not a valid identifier")]
    InvalidIdentifier(String),
    #[error("{kind} `{id}` not found")]
    NotFound { kind: &'static str, id: String },
    #[error("{kind} `{id}` belongs to another owner")]
    PermissionDenied { kind: &'static str, id: String },
    #[error("a {kind} named `{name}` already exists")]
    NameCollision {
        kind: EntityKind,
        name: String,
        suggestion: String,
    },
    /// Concurrent writers kept taking every candidate name. Retrying later
    /// is expected to succeed; no name was decided.
    #[error("could not settle a name for {kind} `{name}` under concurrent writes")]
    Contention { kind: EntityKind, name: String },
    #[error("quota exceeded: {requested} bytes requested, {available} available")]
    QuotaExceeded { requested: i64, available: i64 },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

impl LifecycleError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// True for backing-store failures (the `InternalStoreError` kind).
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Sqlx(_) | Self::Io(_))
    }
}

/// A lightweight wrapper for errors returned over HTTP.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    /// Name proposed by the naming resolver on a blocked rename.
    pub suggestion: Option<String>,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            suggestion: None,
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = match self.suggestion {
            Some(suggestion) => json!({
                "error": self.message,
                "status": self.status.as_u16(),
                "suggestion": suggestion,
                "requires_confirmation": true
            }),
            None => json!({
                "error": self.message,
                "status": self.status.as_u16()
            }),
        };

        (self.status, Json(body)).into_response()
    }
}

impl From<LifecycleError> for AppError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::InvalidInput(_) | LifecycleError::InvalidIdentifier(_) => {
                AppError::bad_request(err.to_string())
            }
            LifecycleError::NotFound { .. } => AppError::not_found(err.to_string()),
            // Ownership mismatches are reported as plain absence so callers
            // cannot discover other owners' identifiers.
            LifecycleError::PermissionDenied { kind, id } => {
                tracing::debug!(%kind, %id, "ownership mismatch reported as not found");
                AppError::not_found(LifecycleError::not_found(kind, id).to_string())
            }
            LifecycleError::NameCollision { ref suggestion, .. } => {
                let suggestion = suggestion.clone();
                AppError {
                    status: StatusCode::CONFLICT,
                    message: err.to_string(),
                    suggestion: Some(suggestion),
                }
            }
            LifecycleError::QuotaExceeded { .. } => {
                AppError::new(StatusCode::PAYLOAD_TOO_LARGE, err.to_string())
            }
            LifecycleError::Contention { .. } => {
                tracing::warn!(error = %err, "name placement gave up");
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            }
            LifecycleError::Sqlx(_) | LifecycleError::Io(_) => {
                tracing::error!(error = %err, "internal store error");
                AppError::internal(err.to_string())
            }
        }
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::new(err.status(), err.body_text())
    }
}
