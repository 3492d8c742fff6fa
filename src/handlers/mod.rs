//! HTTP handlers. Each one extracts the caller's owner identity, delegates to
//! `LifecycleManager` and shapes the JSON response.

pub mod collection_handlers;
pub mod health_handlers;
pub mod quota_handlers;
pub mod record_handlers;
pub mod trash_handlers;

use crate::{
    errors::AppError,
    models::{
        ident::ObjectId,
        record::{Record, RecordKind},
    },
};
use axum::{extract::FromRequestParts, http::request::Parts};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Header carrying the owner identifier, set by the upstream auth gateway.
pub const OWNER_HEADER: &str = "x-owner-id";

/// The authenticated owner of the request.
#[derive(Debug, Clone)]
pub struct Owner(pub String);

impl<S> FromRequestParts<S> for Owner
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let owner = parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::unauthorized(format!("missing {OWNER_HEADER} header")))?;
        Ok(Owner(owner.to_string()))
    }
}

/// Public view of a record; the payload handle stays internal.
#[derive(Debug, Serialize)]
pub struct RecordView {
    pub id: ObjectId,
    pub name: String,
    pub size_bytes: i64,
    pub kind: RecordKind,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub download_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub share_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub share_expires_at: Option<DateTime<Utc>>,
}

impl From<Record> for RecordView {
    fn from(record: Record) -> Self {
        Self {
            download_url: format!("/api/files/{}/download", record.id),
            share_url: record
                .share_token
                .as_ref()
                .map(|token| format!("/api/public/{token}")),
            share_expires_at: record.share_expires_at,
            id: record.id,
            name: record.name,
            size_bytes: record.size_bytes,
            kind: record.kind,
            description: record.description,
            created_at: record.created_at,
        }
    }
}

/// Shared test plumbing for the handler modules.
#[cfg(test)]
pub(crate) mod testing {
    use crate::{
        db, routes,
        services::{blob_store::BlobStore, lifecycle::LifecycleManager},
    };
    use axum::{
        Router,
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    pub async fn app() -> (Router, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(db::memory_pool().await);
        let manager = LifecycleManager::new(db, BlobStore::new(dir.path()), 10);
        (routes::routes::routes().with_state(manager), dir)
    }

    /// Send `request` and decode the JSON body (`Null` when empty).
    pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    pub fn json_request(method: &str, uri: &str, owner: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("x-owner-id", owner)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    pub fn request(method: &str, uri: &str, owner: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("x-owner-id", owner)
            .body(Body::empty())
            .unwrap()
    }

    /// A multipart upload of `files` as `(name, contents)` pairs.
    pub fn upload_request(owner: &str, description: &str, files: &[(&str, &str)]) -> Request<Body> {
        const BOUNDARY: &str = "lifecycle-test-boundary";
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"description\"\r\n\r\n{description}\r\n"
        );
        for (name, contents) in files {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{name}\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n{contents}\r\n"
            ));
        }
        body.push_str(&format!("--{BOUNDARY}--\r\n"));

        Request::builder()
            .method("POST")
            .uri("/api/files/upload")
            .header("x-owner-id", owner)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }
}
