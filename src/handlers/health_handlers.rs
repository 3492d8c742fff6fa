//! Health & readiness handlers.
//!
//! - GET /healthz  -> liveness, no I/O
//! - GET /readyz   -> readiness: metadata store query plus a blob directory
//!   write/read/delete probe

use crate::services::lifecycle::LifecycleManager;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::fs;
use uuid::Uuid;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl CheckStatus {
    fn from_result(result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self { ok: true, error: None },
            Err(error) => Self {
                ok: false,
                error: Some(error),
            },
        }
    }
}

/// `GET /healthz`
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// `GET /readyz`
///
/// 200 when every check passes, 503 otherwise. The body lists each check.
pub async fn readyz(State(manager): State<LifecycleManager>) -> impl IntoResponse {
    let mut checks = BTreeMap::new();
    checks.insert("sqlite", CheckStatus::from_result(check_sqlite(&manager).await));
    checks.insert("blobs", CheckStatus::from_result(check_blob_dir(&manager).await));

    let ready = checks.values().all(|c| c.ok);
    if !ready {
        tracing::warn!("readiness check failed");
    }
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = ReadyResponse {
        status: if ready { "ok" } else { "error" },
        checks,
    };
    (status, Json(body))
}

async fn check_sqlite(manager: &LifecycleManager) -> Result<(), String> {
    match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(manager.db())
        .await
    {
        Ok(1) => Ok(()),
        Ok(v) => Err(format!("unexpected result: {v}")),
        Err(e) => Err(format!("error: {e}")),
    }
}

async fn check_blob_dir(manager: &LifecycleManager) -> Result<(), String> {
    let base = manager.blobs().base_path();
    fs::create_dir_all(base)
        .await
        .map_err(|e| format!("could not create blob dir: {e}"))?;

    let probe = base.join(format!(".readyz-{}", Uuid::new_v4()));
    let outcome = match fs::write(&probe, b"readyz").await {
        Ok(()) => match fs::read(&probe).await {
            Ok(bytes) if bytes == b"readyz" => Ok(()),
            Ok(_) => Err("probe content mismatch".to_string()),
            Err(e) => Err(format!("could not read probe: {e}")),
        },
        Err(e) => return Err(format!("could not write probe: {e}")),
    };
    // best-effort cleanup
    let _ = fs::remove_file(&probe).await;
    outcome
}

#[cfg(test)]
mod tests {
    use super::super::testing::{app, send};
    use axum::{body::Body, http::{Request, StatusCode}};

    #[tokio::test]
    async fn probes_report_ok() {
        let (app, dir) = app().await;
        for uri in ["/healthz", "/readyz"] {
            let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
            let (status, body) = send(&app, req).await;
            assert_eq!(status, StatusCode::OK, "{uri}");
            assert_eq!(body["status"], "ok");
        }
        // The probe file is gone again.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
