//! HTTP handlers for the caller's storage quota.

use super::Owner;
use crate::{
    errors::AppError,
    models::quota::{QuotaAccount, QuotaUnit},
    services::lifecycle::LifecycleManager,
};
use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct IncreaseQuotaReq {
    pub amount: i64,
    /// `MB`, `GB` or `TB`; anything else counts as MB.
    #[serde(default)]
    pub unit: String,
}

#[derive(Debug, Serialize)]
pub struct QuotaView {
    pub limit_mb: i64,
    pub used_bytes: i64,
    pub available_bytes: i64,
}

impl From<QuotaAccount> for QuotaView {
    fn from(account: QuotaAccount) -> Self {
        Self {
            available_bytes: account.available_bytes(),
            limit_mb: account.limit_mb,
            used_bytes: account.used_bytes,
        }
    }
}

/// GET `/api/quota`
pub async fn get_quota(
    State(manager): State<LifecycleManager>,
    Owner(owner): Owner,
) -> Result<Json<QuotaView>, AppError> {
    Ok(Json(manager.get_quota(&owner).await?.into()))
}

/// POST `/api/quota/increase`
pub async fn increase_quota(
    State(manager): State<LifecycleManager>,
    Owner(owner): Owner,
    Json(req): Json<IncreaseQuotaReq>,
) -> Result<Json<QuotaView>, AppError> {
    let account = manager
        .increase_quota(&owner, req.amount, QuotaUnit::parse(&req.unit))
        .await?;
    Ok(Json(account.into()))
}

#[cfg(test)]
mod tests {
    use super::super::testing::{app, json_request, request, send};
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn increases_accumulate_in_mb() {
        let (app, _dir) = app().await;
        let (_, quota) = send(&app, request("GET", "/api/quota", "alice")).await;
        assert_eq!(quota["limit_mb"], 10);
        assert_eq!(quota["used_bytes"], 0);

        let (status, quota) = send(
            &app,
            json_request("POST", "/api/quota/increase", "alice", json!({ "amount": 1, "unit": "GB" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(quota["limit_mb"], 10 + 1024);

        let (status, body) = send(
            &app,
            json_request("POST", "/api/quota/increase", "alice", json!({ "amount": -5, "unit": "MB" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], 400);
    }
}
