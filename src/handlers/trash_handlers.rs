//! HTTP handlers for the trash: listing, restore and permanent purge.

use super::{Owner, RecordView};
use crate::{
    errors::AppError,
    models::{
        ident::ObjectId,
        trash::{EntityKind, TrashEntry},
    },
    services::lifecycle::{LifecycleManager, Restored},
};
use axum::{
    Json,
    extract::{Path, State},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};

#[derive(Debug, Serialize)]
pub struct TrashItemView {
    /// The trash entry's own identifier.
    pub id: ObjectId,
    pub kind: EntityKind,
    pub original_id: ObjectId,
    pub name: String,
    pub size_bytes: i64,
    pub deleted_at: DateTime<Utc>,
}

impl From<TrashEntry> for TrashItemView {
    fn from(entry: TrashEntry) -> Self {
        Self {
            id: entry.id,
            kind: entry.kind,
            original_id: entry.original_id,
            name: entry.name,
            size_bytes: entry.size_bytes,
            deleted_at: entry.deleted_at,
        }
    }
}

fn restored_body<T: Serialize>(restored: Restored<T>) -> Result<Value, AppError> {
    let entity = serde_json::to_value(restored.entity)
        .map_err(|err| AppError::internal(err.to_string()))?;
    Ok(json!({
        "item": entity,
        "identity_changed": restored.identity_changed,
        "renamed": restored.renamed,
        "relinked": restored.relinked,
    }))
}

/// GET `/api/trash`: both kinds, most recently deleted first.
pub async fn list_trash(
    State(manager): State<LifecycleManager>,
    Owner(owner): Owner,
) -> Result<Json<Vec<TrashItemView>>, AppError> {
    let entries = manager.list_trash(&owner).await?;
    Ok(Json(entries.into_iter().map(TrashItemView::from).collect()))
}

/// DELETE `/api/trash/{id}`: purge by trash id or original id.
pub async fn purge_trash_entry(
    State(manager): State<LifecycleManager>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> Result<Json<TrashItemView>, AppError> {
    let entry = manager.purge_trash_entry(&id, &owner).await?;
    Ok(Json(entry.into()))
}

/// DELETE `/api/trash/file/{id}`: purge a trashed record only.
pub async fn purge_record(
    State(manager): State<LifecycleManager>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> Result<Json<TrashItemView>, AppError> {
    let entry = manager.purge_record(&id, &owner).await?;
    Ok(Json(entry.into()))
}

/// DELETE `/api/trash/collection/{id}`: purge a trashed collection only.
pub async fn purge_collection(
    State(manager): State<LifecycleManager>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> Result<Json<TrashItemView>, AppError> {
    let entry = manager.purge_collection(&id, &owner).await?;
    Ok(Json(entry.into()))
}

/// POST `/api/restore/file/{id}`
pub async fn restore_record(
    State(manager): State<LifecycleManager>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let restored = manager.restore_record(&id, &owner).await?;
    let restored = Restored {
        entity: RecordView::from(restored.entity),
        identity_changed: restored.identity_changed,
        renamed: restored.renamed,
        relinked: restored.relinked,
    };
    Ok(Json(restored_body(restored)?))
}

/// POST `/api/restore/collection/{id}`
pub async fn restore_collection(
    State(manager): State<LifecycleManager>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let restored = manager.restore_collection(&id, &owner).await?;
    Ok(Json(restored_body(restored)?))
}

#[cfg(test)]
mod tests {
    use super::super::testing::{app, json_request, request, send, upload_request};
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn trash_restore_and_purge_round() {
        let (app, _dir) = app().await;
        let (_, upload) = send(&app, upload_request("alice", "", &[("a.txt", "one"), ("b.txt", "two")])).await;
        let a = upload["files"][0]["id"].as_str().unwrap().to_string();
        let b = upload["files"][1]["id"].as_str().unwrap().to_string();

        send(&app, request("DELETE", &format!("/api/files/{a}"), "alice")).await;
        send(&app, request("DELETE", &format!("/api/files/{b}"), "alice")).await;

        let (status, trash) = send(&app, request("GET", "/api/trash", "alice")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(trash.as_array().unwrap().len(), 2);
        assert_eq!(trash[0]["kind"], "record");

        let (status, body) = send(&app, request("POST", &format!("/api/restore/file/{a}"), "alice")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["identity_changed"], false);
        assert_eq!(body["renamed"], false);
        assert_eq!(body["item"]["id"], a.as_str());

        // Restoring twice finds nothing.
        let (status, _) = send(&app, request("POST", &format!("/api/restore/file/{a}"), "alice")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, request("DELETE", &format!("/api/trash/{b}"), "alice")).await;
        assert_eq!(status, StatusCode::OK);
        let (_, trash) = send(&app, request("GET", "/api/trash", "alice")).await;
        assert!(trash.as_array().unwrap().is_empty());

        let (_, quota) = send(&app, request("GET", "/api/quota", "alice")).await;
        assert_eq!(quota["used_bytes"], 3);
    }

    #[tokio::test]
    async fn kind_specific_purge_only_matches_its_own_kind() {
        let (app, _dir) = app().await;
        let (_, upload) = send(&app, upload_request("alice", "", &[("a.txt", "one")])).await;
        let record = upload["files"][0]["id"].as_str().unwrap().to_string();
        let (_, work) = send(
            &app,
            json_request("POST", "/api/collections", "alice", json!({ "name": "Work" })),
        )
        .await;
        let collection = work["id"].as_str().unwrap().to_string();

        send(&app, request("DELETE", &format!("/api/files/{record}"), "alice")).await;
        send(&app, request("DELETE", &format!("/api/collections/{collection}"), "alice")).await;

        // Each route ignores the other kind's entries.
        let (status, _) = send(&app, request("DELETE", &format!("/api/trash/collection/{record}"), "alice")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, request("DELETE", &format!("/api/trash/file/{collection}"), "alice")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, request("DELETE", &format!("/api/trash/collection/{collection}"), "bob")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, purged) = send(&app, request("DELETE", &format!("/api/trash/collection/{collection}"), "alice")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(purged["kind"], "collection");
        assert_eq!(purged["original_id"], collection.as_str());

        let (status, purged) = send(&app, request("DELETE", &format!("/api/trash/file/{record}"), "alice")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(purged["kind"], "record");

        let (_, trash) = send(&app, request("GET", "/api/trash", "alice")).await;
        assert!(trash.as_array().unwrap().is_empty());
        let (status, _) = send(&app, request("POST", &format!("/api/restore/collection/{collection}"), "alice")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (_, quota) = send(&app, request("GET", "/api/quota", "alice")).await;
        assert_eq!(quota["used_bytes"], 0);
    }
}
