//! HTTP handlers for collections.

use super::{Owner, RecordView};
use crate::{
    errors::AppError,
    models::collection::{Collection, CollectionDetails},
    services::lifecycle::LifecycleManager,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct CreateCollectionReq {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct RenameCollectionReq {
    pub name: String,
    #[serde(default)]
    pub force: bool,
}

/// GET `/api/collections`
pub async fn list_collections(
    State(manager): State<LifecycleManager>,
    Owner(owner): Owner,
) -> Result<Json<Vec<CollectionDetails>>, AppError> {
    Ok(Json(manager.list_collections(&owner).await?))
}

/// POST `/api/collections`: names collide silently, like uploads.
pub async fn create_collection(
    State(manager): State<LifecycleManager>,
    Owner(owner): Owner,
    Json(req): Json<CreateCollectionReq>,
) -> Result<impl IntoResponse, AppError> {
    let collection = manager.create_collection(&owner, &req.name).await?;
    Ok((StatusCode::CREATED, Json(collection)))
}

/// GET `/api/collections/{id}`
pub async fn get_collection(
    State(manager): State<LifecycleManager>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> Result<Json<CollectionDetails>, AppError> {
    Ok(Json(manager.get_collection(&id, &owner).await?))
}

/// PUT `/api/collections/{id}`: rename, confirm-first.
pub async fn rename_collection(
    State(manager): State<LifecycleManager>,
    Owner(owner): Owner,
    Path(id): Path<String>,
    Json(req): Json<RenameCollectionReq>,
) -> Result<Json<Collection>, AppError> {
    let collection = manager
        .rename_collection(&id, &owner, &req.name, req.force)
        .await?;
    Ok(Json(collection))
}

/// DELETE `/api/collections/{id}`: move to trash. Member records stay put.
pub async fn delete_collection(
    State(manager): State<LifecycleManager>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let entry = manager.soft_delete_collection(&id, &owner).await?;
    Ok(Json(json!({
        "message": "moved to trash",
        "trash_id": entry.id,
        "id": entry.original_id,
    })))
}

/// GET `/api/collections/{id}/files`: the member records.
///
/// Identifiers that no longer resolve to an active record are skipped.
pub async fn list_collection_files(
    State(manager): State<LifecycleManager>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> Result<Json<Vec<RecordView>>, AppError> {
    let members = manager.list_members(&id, &owner).await?;
    let mut files = Vec::with_capacity(members.len());
    for record_id in members {
        match manager.get_record(record_id.as_str(), &owner).await {
            Ok(record) => files.push(RecordView::from(record)),
            Err(err) if err.is_internal() => return Err(err.into()),
            Err(err) => tracing::debug!(collection = %id, record = %record_id, error = %err, "skipping member"),
        }
    }
    Ok(Json(files))
}

#[cfg(test)]
mod tests {
    use super::super::testing::{app, json_request, request, send, upload_request};
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn rename_collision_returns_a_suggestion() {
        let (app, _dir) = app().await;
        for name in ["Work", "Home"] {
            let (status, _) = send(
                &app,
                json_request("POST", "/api/collections", "alice", json!({ "name": name })),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
        }
        let (_, list) = send(&app, request("GET", "/api/collections", "alice")).await;
        let home = list
            .as_array()
            .unwrap()
            .iter()
            .find(|c| c["name"] == "Home")
            .unwrap()["id"]
            .as_str()
            .unwrap()
            .to_string();

        let uri = format!("/api/collections/{home}");
        let (status, body) = send(
            &app,
            json_request("PUT", &uri, "alice", json!({ "name": "Work" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["suggestion"], "Work(1)");
        assert_eq!(body["requires_confirmation"], true);

        let (status, body) = send(
            &app,
            json_request("PUT", &uri, "alice", json!({ "name": "Work", "force": true })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Work(1)");
    }

    #[tokio::test]
    async fn membership_through_the_api() {
        let (app, _dir) = app().await;
        let (_, collection) = send(
            &app,
            json_request("POST", "/api/collections", "alice", json!({ "name": "Trip" })),
        )
        .await;
        let cid = collection["id"].as_str().unwrap().to_string();
        let (_, upload) = send(&app, upload_request("alice", "", &[("beach.jpg", "sand")])).await;
        let rid = upload["files"][0]["id"].as_str().unwrap().to_string();

        let add = json_request(
            "POST",
            &format!("/api/files/{rid}/add-to-collection"),
            "alice",
            json!({ "collection_id": cid }),
        );
        let (status, body) = send(&app, add).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["member_count"], 1);

        let (_, files) = send(&app, request("GET", &format!("/api/collections/{cid}/files"), "alice")).await;
        assert_eq!(files[0]["id"], rid.as_str());

        let (status, body) = send(
            &app,
            request(
                "DELETE",
                &format!("/api/files/{rid}/remove-from-collection/{cid}"),
                "alice",
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["member_count"], 0);
    }
}
