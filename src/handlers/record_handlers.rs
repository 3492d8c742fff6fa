//! HTTP handlers for records: upload, listing, rename, soft-delete, download,
//! public sharing and collection membership.
//! Payloads are streamed in both directions and never buffered whole.

use super::{Owner, RecordView};
use crate::{
    errors::AppError,
    models::{collection::CollectionDetails, record::{Record, RecordKind}},
    services::lifecycle::LifecycleManager,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

#[derive(Debug, Deserialize)]
pub struct ListRecordsQuery {
    pub kind: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RenameReq {
    pub new_filename: String,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct ShareReq {
    /// Token lifetime in seconds; omitted means no expiry.
    pub expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AddToCollectionReq {
    pub collection_id: String,
}

#[derive(Debug, Serialize)]
struct UploadFailure {
    filename: String,
    error: String,
}

/// POST `/api/files/upload`: multipart batch upload.
///
/// Every part carrying a filename becomes a record. A `description` part
/// applies to the files that follow it. Per-file failures are reported in
/// the body with status 207; store failures abort the whole request.
pub async fn upload_records(
    State(manager): State<LifecycleManager>,
    Owner(owner): Owner,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut description = String::new();
    let mut uploaded: Vec<RecordView> = Vec::new();
    let mut failed: Vec<UploadFailure> = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("description") {
            description = field.text().await?;
            continue;
        }
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };

        let stream = field.map(|chunk| chunk.map_err(io::Error::other));
        match manager
            .create_record(&owner, &filename, &description, stream)
            .await
        {
            Ok(record) => uploaded.push(record.into()),
            Err(err) if err.is_internal() => return Err(err.into()),
            Err(err) => {
                tracing::debug!(owner = %owner, filename = %filename, error = %err, "upload rejected");
                failed.push(UploadFailure {
                    filename,
                    error: err.to_string(),
                });
            }
        }
    }

    if uploaded.is_empty() && failed.is_empty() {
        return Err(AppError::bad_request("no files in upload"));
    }

    let status = if failed.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    };
    Ok((status, Json(json!({ "files": uploaded, "errors": failed }))).into_response())
}

/// GET `/api/files`: list active records, newest first.
/// Supports `?kind=&page=&per_page=`.
pub async fn list_records(
    State(manager): State<LifecycleManager>,
    Owner(owner): Owner,
    Query(q): Query<ListRecordsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let kind = match q.kind.as_deref().filter(|k| !k.is_empty()) {
        Some(raw) => Some(
            RecordKind::parse(raw)
                .ok_or_else(|| AppError::bad_request(format!("unknown kind `{raw}`")))?,
        ),
        None => None,
    };
    let page = manager
        .list_records(&owner, kind, q.page.unwrap_or(1), q.per_page.unwrap_or(20))
        .await?;

    let files: Vec<RecordView> = page.records.into_iter().map(RecordView::from).collect();
    Ok(Json(json!({
        "files": files,
        "total": page.total,
        "page": page.page,
        "per_page": page.per_page,
        "pages": page.pages,
    })))
}

/// GET `/api/files/{id}`
pub async fn get_record(
    State(manager): State<LifecycleManager>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> Result<Json<RecordView>, AppError> {
    let record = manager.get_record(&id, &owner).await?;
    Ok(Json(record.into()))
}

/// PUT `/api/files/{id}`: rename. Collisions answer 409 with a suggestion
/// unless `force` is set.
pub async fn rename_record(
    State(manager): State<LifecycleManager>,
    Owner(owner): Owner,
    Path(id): Path<String>,
    Json(req): Json<RenameReq>,
) -> Result<Json<RecordView>, AppError> {
    let record = manager
        .rename_record(&id, &owner, &req.new_filename, req.force)
        .await?;
    Ok(Json(record.into()))
}

/// DELETE `/api/files/{id}`: move to trash.
pub async fn delete_record(
    State(manager): State<LifecycleManager>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let entry = manager.soft_delete_record(&id, &owner).await?;
    Ok(Json(json!({
        "message": "moved to trash",
        "trash_id": entry.id,
        "id": entry.original_id,
    })))
}

/// GET `/api/files/{id}/download`: stream the payload.
pub async fn download_record(
    State(manager): State<LifecycleManager>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let (record, file) = manager.open_record(&id, &owner).await?;
    Ok(payload_response(&record, file))
}

/// GET `/api/public/{token}`: stream a shared payload without an owner.
pub async fn open_shared(
    State(manager): State<LifecycleManager>,
    Path(token): Path<String>,
) -> Result<Response, AppError> {
    let (record, file) = manager.open_shared(&token).await?;
    Ok(payload_response(&record, file))
}

fn payload_response(record: &Record, file: File) -> Response {
    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(record.size_bytes));
    let disposition = format!(
        "attachment; filename=\"{}\"",
        record.name.replace(['"', '\\'], "_")
    );
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    response
}

/// POST `/api/files/{id}/share`: mint a public token.
/// Supports `?expires_in=` in seconds.
pub async fn share_record(
    State(manager): State<LifecycleManager>,
    Owner(owner): Owner,
    Path(id): Path<String>,
    Query(req): Query<ShareReq>,
) -> Result<Json<RecordView>, AppError> {
    let record = manager.share_record(&id, &owner, req.expires_in).await?;
    Ok(Json(record.into()))
}

/// DELETE `/api/files/{id}/share`
pub async fn unshare_record(
    State(manager): State<LifecycleManager>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> Result<Json<RecordView>, AppError> {
    let record = manager.unshare_record(&id, &owner).await?;
    Ok(Json(record.into()))
}

/// POST `/api/files/{id}/add-to-collection`
pub async fn add_to_collection(
    State(manager): State<LifecycleManager>,
    Owner(owner): Owner,
    Path(id): Path<String>,
    Json(req): Json<AddToCollectionReq>,
) -> Result<Json<CollectionDetails>, AppError> {
    let details = manager
        .add_member(&req.collection_id, &owner, &id)
        .await?;
    Ok(Json(details))
}

/// DELETE `/api/files/{id}/remove-from-collection/{collection_id}`
pub async fn remove_from_collection(
    State(manager): State<LifecycleManager>,
    Owner(owner): Owner,
    Path((id, collection_id)): Path<(String, String)>,
) -> Result<Json<CollectionDetails>, AppError> {
    let details = manager
        .remove_member(&collection_id, &owner, &id)
        .await?;
    Ok(Json(details))
}

#[cfg(test)]
mod tests {
    use super::super::testing::{app, json_request, request, send, upload_request};
    use axum::http::StatusCode;
    use http_body_util::BodyExt;
    use serde_json::json;
    use tower::ServiceExt;

    #[tokio::test]
    async fn requests_without_an_owner_are_unauthorized() {
        let (app, _dir) = app().await;
        let req = axum::http::Request::builder()
            .uri("/api/files")
            .body(axum::body::Body::empty())
            .unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["status"], 401);
    }

    #[tokio::test]
    async fn batch_upload_reports_partial_failures() {
        let (app, _dir) = app().await;
        let (status, body) = send(
            &app,
            upload_request("alice", "trip", &[("a.jpg", "jpeg bytes"), ("empty.txt", "")]),
        )
        .await;
        assert_eq!(status, StatusCode::MULTI_STATUS);
        assert_eq!(body["files"][0]["name"], "a.jpg");
        assert_eq!(body["files"][0]["kind"], "image");
        assert_eq!(body["files"][0]["description"], "trip");
        assert!(body["files"][0].get("payload_handle").is_none());
        assert_eq!(body["errors"][0]["filename"], "empty.txt");

        let (status, body) = send(&app, upload_request("alice", "", &[("a.jpg", "again")])).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["files"][0]["name"], "a(1).jpg");
    }

    #[tokio::test]
    async fn upload_download_rename_and_trash() {
        let (app, _dir) = app().await;
        let (_, body) = send(&app, upload_request("alice", "", &[("notes.txt", "hello")])).await;
        let id = body["files"][0]["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(request("GET", &format!("/api/files/{id}/download"), "alice"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"hello");

        // Someone else's record looks absent.
        let (status, _) = send(&app, request("GET", &format!("/api/files/{id}"), "bob")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(
            &app,
            json_request(
                "PUT",
                &format!("/api/files/{id}"),
                "alice",
                json!({ "new_filename": "summary" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "summary.txt");

        let (status, _) = send(&app, request("DELETE", &format!("/api/files/{id}"), "alice")).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, request("GET", &format!("/api/files/{id}"), "alice")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_identifiers_are_bad_requests() {
        let (app, _dir) = app().await;
        let (status, body) = send(&app, request("GET", "/api/files/not-hex", "alice")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("not-hex"));
    }

    #[tokio::test]
    async fn shared_links_work_without_an_owner() {
        let (app, _dir) = app().await;
        let (_, body) = send(&app, upload_request("alice", "", &[("pic.png", "png")])).await;
        let id = body["files"][0]["id"].as_str().unwrap().to_string();

        let (status, body) = send(&app, request("POST", &format!("/api/files/{id}/share"), "alice")).await;
        assert_eq!(status, StatusCode::OK);
        let share_url = body["share_url"].as_str().unwrap().to_string();

        let public = axum::http::Request::builder()
            .uri(&share_url)
            .body(axum::body::Body::empty())
            .unwrap();
        let response = app.clone().oneshot(public).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        send(&app, request("DELETE", &format!("/api/files/{id}/share"), "alice")).await;
        let public = axum::http::Request::builder()
            .uri(&share_url)
            .body(axum::body::Body::empty())
            .unwrap();
        let (status, _) = send(&app, public).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
