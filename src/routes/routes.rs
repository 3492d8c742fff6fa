//! Defines routes for record, collection, trash and quota operations.
//!
//! ## Structure
//! - **Records**
//!   - `POST   /api/files/upload` multipart batch upload
//!   - `GET    /api/files` list (supports kind, page, per_page)
//!   - `GET|PUT|DELETE /api/files/{id}` details, rename, move to trash
//!   - `GET    /api/files/{id}/download` stream payload
//!   - `POST|DELETE /api/files/{id}/share` public link
//!   - `GET    /api/public/{token}` shared payload, no owner required
//!   - `POST   /api/files/{id}/add-to-collection`
//!   - `DELETE /api/files/{id}/remove-from-collection/{collection_id}`
//!
//! - **Collections**
//!   - `GET|POST /api/collections`
//!   - `GET|PUT|DELETE /api/collections/{id}`
//!   - `GET    /api/collections/{id}/files`
//!
//! - **Trash and quota**
//!   - `GET    /api/trash`, `DELETE /api/trash/{id}`
//!   - `DELETE /api/trash/file/{id}`, `DELETE /api/trash/collection/{id}`
//!   - `POST   /api/restore/file/{id}`, `POST /api/restore/collection/{id}`
//!   - `GET    /api/quota`, `POST /api/quota/increase`

use crate::{
    handlers::{
        collection_handlers::{
            create_collection, delete_collection, get_collection, list_collection_files,
            list_collections, rename_collection,
        },
        health_handlers::{healthz, readyz},
        quota_handlers::{get_quota, increase_quota},
        record_handlers::{
            add_to_collection, delete_record, download_record, get_record, list_records,
            open_shared, remove_from_collection, rename_record, share_record, unshare_record,
            upload_records,
        },
        trash_handlers::{
            list_trash, purge_collection, purge_record, purge_trash_entry, restore_collection,
            restore_record,
        },
    },
    services::lifecycle::LifecycleManager,
};
use axum::{
    Router,
    routing::{delete, get, post},
};

/// Build the router. Every handler shares the `LifecycleManager` state.
pub fn routes() -> Router<LifecycleManager> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Records
        .route("/api/files", get(list_records))
        .route("/api/files/upload", post(upload_records))
        .route(
            "/api/files/{id}",
            get(get_record).put(rename_record).delete(delete_record),
        )
        .route("/api/files/{id}/download", get(download_record))
        .route(
            "/api/files/{id}/share",
            post(share_record).delete(unshare_record),
        )
        .route("/api/files/{id}/add-to-collection", post(add_to_collection))
        .route(
            "/api/files/{id}/remove-from-collection/{collection_id}",
            delete(remove_from_collection),
        )
        .route("/api/public/{token}", get(open_shared))
        // Collections
        .route(
            "/api/collections",
            get(list_collections).post(create_collection),
        )
        .route(
            "/api/collections/{id}",
            get(get_collection)
                .put(rename_collection)
                .delete(delete_collection),
        )
        .route("/api/collections/{id}/files", get(list_collection_files))
        // Trash
        .route("/api/trash", get(list_trash))
        .route("/api/trash/{id}", delete(purge_trash_entry))
        .route("/api/trash/file/{id}", delete(purge_record))
        .route("/api/trash/collection/{id}", delete(purge_collection))
        .route("/api/restore/file/{id}", post(restore_record))
        .route("/api/restore/collection/{id}", post(restore_collection))
        // Quota
        .route("/api/quota", get(get_quota))
        .route("/api/quota/increase", post(increase_quota))
}
