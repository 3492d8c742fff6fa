//! LifecycleManager: the only component that mutates the Active and Trash
//! stores.
//!
//! Records and collections move Active → Trashed → (Restored | Purged).
//! Every step is a single-row statement, ordered so that an interruption
//! leaves the entity recoverable: trash-insert before active-delete on
//! soft-delete, active-insert before trash-delete on restore. The
//! `UNIQUE (owner_id, name)` and primary-key constraints arbitrate races;
//! the naming resolver's pre-check only picks the candidate name.

use crate::{
    errors::{LifecycleError, LifecycleResult},
    models::{
        collection::{Collection, CollectionDetails},
        ident::ObjectId,
        quota::{QuotaAccount, QuotaUnit},
        record::{Record, RecordKind},
        trash::{EntityKind, TrashEntry, TrashSnapshot},
    },
    services::{
        blob_store::BlobStore,
        membership::MembershipIndex,
        naming::{self, ActiveName, NamingPolicy},
        quota::QuotaLedger,
    },
};
use bytes::Bytes;
use chrono::{Duration, Utc};
use futures::Stream;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite, types::Json};
use std::{collections::BTreeSet, io, sync::Arc};
use tokio::fs::File;
use tracing::{debug, info, warn};
use uuid::Uuid;

const RECORD_COLUMNS: &str = "id, owner_id, name, size_bytes, kind, payload_handle, created_at, \
                              description, share_token, share_expires_at";
const COLLECTION_COLUMNS: &str = "id, owner_id, name, created_at, updated_at";
const TRASH_COLUMNS: &str =
    "id, kind, original_id, owner_id, name, size_bytes, snapshot, deleted_at";

const RECORD: &str = EntityKind::Record.as_str();
const COLLECTION: &str = EntityKind::Collection.as_str();
const TRASH_ENTRY: &str = "trash entry";
const SHARE: &str = "share";

/// Backstop on how many times a write re-resolves after losing a
/// uniqueness race. Each retry skips every candidate already lost, so this
/// only trips under pathological contention.
const MAX_PLACEMENT_ATTEMPTS: usize = 64;
const MAX_PAGE_SIZE: i64 = 100;

/// Outcome of a restore.
#[derive(Debug)]
pub struct Restored<T> {
    pub entity: T,
    /// The original identifier was occupied and a new one was minted.
    pub identity_changed: bool,
    /// The original name was taken and the resolver picked another.
    pub renamed: bool,
    /// Counterpart identifiers re-linked in the membership index.
    pub relinked: Vec<ObjectId>,
}

#[derive(Debug)]
pub struct RecordPage {
    pub records: Vec<Record>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub pages: i64,
}

#[derive(Debug, Default)]
struct Placement {
    identity_changed: bool,
    renamed: bool,
}

/// Which uniqueness constraint an insert tripped.
enum Conflict {
    Identifier,
    Name,
}

fn unique_conflict(err: &sqlx::Error, table: &str) -> Option<Conflict> {
    match err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            let message = db_err.message();
            if message.contains(&format!("{table}.id")) {
                Some(Conflict::Identifier)
            } else if message.contains(&format!("{table}.name")) {
                Some(Conflict::Name)
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Remember a candidate name that lost a uniqueness race so the next
/// resolution moves past it even if the winner is not yet visible.
fn lost_race(lost: &mut Vec<ActiveName>, name: &str) {
    lost.push(ActiveName {
        id: ObjectId::mint(),
        name: name.to_string(),
    });
}

fn ensure_owner(owner: &str) -> LifecycleResult<()> {
    if owner.trim().is_empty() {
        return Err(LifecycleError::InvalidInput("owner must not be empty".into()));
    }
    Ok(())
}

fn check_owner(kind: &'static str, id: &ObjectId, actual: &str, owner: &str) -> LifecycleResult<()> {
    if actual == owner {
        Ok(())
    } else {
        Err(LifecycleError::PermissionDenied {
            kind,
            id: id.to_string(),
        })
    }
}

fn table(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Record => "records",
        EntityKind::Collection => "collections",
    }
}

#[derive(Clone)]
pub struct LifecycleManager {
    /// Shared SQLite pool holding both stores.
    db: Arc<SqlitePool>,
    blobs: BlobStore,
    quota: QuotaLedger,
    members: MembershipIndex,
}

impl LifecycleManager {
    pub fn new(db: Arc<SqlitePool>, blobs: BlobStore, default_quota_mb: i64) -> Self {
        Self {
            quota: QuotaLedger::new(db.clone(), default_quota_mb),
            members: MembershipIndex::new(db.clone()),
            db,
            blobs,
        }
    }

    pub fn db(&self) -> &SqlitePool {
        &self.db
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    // ----------------------------------------------------------------
    // Lookups
    // ----------------------------------------------------------------

    async fn active_record(&self, id: &ObjectId, owner: &str) -> LifecycleResult<Record> {
        let record = sqlx::query_as::<_, Record>(&format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| LifecycleError::not_found(RECORD, id))?;
        check_owner(RECORD, id, &record.owner_id, owner)?;
        Ok(record)
    }

    async fn active_collection(&self, id: &ObjectId, owner: &str) -> LifecycleResult<Collection> {
        let collection = sqlx::query_as::<_, Collection>(&format!(
            "SELECT {COLLECTION_COLUMNS} FROM collections WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| LifecycleError::not_found(COLLECTION, id))?;
        check_owner(COLLECTION, id, &collection.owner_id, owner)?;
        Ok(collection)
    }

    /// Active names of `owner` that could collide with `desired`: the name
    /// itself plus every `stem(...)` candidate.
    async fn active_names(
        &self,
        kind: EntityKind,
        owner: &str,
        desired: &str,
    ) -> LifecycleResult<Vec<ActiveName>> {
        let prefix = naming::sequence_prefix(desired);
        let names = sqlx::query_as::<_, ActiveName>(&format!(
            "SELECT id, name FROM {} WHERE owner_id = ? AND (name = ? OR substr(name, 1, ?) = ?)",
            table(kind)
        ))
        .bind(owner)
        .bind(desired)
        .bind(prefix.chars().count() as i64)
        .bind(&prefix)
        .fetch_all(&*self.db)
        .await?;
        Ok(names)
    }

    /// Find a trash entry by original identifier, falling back to the
    /// entry's own identifier.
    async fn locate_trash(
        &self,
        kind: Option<EntityKind>,
        id: &ObjectId,
        owner: &str,
    ) -> LifecycleResult<TrashEntry> {
        let entry = match self.find_trash("original_id", kind, id, owner).await? {
            Some(entry) => entry,
            None => self
                .find_trash("id", kind, id, owner)
                .await?
                .ok_or_else(|| {
                    LifecycleError::not_found(kind.map_or(TRASH_ENTRY, EntityKind::as_str), id)
                })?,
        };
        check_owner(entry.kind.as_str(), id, &entry.owner_id, owner)?;
        Ok(entry)
    }

    async fn find_trash(
        &self,
        column: &'static str,
        kind: Option<EntityKind>,
        id: &ObjectId,
        owner: &str,
    ) -> LifecycleResult<Option<TrashEntry>> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {TRASH_COLUMNS} FROM trash_entries WHERE {column} = "
        ));
        builder.push_bind(id.clone());
        if let Some(kind) = kind {
            builder.push(" AND kind = ");
            builder.push_bind(kind);
        }
        // Prefer the caller's own entry, then the most recent deletion.
        builder.push(" ORDER BY owner_id = ");
        builder.push_bind(owner.to_string());
        builder.push(" DESC, deleted_at DESC LIMIT 1");

        let entry = builder
            .build_query_as::<TrashEntry>()
            .fetch_optional(&*self.db)
            .await?;
        Ok(entry)
    }

    // ----------------------------------------------------------------
    // Store primitives
    // ----------------------------------------------------------------

    async fn insert_record(&self, record: &Record) -> Result<(), sqlx::Error> {
        sqlx::query(&format!(
            "INSERT INTO records ({RECORD_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&record.id)
        .bind(&record.owner_id)
        .bind(&record.name)
        .bind(record.size_bytes)
        .bind(record.kind)
        .bind(&record.payload_handle)
        .bind(record.created_at)
        .bind(&record.description)
        .bind(&record.share_token)
        .bind(record.share_expires_at)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn insert_collection(&self, collection: &Collection) -> Result<(), sqlx::Error> {
        sqlx::query(&format!(
            "INSERT INTO collections ({COLLECTION_COLUMNS}) VALUES (?, ?, ?, ?, ?)"
        ))
        .bind(&collection.id)
        .bind(&collection.owner_id)
        .bind(&collection.name)
        .bind(collection.created_at)
        .bind(collection.updated_at)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn insert_trash(&self, entry: &TrashEntry) -> LifecycleResult<()> {
        sqlx::query(&format!(
            "INSERT INTO trash_entries ({TRASH_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&entry.id)
        .bind(entry.kind)
        .bind(&entry.original_id)
        .bind(&entry.owner_id)
        .bind(&entry.name)
        .bind(entry.size_bytes)
        .bind(&entry.snapshot)
        .bind(entry.deleted_at)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    /// Delete a trash entry; `false` if it was already gone.
    async fn delete_trash(&self, trash_id: &ObjectId) -> LifecycleResult<bool> {
        let result = sqlx::query("DELETE FROM trash_entries WHERE id = ?")
            .bind(trash_id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Insert `record` into the Active Store under a unique name.
    ///
    /// The record's current name is the desired one; on collision the
    /// silent policy applies the resolver's suggestion. If the record's
    /// identifier is occupied a new one is minted.
    async fn place_record(&self, record: &mut Record) -> LifecycleResult<Placement> {
        let desired = record.name.clone();
        let mut placement = Placement::default();
        let mut lost = Vec::new();
        for _ in 0..MAX_PLACEMENT_ATTEMPTS {
            let mut existing = self
                .active_names(EntityKind::Record, &record.owner_id, &desired)
                .await?;
            existing.extend(lost.iter().cloned());
            record.name = naming::resolve(&desired, &existing, None)
                .apply(EntityKind::Record, NamingPolicy::Silent)?;
            match self.insert_record(record).await {
                Ok(()) => {
                    placement.renamed = record.name != desired;
                    return Ok(placement);
                }
                Err(err) => match unique_conflict(&err, "records") {
                    Some(Conflict::Identifier) => {
                        debug!(id = %record.id, "record identifier occupied, minting a new one");
                        record.id = ObjectId::mint();
                        placement.identity_changed = true;
                    }
                    Some(Conflict::Name) => {
                        debug!(owner = %record.owner_id, name = %record.name, "lost a name race, resolving again");
                        lost_race(&mut lost, &record.name);
                    }
                    None => return Err(err.into()),
                },
            }
        }
        warn!(owner = %record.owner_id, name = %desired, "giving up placing record after repeated conflicts");
        Err(LifecycleError::Contention {
            kind: EntityKind::Record,
            name: desired,
        })
    }

    async fn place_collection(&self, collection: &mut Collection) -> LifecycleResult<Placement> {
        let desired = collection.name.clone();
        let mut placement = Placement::default();
        let mut lost = Vec::new();
        for _ in 0..MAX_PLACEMENT_ATTEMPTS {
            let mut existing = self
                .active_names(EntityKind::Collection, &collection.owner_id, &desired)
                .await?;
            existing.extend(lost.iter().cloned());
            collection.name = naming::resolve(&desired, &existing, None)
                .apply(EntityKind::Collection, NamingPolicy::Silent)?;
            match self.insert_collection(collection).await {
                Ok(()) => {
                    placement.renamed = collection.name != desired;
                    return Ok(placement);
                }
                Err(err) => match unique_conflict(&err, "collections") {
                    Some(Conflict::Identifier) => {
                        debug!(id = %collection.id, "collection identifier occupied, minting a new one");
                        collection.id = ObjectId::mint();
                        placement.identity_changed = true;
                    }
                    Some(Conflict::Name) => {
                        debug!(owner = %collection.owner_id, name = %collection.name, "lost a name race, resolving again");
                        lost_race(&mut lost, &collection.name);
                    }
                    None => return Err(err.into()),
                },
            }
        }
        warn!(owner = %collection.owner_id, name = %desired, "giving up placing collection after repeated conflicts");
        Err(LifecycleError::Contention {
            kind: EntityKind::Collection,
            name: desired,
        })
    }

    async fn discard_blob(&self, handle: &str) {
        if let Err(err) = self.blobs.delete(handle).await {
            warn!(handle, error = %err, "failed to remove payload");
        }
    }

    // ----------------------------------------------------------------
    // Records
    // ----------------------------------------------------------------

    /// Store a new record for `owner` (upload path, silent naming policy).
    ///
    /// The payload is written first, then its size is reserved against the
    /// owner's quota, then the metadata row is inserted. Each failure undoes
    /// the earlier steps.
    pub async fn create_record<S, E>(
        &self,
        owner: &str,
        name: &str,
        description: &str,
        payload: S,
    ) -> LifecycleResult<Record>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        ensure_owner(owner)?;
        let desired = naming::sanitize(name)?;

        let blob = self.blobs.put_stream(payload).await?;
        debug!(owner, handle = %blob.handle, etag = %blob.etag, "payload stored");
        if blob.size_bytes == 0 {
            self.discard_blob(&blob.handle).await;
            return Err(LifecycleError::InvalidInput(format!(
                "empty payload for `{desired}`"
            )));
        }
        if let Err(err) = self.quota.consume(owner, blob.size_bytes).await {
            self.discard_blob(&blob.handle).await;
            return Err(err);
        }

        let mut record = Record {
            id: ObjectId::mint(),
            owner_id: owner.to_string(),
            kind: RecordKind::from_name(&desired),
            name: desired,
            size_bytes: blob.size_bytes,
            payload_handle: blob.handle,
            created_at: Utc::now(),
            description: description.trim().to_string(),
            share_token: None,
            share_expires_at: None,
        };

        if let Err(err) = self.place_record(&mut record).await {
            if let Err(release_err) = self.quota.release(owner, record.size_bytes).await {
                warn!(owner, error = %release_err, "failed to release quota after aborted upload");
            }
            self.discard_blob(&record.payload_handle).await;
            return Err(err);
        }

        info!(owner, id = %record.id, name = %record.name, size = record.size_bytes, "record created");
        Ok(record)
    }

    pub async fn get_record(&self, id: &str, owner: &str) -> LifecycleResult<Record> {
        let id = ObjectId::parse(id)?;
        ensure_owner(owner)?;
        self.active_record(&id, owner).await
    }

    /// Active records of `owner`, newest first.
    pub async fn list_records(
        &self,
        owner: &str,
        kind: Option<RecordKind>,
        page: i64,
        per_page: i64,
    ) -> LifecycleResult<RecordPage> {
        ensure_owner(owner)?;
        let page = page.max(1);
        let per_page = per_page.clamp(1, MAX_PAGE_SIZE);

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM records WHERE owner_id = ");
        count.push_bind(owner.to_string());
        if let Some(kind) = kind {
            count.push(" AND kind = ");
            count.push_bind(kind);
        }
        let total: i64 = count.build_query_scalar().fetch_one(&*self.db).await?;

        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE owner_id = "
        ));
        builder.push_bind(owner.to_string());
        if let Some(kind) = kind {
            builder.push(" AND kind = ");
            builder.push_bind(kind);
        }
        builder.push(" ORDER BY created_at DESC, id DESC LIMIT ");
        builder.push_bind(per_page);
        builder.push(" OFFSET ");
        builder.push_bind((page - 1).saturating_mul(per_page));
        let records = builder
            .build_query_as::<Record>()
            .fetch_all(&*self.db)
            .await?;

        Ok(RecordPage {
            records,
            total,
            page,
            per_page,
            pages: (total + per_page - 1) / per_page,
        })
    }

    /// Record metadata plus an open handle on its payload.
    pub async fn open_record(&self, id: &str, owner: &str) -> LifecycleResult<(Record, File)> {
        let record = self.get_record(id, owner).await?;
        let file = self.open_payload(&record).await?;
        Ok((record, file))
    }

    async fn open_payload(&self, record: &Record) -> LifecycleResult<File> {
        self.blobs
            .open(&record.payload_handle)
            .await
            .map_err(|err| match err.kind() {
                io::ErrorKind::NotFound => LifecycleError::not_found(RECORD, &record.id),
                _ => LifecycleError::Io(err),
            })
    }

    /// Rename an active record (confirm-first naming policy).
    ///
    /// If the current name has an extension and `new_name` has none, the
    /// old extension is kept. Without `force`, a collision is reported as
    /// `NameCollision` carrying the suggested name.
    pub async fn rename_record(
        &self,
        id: &str,
        owner: &str,
        new_name: &str,
        force: bool,
    ) -> LifecycleResult<Record> {
        let id = ObjectId::parse(id)?;
        ensure_owner(owner)?;
        let mut desired = naming::sanitize(new_name)?;
        let record = self.active_record(&id, owner).await?;

        let old_ext = naming::split_name(&record.name).1.to_string();
        if !old_ext.is_empty() && naming::split_name(&desired).1.is_empty() {
            desired.push_str(&old_ext);
        }
        if desired == record.name {
            return Ok(record);
        }

        let policy = NamingPolicy::ConfirmFirst { force };
        let mut lost = Vec::new();
        for _ in 0..MAX_PLACEMENT_ATTEMPTS {
            let mut existing = self
                .active_names(EntityKind::Record, owner, &desired)
                .await?;
            existing.extend(lost.iter().cloned());
            let name = naming::resolve(&desired, &existing, Some(&id))
                .apply(EntityKind::Record, policy)?;
            let result = sqlx::query_as::<_, Record>(&format!(
                "UPDATE records SET name = ? WHERE id = ? AND owner_id = ? RETURNING {RECORD_COLUMNS}"
            ))
            .bind(&name)
            .bind(&id)
            .bind(owner)
            .fetch_optional(&*self.db)
            .await;
            match result {
                Ok(Some(updated)) => {
                    info!(owner, id = %id, from = %record.name, to = %updated.name, "record renamed");
                    return Ok(updated);
                }
                Ok(None) => return Err(LifecycleError::not_found(RECORD, &id)),
                Err(err) => match unique_conflict(&err, "records") {
                    Some(Conflict::Name) => {
                        debug!(owner, name = %name, "rename lost a name race, resolving again");
                        lost_race(&mut lost, &name);
                    }
                    _ => return Err(err.into()),
                },
            }
        }
        warn!(owner, id = %id, name = %desired, "giving up rename after repeated conflicts");
        Err(LifecycleError::Contention {
            kind: EntityKind::Record,
            name: desired,
        })
    }

    /// Move an active record to the Trash Store.
    ///
    /// The snapshot remembers the record's collections; the record is
    /// stripped from them so live member sets only reference active records.
    /// Share tokens do not survive the trip through the trash.
    pub async fn soft_delete_record(&self, id: &str, owner: &str) -> LifecycleResult<TrashEntry> {
        let id = ObjectId::parse(id)?;
        ensure_owner(owner)?;
        let mut record = self.active_record(&id, owner).await?;
        let collections = self.members.collections_of(&id, owner).await?;
        record.share_token = None;
        record.share_expires_at = None;

        let entry = TrashEntry {
            id: ObjectId::mint(),
            kind: EntityKind::Record,
            original_id: id.clone(),
            owner_id: owner.to_string(),
            name: record.name.clone(),
            size_bytes: record.size_bytes,
            snapshot: Json(TrashSnapshot::Record {
                record,
                collections,
            }),
            deleted_at: Utc::now(),
        };
        self.insert_trash(&entry).await?;

        let removed = sqlx::query("DELETE FROM records WHERE id = ? AND owner_id = ?")
            .bind(&id)
            .bind(owner)
            .execute(&*self.db)
            .await?;
        if removed.rows_affected() == 0 {
            // A concurrent soft-delete won; drop our duplicate snapshot.
            self.delete_trash(&entry.id).await?;
            return Err(LifecycleError::not_found(RECORD, &id));
        }
        self.members.strip_record(&id, owner).await?;

        info!(owner, id = %id, trash_id = %entry.id, name = %entry.name, "record moved to trash");
        Ok(entry)
    }

    /// Bring a trashed record back into the Active Store.
    ///
    /// `id` may be the record's original identifier or the trash entry's
    /// own. The original identifier is reused when free; otherwise a new one
    /// is minted and `identity_changed` is set. The record is re-linked,
    /// under whatever identifier it ends up with, to each collection it
    /// belonged to that is still active.
    pub async fn restore_record(&self, id: &str, owner: &str) -> LifecycleResult<Restored<Record>> {
        let id = ObjectId::parse(id)?;
        ensure_owner(owner)?;
        let entry = self
            .locate_trash(Some(EntityKind::Record), &id, owner)
            .await?;
        let Json(snapshot) = entry.snapshot;
        let TrashSnapshot::Record {
            mut record,
            collections,
        } = snapshot
        else {
            return Err(LifecycleError::not_found(RECORD, &id));
        };

        let placement = self.place_record(&mut record).await?;
        if !self.delete_trash(&entry.id).await? {
            // A concurrent restore or purge consumed the entry first.
            sqlx::query("DELETE FROM records WHERE id = ?")
                .bind(&record.id)
                .execute(&*self.db)
                .await?;
            return Err(LifecycleError::not_found(RECORD, &id));
        }
        let relinked = self
            .members
            .relink_record(&record.id, owner, &collections)
            .await?;

        info!(
            owner,
            original_id = %entry.original_id,
            id = %record.id,
            identity_changed = placement.identity_changed,
            renamed = placement.renamed,
            "record restored"
        );
        Ok(Restored {
            entity: record,
            identity_changed: placement.identity_changed,
            renamed: placement.renamed,
            relinked,
        })
    }

    /// Permanently delete a trashed record, its payload and every
    /// remaining membership link to it.
    pub async fn purge_record(&self, id: &str, owner: &str) -> LifecycleResult<TrashEntry> {
        let id = ObjectId::parse(id)?;
        ensure_owner(owner)?;
        let entry = self
            .locate_trash(Some(EntityKind::Record), &id, owner)
            .await?;
        self.purge_entry(entry).await
    }

    /// Purge whatever `id` names in the owner's trash.
    pub async fn purge_trash_entry(&self, id: &str, owner: &str) -> LifecycleResult<TrashEntry> {
        let id = ObjectId::parse(id)?;
        ensure_owner(owner)?;
        let entry = self.locate_trash(None, &id, owner).await?;
        self.purge_entry(entry).await
    }

    async fn purge_entry(&self, entry: TrashEntry) -> LifecycleResult<TrashEntry> {
        if !self.delete_trash(&entry.id).await? {
            return Err(LifecycleError::not_found(
                entry.kind.as_str(),
                &entry.original_id,
            ));
        }

        match &entry.snapshot.0 {
            TrashSnapshot::Record { record, .. } => {
                let stripped = self
                    .members
                    .strip_dangling(&entry.original_id, &entry.owner_id)
                    .await?;
                self.quota
                    .release(&entry.owner_id, record.size_bytes)
                    .await?;
                self.discard_blob(&record.payload_handle).await;
                info!(owner = %entry.owner_id, id = %entry.original_id, stripped, "record purged");
            }
            TrashSnapshot::Collection { .. } => {
                // Links left behind by an interrupted soft-delete, unless the
                // identifier has been reused by an active collection.
                let stripped = sqlx::query(
                    "DELETE FROM collection_members WHERE collection_id = ?
                       AND NOT EXISTS (SELECT 1 FROM collections WHERE id = ?)",
                )
                .bind(&entry.original_id)
                .bind(&entry.original_id)
                .execute(&*self.db)
                .await?
                .rows_affected();
                info!(owner = %entry.owner_id, id = %entry.original_id, stripped, "collection purged");
            }
        }
        Ok(entry)
    }

    /// Trash entries of `owner`, most recently deleted first.
    pub async fn list_trash(&self, owner: &str) -> LifecycleResult<Vec<TrashEntry>> {
        ensure_owner(owner)?;
        let entries = sqlx::query_as::<_, TrashEntry>(&format!(
            "SELECT {TRASH_COLUMNS} FROM trash_entries WHERE owner_id = ?
             ORDER BY deleted_at DESC, id DESC"
        ))
        .bind(owner)
        .fetch_all(&*self.db)
        .await?;
        Ok(entries)
    }

    // ----------------------------------------------------------------
    // Sharing
    // ----------------------------------------------------------------

    /// Mint a public share token for an active record, replacing any
    /// previous one. `ttl_secs` of `None` means the token never expires.
    pub async fn share_record(
        &self,
        id: &str,
        owner: &str,
        ttl_secs: Option<i64>,
    ) -> LifecycleResult<Record> {
        let id = ObjectId::parse(id)?;
        ensure_owner(owner)?;
        let expires_at = match ttl_secs {
            Some(secs) if secs <= 0 => {
                return Err(LifecycleError::InvalidInput(
                    "share lifetime must be positive".into(),
                ));
            }
            Some(secs) => Some(
                Utc::now()
                    + Duration::try_seconds(secs).ok_or_else(|| {
                        LifecycleError::InvalidInput("share lifetime too large".into())
                    })?,
            ),
            None => None,
        };
        self.active_record(&id, owner).await?;

        let token = Uuid::new_v4().simple().to_string();
        let record = self.set_share(&id, owner, Some(token), expires_at).await?;
        info!(owner, id = %id, expires_at = ?record.share_expires_at, "record shared");
        Ok(record)
    }

    pub async fn unshare_record(&self, id: &str, owner: &str) -> LifecycleResult<Record> {
        let id = ObjectId::parse(id)?;
        ensure_owner(owner)?;
        self.active_record(&id, owner).await?;
        self.set_share(&id, owner, None, None).await
    }

    async fn set_share(
        &self,
        id: &ObjectId,
        owner: &str,
        token: Option<String>,
        expires_at: Option<chrono::DateTime<Utc>>,
    ) -> LifecycleResult<Record> {
        sqlx::query_as::<_, Record>(&format!(
            "UPDATE records SET share_token = ?, share_expires_at = ?
             WHERE id = ? AND owner_id = ? RETURNING {RECORD_COLUMNS}"
        ))
        .bind(token)
        .bind(expires_at)
        .bind(id)
        .bind(owner)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| LifecycleError::not_found(RECORD, id))
    }

    /// Resolve a public share token to an active record and its payload.
    pub async fn open_shared(&self, token: &str) -> LifecycleResult<(Record, File)> {
        if token.len() != 32 || !token.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(LifecycleError::not_found(SHARE, token));
        }
        let record = sqlx::query_as::<_, Record>(&format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE share_token = ?"
        ))
        .bind(token)
        .fetch_optional(&*self.db)
        .await?
        .filter(|r| r.share_expires_at.is_none_or(|at| at > Utc::now()))
        .ok_or_else(|| LifecycleError::not_found(SHARE, token))?;
        let file = self.open_payload(&record).await?;
        Ok((record, file))
    }

    // ----------------------------------------------------------------
    // Collections
    // ----------------------------------------------------------------

    pub async fn create_collection(&self, owner: &str, name: &str) -> LifecycleResult<Collection> {
        ensure_owner(owner)?;
        let name = naming::sanitize(name)?;
        let now = Utc::now();
        let mut collection = Collection {
            id: ObjectId::mint(),
            owner_id: owner.to_string(),
            name,
            created_at: now,
            updated_at: now,
        };
        self.place_collection(&mut collection).await?;
        info!(owner, id = %collection.id, name = %collection.name, "collection created");
        Ok(collection)
    }

    pub async fn get_collection(&self, id: &str, owner: &str) -> LifecycleResult<CollectionDetails> {
        let id = ObjectId::parse(id)?;
        ensure_owner(owner)?;
        let collection = self.active_collection(&id, owner).await?;
        self.details(collection).await
    }

    async fn details(&self, collection: Collection) -> LifecycleResult<CollectionDetails> {
        let member_count = self.members.count(&collection.id).await?;
        Ok(CollectionDetails {
            collection,
            member_count,
        })
    }

    pub async fn list_collections(&self, owner: &str) -> LifecycleResult<Vec<CollectionDetails>> {
        ensure_owner(owner)?;
        let collections = sqlx::query_as::<_, CollectionDetails>(
            "SELECT c.id, c.owner_id, c.name, c.created_at, c.updated_at,
                    (SELECT COUNT(*) FROM collection_members m WHERE m.collection_id = c.id)
                        AS member_count
             FROM collections c WHERE c.owner_id = ?
             ORDER BY c.created_at DESC, c.id DESC",
        )
        .bind(owner)
        .fetch_all(&*self.db)
        .await?;
        Ok(collections)
    }

    /// Rename an active collection (confirm-first naming policy).
    pub async fn rename_collection(
        &self,
        id: &str,
        owner: &str,
        new_name: &str,
        force: bool,
    ) -> LifecycleResult<Collection> {
        let id = ObjectId::parse(id)?;
        ensure_owner(owner)?;
        let desired = naming::sanitize(new_name)?;
        let collection = self.active_collection(&id, owner).await?;
        if desired == collection.name {
            return Ok(collection);
        }

        let policy = NamingPolicy::ConfirmFirst { force };
        let mut lost = Vec::new();
        for _ in 0..MAX_PLACEMENT_ATTEMPTS {
            let mut existing = self
                .active_names(EntityKind::Collection, owner, &desired)
                .await?;
            existing.extend(lost.iter().cloned());
            let name = naming::resolve(&desired, &existing, Some(&id))
                .apply(EntityKind::Collection, policy)?;
            let result = sqlx::query_as::<_, Collection>(&format!(
                "UPDATE collections SET name = ?, updated_at = ? WHERE id = ? AND owner_id = ?
                 RETURNING {COLLECTION_COLUMNS}"
            ))
            .bind(&name)
            .bind(Utc::now())
            .bind(&id)
            .bind(owner)
            .fetch_optional(&*self.db)
            .await;
            match result {
                Ok(Some(updated)) => {
                    info!(owner, id = %id, from = %collection.name, to = %updated.name, "collection renamed");
                    return Ok(updated);
                }
                Ok(None) => return Err(LifecycleError::not_found(COLLECTION, &id)),
                Err(err) => match unique_conflict(&err, "collections") {
                    Some(Conflict::Name) => {
                        debug!(owner, name = %name, "rename lost a name race, resolving again");
                        lost_race(&mut lost, &name);
                    }
                    _ => return Err(err.into()),
                },
            }
        }
        warn!(owner, id = %id, name = %desired, "giving up rename after repeated conflicts");
        Err(LifecycleError::Contention {
            kind: EntityKind::Collection,
            name: desired,
        })
    }

    /// Move an active collection, with a snapshot of its member set, to the
    /// Trash Store. Member records themselves are untouched.
    pub async fn soft_delete_collection(&self, id: &str, owner: &str) -> LifecycleResult<TrashEntry> {
        let id = ObjectId::parse(id)?;
        ensure_owner(owner)?;
        let collection = self.active_collection(&id, owner).await?;
        let members: Vec<ObjectId> = self.members.members(&id).await?.into_iter().collect();

        let entry = TrashEntry {
            id: ObjectId::mint(),
            kind: EntityKind::Collection,
            original_id: id.clone(),
            owner_id: owner.to_string(),
            name: collection.name.clone(),
            size_bytes: 0,
            snapshot: Json(TrashSnapshot::Collection {
                collection,
                members,
            }),
            deleted_at: Utc::now(),
        };
        self.insert_trash(&entry).await?;

        let removed = sqlx::query("DELETE FROM collections WHERE id = ? AND owner_id = ?")
            .bind(&id)
            .bind(owner)
            .execute(&*self.db)
            .await?;
        if removed.rows_affected() == 0 {
            self.delete_trash(&entry.id).await?;
            return Err(LifecycleError::not_found(COLLECTION, &id));
        }
        self.members.clear_collection(&id).await?;

        info!(owner, id = %id, trash_id = %entry.id, name = %entry.name, "collection moved to trash");
        Ok(entry)
    }

    /// Bring a trashed collection back, re-adding the snapshotted members
    /// that are still active records of the owner.
    pub async fn restore_collection(
        &self,
        id: &str,
        owner: &str,
    ) -> LifecycleResult<Restored<Collection>> {
        let id = ObjectId::parse(id)?;
        ensure_owner(owner)?;
        let entry = self
            .locate_trash(Some(EntityKind::Collection), &id, owner)
            .await?;
        let Json(snapshot) = entry.snapshot;
        let TrashSnapshot::Collection {
            mut collection,
            members,
        } = snapshot
        else {
            return Err(LifecycleError::not_found(COLLECTION, &id));
        };
        collection.updated_at = Utc::now();

        let placement = self.place_collection(&mut collection).await?;
        if !self.delete_trash(&entry.id).await? {
            sqlx::query("DELETE FROM collections WHERE id = ?")
                .bind(&collection.id)
                .execute(&*self.db)
                .await?;
            return Err(LifecycleError::not_found(COLLECTION, &id));
        }
        let relinked = self
            .members
            .relink_collection(&collection.id, owner, &members)
            .await?;

        info!(
            owner,
            original_id = %entry.original_id,
            id = %collection.id,
            identity_changed = placement.identity_changed,
            renamed = placement.renamed,
            "collection restored"
        );
        Ok(Restored {
            entity: collection,
            identity_changed: placement.identity_changed,
            renamed: placement.renamed,
            relinked,
        })
    }

    pub async fn purge_collection(&self, id: &str, owner: &str) -> LifecycleResult<TrashEntry> {
        let id = ObjectId::parse(id)?;
        ensure_owner(owner)?;
        let entry = self
            .locate_trash(Some(EntityKind::Collection), &id, owner)
            .await?;
        self.purge_entry(entry).await
    }

    // ----------------------------------------------------------------
    // Membership
    // ----------------------------------------------------------------

    async fn touch_collection(&self, id: &ObjectId) -> LifecycleResult<Collection> {
        sqlx::query_as::<_, Collection>(&format!(
            "UPDATE collections SET updated_at = ? WHERE id = ? RETURNING {COLLECTION_COLUMNS}"
        ))
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| LifecycleError::not_found(COLLECTION, id))
    }

    /// Add an active record to an active collection of the same owner.
    /// Adding an existing member changes nothing.
    pub async fn add_member(
        &self,
        collection_id: &str,
        owner: &str,
        record_id: &str,
    ) -> LifecycleResult<CollectionDetails> {
        let collection_id = ObjectId::parse(collection_id)?;
        let record_id = ObjectId::parse(record_id)?;
        ensure_owner(owner)?;
        let mut collection = self.active_collection(&collection_id, owner).await?;
        self.active_record(&record_id, owner).await?;

        if self.members.link(&collection_id, owner, &record_id).await? {
            collection = self.touch_collection(&collection_id).await?;
            info!(owner, collection = %collection_id, record = %record_id, "member added");
        }
        self.details(collection).await
    }

    /// Remove a record identifier from a collection. The record does not
    /// need to be active, so dangling identifiers can be cleaned up too.
    pub async fn remove_member(
        &self,
        collection_id: &str,
        owner: &str,
        record_id: &str,
    ) -> LifecycleResult<CollectionDetails> {
        let collection_id = ObjectId::parse(collection_id)?;
        let record_id = ObjectId::parse(record_id)?;
        ensure_owner(owner)?;
        let mut collection = self.active_collection(&collection_id, owner).await?;

        if self.members.unlink(&collection_id, owner, &record_id).await? {
            collection = self.touch_collection(&collection_id).await?;
            info!(owner, collection = %collection_id, record = %record_id, "member removed");
        }
        self.details(collection).await
    }

    pub async fn list_members(
        &self,
        collection_id: &str,
        owner: &str,
    ) -> LifecycleResult<BTreeSet<ObjectId>> {
        let collection_id = ObjectId::parse(collection_id)?;
        ensure_owner(owner)?;
        self.active_collection(&collection_id, owner).await?;
        self.members.members(&collection_id).await
    }

    // ----------------------------------------------------------------
    // Quota
    // ----------------------------------------------------------------

    pub async fn increase_quota(
        &self,
        owner: &str,
        amount: i64,
        unit: QuotaUnit,
    ) -> LifecycleResult<QuotaAccount> {
        ensure_owner(owner)?;
        self.quota.increase(owner, amount, unit).await
    }

    pub async fn get_quota(&self, owner: &str) -> LifecycleResult<QuotaAccount> {
        ensure_owner(owner)?;
        self.quota.account(owner).await
    }
}
