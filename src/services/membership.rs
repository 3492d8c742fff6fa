//! MembershipIndex: identifier-only links between collections and records.
//!
//! A link is a `(collection_id, record_id)` row; record data is never copied
//! into a collection. The index does not check that either side exists. The
//! lifecycle manager validates ownership and state before calling in, and
//! calls the reconciliation helpers here on soft-delete, restore and purge.

use crate::{errors::LifecycleResult, models::ident::ObjectId};
use chrono::Utc;
use sqlx::SqlitePool;
use std::{collections::BTreeSet, sync::Arc};

#[derive(Clone)]
pub struct MembershipIndex {
    db: Arc<SqlitePool>,
}

impl MembershipIndex {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Link `record` into `collection`. Returns `false` if it was already a member.
    pub async fn link(
        &self,
        collection: &ObjectId,
        owner: &str,
        record: &ObjectId,
    ) -> LifecycleResult<bool> {
        let result = sqlx::query(
            "INSERT INTO collection_members (collection_id, record_id, owner_id, added_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(collection_id, record_id) DO NOTHING",
        )
        .bind(collection)
        .bind(record)
        .bind(owner)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Unlink `record` from `collection`. Returns `false` if it was not a member.
    pub async fn unlink(
        &self,
        collection: &ObjectId,
        owner: &str,
        record: &ObjectId,
    ) -> LifecycleResult<bool> {
        let result = sqlx::query(
            "DELETE FROM collection_members
             WHERE collection_id = ? AND record_id = ? AND owner_id = ?",
        )
        .bind(collection)
        .bind(record)
        .bind(owner)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn members(&self, collection: &ObjectId) -> LifecycleResult<BTreeSet<ObjectId>> {
        let ids = sqlx::query_scalar::<_, ObjectId>(
            "SELECT record_id FROM collection_members WHERE collection_id = ?",
        )
        .bind(collection)
        .fetch_all(&*self.db)
        .await?;
        Ok(ids.into_iter().collect())
    }

    pub async fn count(&self, collection: &ObjectId) -> LifecycleResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM collection_members WHERE collection_id = ?",
        )
        .bind(collection)
        .fetch_one(&*self.db)
        .await?;
        Ok(count)
    }

    /// Collections of `owner` that currently list `record`.
    pub async fn collections_of(
        &self,
        record: &ObjectId,
        owner: &str,
    ) -> LifecycleResult<Vec<ObjectId>> {
        let ids = sqlx::query_scalar::<_, ObjectId>(
            "SELECT collection_id FROM collection_members
             WHERE record_id = ? AND owner_id = ? ORDER BY collection_id",
        )
        .bind(record)
        .bind(owner)
        .fetch_all(&*self.db)
        .await?;
        Ok(ids)
    }

    /// Remove `record` from every collection of `owner`.
    pub async fn strip_record(&self, record: &ObjectId, owner: &str) -> LifecycleResult<u64> {
        let result =
            sqlx::query("DELETE FROM collection_members WHERE record_id = ? AND owner_id = ?")
                .bind(record)
                .bind(owner)
                .execute(&*self.db)
                .await?;
        Ok(result.rows_affected())
    }

    /// Like [`strip_record`](Self::strip_record), but leaves the links alone
    /// when an active record currently occupies the identifier.
    pub async fn strip_dangling(&self, record: &ObjectId, owner: &str) -> LifecycleResult<u64> {
        let result = sqlx::query(
            "DELETE FROM collection_members
             WHERE record_id = ? AND owner_id = ?
               AND NOT EXISTS (SELECT 1 FROM records WHERE id = ?)",
        )
        .bind(record)
        .bind(owner)
        .bind(record)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected())
    }

    /// Drop every link of `collection`.
    pub async fn clear_collection(&self, collection: &ObjectId) -> LifecycleResult<u64> {
        let result = sqlx::query("DELETE FROM collection_members WHERE collection_id = ?")
            .bind(collection)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected())
    }

    /// Re-link a restored record into each listed collection that is still
    /// active for `owner`. Returns the collections actually linked.
    pub async fn relink_record(
        &self,
        record: &ObjectId,
        owner: &str,
        collections: &[ObjectId],
    ) -> LifecycleResult<Vec<ObjectId>> {
        let now = Utc::now();
        let mut linked = Vec::new();
        for collection in collections {
            let result = sqlx::query(
                "INSERT INTO collection_members (collection_id, record_id, owner_id, added_at)
                 SELECT id, ?, owner_id, ? FROM collections WHERE id = ? AND owner_id = ?
                 ON CONFLICT(collection_id, record_id) DO NOTHING",
            )
            .bind(record)
            .bind(now)
            .bind(collection)
            .bind(owner)
            .execute(&*self.db)
            .await?;
            if result.rows_affected() > 0 {
                linked.push(collection.clone());
            }
        }
        Ok(linked)
    }

    /// Re-add to a restored collection each listed record that is still
    /// active for `owner`. Returns the records actually linked.
    pub async fn relink_collection(
        &self,
        collection: &ObjectId,
        owner: &str,
        members: &[ObjectId],
    ) -> LifecycleResult<Vec<ObjectId>> {
        let now = Utc::now();
        let mut linked = Vec::new();
        for record in members {
            let result = sqlx::query(
                "INSERT INTO collection_members (collection_id, record_id, owner_id, added_at)
                 SELECT ?, id, owner_id, ? FROM records WHERE id = ? AND owner_id = ?
                 ON CONFLICT(collection_id, record_id) DO NOTHING",
            )
            .bind(collection)
            .bind(now)
            .bind(record)
            .bind(owner)
            .execute(&*self.db)
            .await?;
            if result.rows_affected() > 0 {
                linked.push(record.clone());
            }
        }
        Ok(linked)
    }
}
