//! Trash Store entries: snapshots of soft-deleted records and collections.

use super::{collection::Collection, ident::ObjectId, record::Record};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use std::fmt;

/// Which kind of entity a trash entry (or lookup) refers to.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum EntityKind {
    Record,
    Collection,
}

impl EntityKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Record => "record",
            Self::Collection => "collection",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full copy of the entity at the moment it was trashed.
///
/// Records also remember which collections they belonged to and collections
/// remember their members, so restore can re-link the membership index.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TrashSnapshot {
    Record {
        record: Record,
        collections: Vec<ObjectId>,
    },
    Collection {
        collection: Collection,
        members: Vec<ObjectId>,
    },
}

/// A row of the Trash Store.
#[derive(Clone, FromRow, Debug)]
pub struct TrashEntry {
    /// The entry's own identifier.
    pub id: ObjectId,
    pub kind: EntityKind,
    /// Identifier the entity had in the Active Store.
    pub original_id: ObjectId,
    pub owner_id: String,
    pub name: String,
    pub size_bytes: i64,
    pub snapshot: Json<TrashSnapshot>,
    pub deleted_at: DateTime<Utc>,
}
