//! Represents a named, owner-scoped grouping of records.

use super::ident::ObjectId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A collection in the Active Store.
///
/// Member record identifiers are not stored on the row; they live in the
/// `collection_members` table maintained by the membership index.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct Collection {
    pub id: ObjectId,
    pub owner_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A collection together with its current member count.
#[derive(Serialize, Clone, FromRow, Debug)]
pub struct CollectionDetails {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub collection: Collection,
    pub member_count: i64,
}
