//! Fixed-width hexadecimal identifiers shared by records, collections and
//! trash entries.

use crate::errors::{LifecycleError, LifecycleResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Number of hex characters in every entity identifier.
pub const OBJECT_ID_LEN: usize = 24;

/// A 12-byte identifier rendered as 24 lowercase hex characters.
///
/// The first four bytes are the big-endian Unix timestamp (seconds) at which
/// the identifier was minted, the remaining eight are random. Identifiers
/// therefore sort roughly by creation time.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    /// Mint a fresh identifier.
    pub fn mint() -> Self {
        let secs = Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32;
        let random = Uuid::new_v4();
        let tail: String = random.as_bytes()[..8]
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        Self(format!("{:08x}{}", secs, tail))
    }

    /// Validate the shape of `raw` before it is ever used in a query.
    ///
    /// Accepts upper- or lowercase hex and normalizes to lowercase.
    pub fn parse(raw: &str) -> LifecycleResult<Self> {
        if raw.len() != OBJECT_ID_LEN || !raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(LifecycleError::InvalidIdentifier(raw.to_string()));
        }
        Ok(Self(raw.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_ids_have_the_fixed_shape() {
        let id = ObjectId::mint();
        assert_eq!(id.as_str().len(), OBJECT_ID_LEN);
        assert!(ObjectId::parse(id.as_str()).is_ok());
        assert_ne!(id, ObjectId::mint());
    }

    #[test]
    fn parse_rejects_wrong_length_and_non_hex() {
        for raw in ["", "abc", "zzzzzzzzzzzzzzzzzzzzzzzz", "0123456789abcdef012345678"] {
            assert!(matches!(
                ObjectId::parse(raw),
                Err(LifecycleError::InvalidIdentifier(_))
            ));
        }
    }

    #[test]
    fn parse_normalizes_case() {
        let id = ObjectId::parse("65A1B2C3D4E5F60718293A4B").unwrap();
        assert_eq!(id.as_str(), "65a1b2c3d4e5f60718293a4b");
    }
}
