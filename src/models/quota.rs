//! Per-owner storage allowance.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Bytes in one base unit (MiB).
pub const BYTES_PER_MB: i64 = 1024 * 1024;

/// Largest limit an account may hold, so its size in bytes fits an `i64`.
pub const MAX_LIMIT_MB: i64 = i64::MAX / BYTES_PER_MB;

/// Storage account for one owner. Limits are kept in MiB, usage in bytes.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct QuotaAccount {
    pub owner_id: String,
    pub limit_mb: i64,
    pub used_bytes: i64,
}

impl QuotaAccount {
    pub fn limit_bytes(&self) -> i64 {
        self.limit_mb.saturating_mul(BYTES_PER_MB)
    }

    pub fn available_bytes(&self) -> i64 {
        (self.limit_bytes() - self.used_bytes).max(0)
    }
}

/// Unit accepted by quota increases.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuotaUnit {
    Mb,
    Gb,
    Tb,
}

impl QuotaUnit {
    /// Parse a unit name. Anything unrecognized is treated as the base unit.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "GB" => Self::Gb,
            "TB" => Self::Tb,
            _ => Self::Mb,
        }
    }

    /// Multiplier into MiB.
    pub fn to_mb(self) -> i64 {
        match self {
            Self::Mb => 1,
            Self::Gb => 1024,
            Self::Tb => 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn units_normalize_to_mb() {
        assert_eq!(QuotaUnit::parse("gb").to_mb(), 1024);
        assert_eq!(QuotaUnit::parse("TB").to_mb(), 1024 * 1024);
        assert_eq!(QuotaUnit::parse("MB"), QuotaUnit::Mb);
        assert_eq!(QuotaUnit::parse("bananas"), QuotaUnit::Mb);
    }

    #[test]
    fn available_never_negative() {
        let account = QuotaAccount {
            owner_id: "o".into(),
            limit_mb: 1,
            used_bytes: 2 * BYTES_PER_MB,
        };
        assert_eq!(account.available_bytes(), 0);
    }
}
