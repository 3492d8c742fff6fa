//! QuotaLedger: per-owner storage allowance and consumption.
//!
//! Every mutation is a single guarded `UPDATE`, so concurrent requests for
//! the same owner never lose an increment or overshoot the limit.

use crate::{
    errors::{LifecycleError, LifecycleResult},
    models::quota::{BYTES_PER_MB, MAX_LIMIT_MB, QuotaAccount, QuotaUnit},
};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct QuotaLedger {
    db: Arc<SqlitePool>,
    /// Limit given to accounts created on first use, in MiB.
    default_limit_mb: i64,
}

impl QuotaLedger {
    pub fn new(db: Arc<SqlitePool>, default_limit_mb: i64) -> Self {
        Self {
            db,
            default_limit_mb,
        }
    }

    /// Create the owner's account with the default limit if it is missing.
    async fn ensure_account(&self, owner: &str) -> LifecycleResult<()> {
        sqlx::query(
            "INSERT INTO quota_accounts (owner_id, limit_mb, used_bytes) VALUES (?, ?, 0)
             ON CONFLICT(owner_id) DO NOTHING",
        )
        .bind(owner)
        .bind(self.default_limit_mb)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    pub async fn account(&self, owner: &str) -> LifecycleResult<QuotaAccount> {
        self.ensure_account(owner).await?;
        let account = sqlx::query_as::<_, QuotaAccount>(
            "SELECT owner_id, limit_mb, used_bytes FROM quota_accounts WHERE owner_id = ?",
        )
        .bind(owner)
        .fetch_one(&*self.db)
        .await?;
        Ok(account)
    }

    /// Current limit in MiB.
    pub async fn get_limit(&self, owner: &str) -> LifecycleResult<i64> {
        Ok(self.account(owner).await?.limit_mb)
    }

    /// Raise the owner's limit by `amount` of `unit`.
    ///
    /// Increases are normalized to MiB before being added, so the final
    /// limit depends only on the sum of normalized amounts. An increase that
    /// would lift the limit past `MAX_LIMIT_MB` is rejected and leaves the
    /// account untouched.
    pub async fn increase(
        &self,
        owner: &str,
        amount: i64,
        unit: QuotaUnit,
    ) -> LifecycleResult<QuotaAccount> {
        if amount <= 0 {
            return Err(LifecycleError::InvalidInput(
                "quota increase must be positive".into(),
            ));
        }
        let too_large = || LifecycleError::InvalidInput("quota increase too large".into());
        let delta_mb = amount
            .checked_mul(unit.to_mb())
            .filter(|delta| *delta <= MAX_LIMIT_MB)
            .ok_or_else(too_large)?;

        self.ensure_account(owner).await?;
        // The headroom check happens inside the statement so the sum is never
        // computed past the cap, where SQLite would turn it into a REAL.
        let account = sqlx::query_as::<_, QuotaAccount>(
            "UPDATE quota_accounts SET limit_mb = limit_mb + ?
             WHERE owner_id = ? AND limit_mb <= ? - ?
             RETURNING owner_id, limit_mb, used_bytes",
        )
        .bind(delta_mb)
        .bind(owner)
        .bind(MAX_LIMIT_MB)
        .bind(delta_mb)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(too_large)?;

        tracing::info!(owner, delta_mb, limit_mb = account.limit_mb, "quota increased");
        Ok(account)
    }

    /// Reserve `bytes` against the owner's limit.
    ///
    /// Fails with `QuotaExceeded` without changing anything when the
    /// reservation would not fit.
    pub async fn consume(&self, owner: &str, bytes: i64) -> LifecycleResult<()> {
        if bytes < 0 {
            return Err(LifecycleError::InvalidInput("negative consumption".into()));
        }
        self.ensure_account(owner).await?;
        let result = sqlx::query(
            "UPDATE quota_accounts SET used_bytes = used_bytes + ?
             WHERE owner_id = ? AND used_bytes + ? <= limit_mb * ?",
        )
        .bind(bytes)
        .bind(owner)
        .bind(bytes)
        .bind(BYTES_PER_MB)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            let account = self.account(owner).await?;
            return Err(LifecycleError::QuotaExceeded {
                requested: bytes,
                available: account.available_bytes(),
            });
        }
        Ok(())
    }

    /// Return `bytes` to the owner's allowance. Usage never drops below zero.
    pub async fn release(&self, owner: &str, bytes: i64) -> LifecycleResult<()> {
        if bytes <= 0 {
            return Ok(());
        }
        sqlx::query(
            "UPDATE quota_accounts SET used_bytes = MAX(used_bytes - ?, 0) WHERE owner_id = ?",
        )
        .bind(bytes)
        .bind(owner)
        .execute(&*self.db)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn ledger() -> QuotaLedger {
        QuotaLedger::new(Arc::new(db::memory_pool().await), 10)
    }

    #[tokio::test]
    async fn accounts_start_at_the_default_limit() {
        let ledger = ledger().await;
        assert_eq!(ledger.get_limit("alice").await.unwrap(), 10);
    }

    #[tokio::test]
    async fn increases_are_order_and_grouping_independent() {
        let ledger = ledger().await;
        ledger.increase("alice", 1, QuotaUnit::Gb).await.unwrap();
        ledger.increase("alice", 1024, QuotaUnit::Mb).await.unwrap();
        ledger.increase("bob", 2, QuotaUnit::Gb).await.unwrap();

        assert_eq!(
            ledger.get_limit("alice").await.unwrap(),
            ledger.get_limit("bob").await.unwrap()
        );
        assert_eq!(ledger.get_limit("bob").await.unwrap(), 10 + 2048);
    }

    #[tokio::test]
    async fn unknown_units_count_as_mb() {
        let ledger = ledger().await;
        let account = ledger
            .increase("alice", 5, QuotaUnit::parse("PB"))
            .await
            .unwrap();
        assert_eq!(account.limit_mb, 15);
    }

    #[tokio::test]
    async fn non_positive_increase_is_rejected() {
        let ledger = ledger().await;
        let err = ledger.increase("alice", 0, QuotaUnit::Gb).await.unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn increase_past_the_cap_is_rejected_and_leaves_the_account_readable() {
        let ledger = ledger().await;

        let err = ledger
            .increase("alice", i64::MAX / BYTES_PER_MB, QuotaUnit::Tb)
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidInput(_)));

        let account = ledger
            .increase("alice", MAX_LIMIT_MB - 10, QuotaUnit::Mb)
            .await
            .unwrap();
        assert_eq!(account.limit_mb, MAX_LIMIT_MB);

        let err = ledger.increase("alice", 1, QuotaUnit::Mb).await.unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidInput(_)));
        let err = ledger.increase("alice", 2, QuotaUnit::Tb).await.unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidInput(_)));

        let account = ledger.account("alice").await.unwrap();
        assert_eq!(account.limit_mb, MAX_LIMIT_MB);
        assert_eq!(account.limit_bytes(), MAX_LIMIT_MB * BYTES_PER_MB);
        ledger.consume("alice", 5 * BYTES_PER_MB).await.unwrap();
        assert_eq!(
            ledger.account("alice").await.unwrap().used_bytes,
            5 * BYTES_PER_MB
        );
    }

    #[tokio::test]
    async fn consume_stops_at_the_limit_and_release_frees_space() {
        let ledger = ledger().await;
        ledger.consume("alice", 8 * BYTES_PER_MB).await.unwrap();

        let err = ledger.consume("alice", 3 * BYTES_PER_MB).await.unwrap_err();
        match err {
            LifecycleError::QuotaExceeded {
                requested,
                available,
            } => {
                assert_eq!(requested, 3 * BYTES_PER_MB);
                assert_eq!(available, 2 * BYTES_PER_MB);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        ledger.release("alice", 4 * BYTES_PER_MB).await.unwrap();
        ledger.consume("alice", 3 * BYTES_PER_MB).await.unwrap();
        assert_eq!(
            ledger.account("alice").await.unwrap().used_bytes,
            7 * BYTES_PER_MB
        );
    }

    #[tokio::test]
    async fn release_never_goes_negative() {
        let ledger = ledger().await;
        ledger.consume("alice", 10).await.unwrap();
        ledger.release("alice", 100).await.unwrap();
        assert_eq!(ledger.account("alice").await.unwrap().used_bytes, 0);
    }
}
