//! Housekeeping (§10.7): periodic archive/prune jobs layered on top of the
//! Signal Ledger schema, run as ordinary Scheduler Interface periodic jobs
//! alongside the reconciler. Not part of the `SignalRepository` contract
//! (§4.1 scopes that trait to what SE/RC need) -- this talks to the pool
//! directly, the same way the teacher's repository prune methods do.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{info, warn};

pub struct Housekeeper {
    pool: SqlitePool,
    archive_retention_days: i64,
    audit_log_retention_days: i64,
}

impl Housekeeper {
    pub fn new(pool: SqlitePool, archive_retention_days: i64, audit_log_retention_days: i64) -> Self {
        Self { pool, archive_retention_days, audit_log_retention_days }
    }

    /// Runs both jobs once. Called by the scheduler's `housekeeping`
    /// periodic job.
    pub async fn run(&self) {
        match self.archive_closed_signals().await {
            Ok(n) if n > 0 => info!(archived = n, "housekeeping: archived closed signals"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "housekeeping: archive_closed_signals failed"),
        }

        match self.prune_audit_log().await {
            Ok(n) if n > 0 => info!(pruned = n, "housekeeping: pruned audit log rows"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "housekeeping: prune_audit_log failed"),
        }
    }

    /// Moves `CLOSED` signals older than `archive_retention_days` into
    /// `archived_signals`, then deletes them from the live `signals` table.
    /// Terminal off-path states (e.g. `SIGNAL_TOO_OLD`, `FAILED`,
    /// `SIGNAL_CLOSED_NO_ORDER`) with no open order are archived the same
    /// way; anything still in an open-entry-order or open-position family
    /// is never touched regardless of age.
    async fn archive_closed_signals(&self) -> Result<u64, sqlx::Error> {
        let cutoff = Utc::now() - chrono::Duration::days(self.archive_retention_days);

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO archived_signals
            SELECT * FROM signals
            WHERE updated_at < ?1
              AND (
                status = 'CLOSED'
                OR trade_status IN (
                    'SIGNAL_TOO_OLD', 'ELDER_SCREENS_FAILED', 'NOT_CONFIGURED',
                    'INVALID_ENTRY', 'INVALID_QUANTITY', 'INVALID_MARKET_PRICE',
                    'SIGNAL_CLOSED_NO_ORDER', 'FAILED'
                )
              )
            "#,
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query(
            r#"
            DELETE FROM signals
            WHERE updated_at < ?1
              AND (
                status = 'CLOSED'
                OR trade_status IN (
                    'SIGNAL_TOO_OLD', 'ELDER_SCREENS_FAILED', 'NOT_CONFIGURED',
                    'INVALID_ENTRY', 'INVALID_QUANTITY', 'INVALID_MARKET_PRICE',
                    'SIGNAL_CLOSED_NO_ORDER', 'FAILED'
                )
              )
            "#,
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }

    /// Deletes `signal_log` rows older than `audit_log_retention_days`,
    /// independent of whether their parent signal has been archived --
    /// this retention window is deliberately longer than the archive one
    /// (§10.7) so the audit trail outlives the ledger row it describes.
    async fn prune_audit_log(&self) -> Result<u64, sqlx::Error> {
        let cutoff = Utc::now() - chrono::Duration::days(self.audit_log_retention_days);

        let result = sqlx::query("DELETE FROM signal_log WHERE created_at < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::Database;

    #[tokio::test]
    async fn run_on_empty_ledger_is_a_no_op() {
        let db = Database::new("sqlite::memory:").await.expect("db init");
        let housekeeper = Housekeeper::new(db.pool.clone(), 30, 90);
        housekeeper.run().await;

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM signals")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(count.0, 0);
    }

    #[tokio::test]
    async fn prune_audit_log_removes_only_rows_past_retention() {
        let db = Database::new("sqlite::memory:").await.expect("db init");
        let signal_id = uuid::Uuid::new_v4();
        sqlx::query("INSERT INTO signals (id, symbol, side, level_price, status, elder_screen_1_passed, elder_screen_2_passed, meta_json, created_at, updated_at) VALUES (?1, 'BTC/USDT', 'LONG', '100', 'ACTIVE', 1, 1, '{}', ?2, ?2)")
            .bind(signal_id.to_string())
            .bind(Utc::now())
            .execute(&db.pool)
            .await
            .unwrap();

        let old_ts = Utc::now() - chrono::Duration::days(120);
        sqlx::query("INSERT INTO signal_log (id, signal_id, event_type, message, details_json, created_at) VALUES (?1, ?2, 'CREATED', 'old', '{}', ?3)")
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(signal_id.to_string())
            .bind(old_ts)
            .execute(&db.pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO signal_log (id, signal_id, event_type, message, details_json, created_at) VALUES (?1, ?2, 'CREATED', 'recent', '{}', ?3)")
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(signal_id.to_string())
            .bind(Utc::now())
            .execute(&db.pool)
            .await
            .unwrap();

        let housekeeper = Housekeeper::new(db.pool.clone(), 30, 90);
        housekeeper.run().await;

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM signal_log")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }
}
