use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::domain::errors::LedgerError;
use crate::domain::repositories::SignalRepository;
use crate::domain::signal::{Signal, SignalLogEntry, SignalMeta, TradingPair};
use crate::domain::types::{ExitReason, Side, SignalStatus, TradeStatus};

/// `SignalRepository` backed by the `signals`/`signal_log` tables.
///
/// Decimal columns are stored as TEXT (`to_string()`/`Decimal::from_str()`)
/// to avoid float round-tripping, matching the ledger's other numeric
/// columns.
pub struct SqliteSignalRepository {
    pool: SqlitePool,
}

impl SqliteSignalRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn dec_opt(v: &Option<Decimal>) -> Option<String> {
        v.as_ref().map(|d| d.to_string())
    }

    fn parse_dec_opt(s: Option<String>) -> Result<Option<Decimal>, LedgerError> {
        s.map(|raw| {
            Decimal::from_str(&raw)
                .map_err(|e| LedgerError::Unavailable(format!("bad decimal column: {e}")))
        })
        .transpose()
    }

    fn row_to_signal(row: &sqlx::sqlite::SqliteRow) -> Result<Signal, LedgerError> {
        let id: String = row.try_get("id").map_err(sqlx_err)?;
        let symbol: String = row.try_get("symbol").map_err(sqlx_err)?;
        let side: String = row.try_get("side").map_err(sqlx_err)?;
        let level_price: String = row.try_get("level_price").map_err(sqlx_err)?;
        let entry_price: Option<String> = row.try_get("entry_price").map_err(sqlx_err)?;
        let stop_loss_price: Option<String> = row.try_get("stop_loss_price").map_err(sqlx_err)?;
        let take_profit_price: Option<String> =
            row.try_get("take_profit_price").map_err(sqlx_err)?;
        let status: String = row.try_get("status").map_err(sqlx_err)?;
        let trade_status: Option<String> = row.try_get("trade_status").map_err(sqlx_err)?;
        let order_id: Option<String> = row.try_get("order_id").map_err(sqlx_err)?;
        let quantity: Option<String> = row.try_get("quantity").map_err(sqlx_err)?;
        let created_at: DateTime<Utc> = row.try_get("created_at").map_err(sqlx_err)?;
        let filled_at: Option<DateTime<Utc>> = row.try_get("filled_at").map_err(sqlx_err)?;
        let exit_price: Option<String> = row.try_get("exit_price").map_err(sqlx_err)?;
        let exit_at: Option<DateTime<Utc>> = row.try_get("exit_at").map_err(sqlx_err)?;
        let exit_reason: Option<String> = row.try_get("exit_reason").map_err(sqlx_err)?;
        let elder_screen_1_passed: bool =
            row.try_get("elder_screen_1_passed").map_err(sqlx_err)?;
        let elder_screen_2_passed: bool =
            row.try_get("elder_screen_2_passed").map_err(sqlx_err)?;
        let meta_json: String = row.try_get("meta_json").map_err(sqlx_err)?;
        let last_error: Option<String> = row.try_get("last_error").map_err(sqlx_err)?;
        let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(sqlx_err)?;

        Ok(Signal {
            id: Uuid::parse_str(&id)
                .map_err(|e| LedgerError::Unavailable(format!("bad signal id: {e}")))?,
            pair: TradingPair::new(symbol),
            side: Side::from_str(&side).map_err(LedgerError::Unavailable)?,
            level_price: Decimal::from_str(&level_price)
                .map_err(|e| LedgerError::Unavailable(e.to_string()))?,
            entry_price: Self::parse_dec_opt(entry_price)?,
            stop_loss_price: Self::parse_dec_opt(stop_loss_price)?,
            take_profit_price: Self::parse_dec_opt(take_profit_price)?,
            status: match status.as_str() {
                "ACTIVE" => SignalStatus::Active,
                "CLOSED" => SignalStatus::Closed,
                other => return Err(LedgerError::Unavailable(format!("bad status: {other}"))),
            },
            trade_status: trade_status
                .map(|s| TradeStatus::from_str(&s).map_err(LedgerError::Unavailable))
                .transpose()?,
            order_id,
            quantity: Self::parse_dec_opt(quantity)?,
            created_at,
            filled_at,
            exit_price: Self::parse_dec_opt(exit_price)?,
            exit_at,
            exit_reason: exit_reason
                .map(|s| match s.as_str() {
                    "TAKE_PROFIT" => Ok(ExitReason::TakeProfit),
                    "STOP_LOSS" => Ok(ExitReason::StopLoss),
                    "MANUAL_CLOSE" => Ok(ExitReason::ManualClose),
                    other => Err(LedgerError::Unavailable(format!("bad exit_reason: {other}"))),
                })
                .transpose()?,
            elder_screen_1_passed,
            elder_screen_2_passed,
            meta: serde_json::from_str::<SignalMeta>(&meta_json)
                .map_err(|e| LedgerError::Unavailable(format!("bad meta_json: {e}")))?,
            last_error,
            updated_at,
        })
    }
}

fn sqlx_err(e: sqlx::Error) -> LedgerError {
    LedgerError::Unavailable(e.to_string())
}

#[async_trait]
impl SignalRepository for SqliteSignalRepository {
    async fn create(&self, signal: &Signal) -> Result<Uuid, LedgerError> {
        // Duplicate suppression (§4.1): same pair + side, level within 0.1%,
        // ACTIVE, created within the last 30 minutes.
        let tolerance = signal.level_price * dec!(0.001);
        let lower = signal.level_price - tolerance;
        let upper = signal.level_price + tolerance;
        let cutoff = signal.created_at - chrono::Duration::minutes(30);

        // The 0.1% window is evaluated on the `Decimal` values themselves,
        // never on a `REAL` cast of the stored TEXT column (the boundary
        // this rule sits at is exactly the kind of comparison that must
        // stay fixed-point, per the "Decimal precision" design note).
        let candidates: Vec<(String, String)> = sqlx::query_as(
            "SELECT id, level_price FROM signals \
             WHERE symbol = ?1 AND side = ?2 AND status = 'ACTIVE' AND created_at >= ?3",
        )
        .bind(&signal.pair.symbol)
        .bind(signal.side.to_string())
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_err)?;

        for (id, level_price) in candidates {
            let level_price = Decimal::from_str(&level_price)
                .map_err(|e| LedgerError::Unavailable(format!("bad level_price: {e}")))?;
            if level_price >= lower && level_price <= upper {
                let id = Uuid::parse_str(&id)
                    .map_err(|e| LedgerError::Unavailable(format!("bad signal id: {e}")))?;
                debug!(signal_id = %id, "suppressing duplicate signal");
                return Err(LedgerError::Duplicate(id));
            }
        }

        let meta_json = serde_json::to_string(&signal.meta)
            .map_err(|e| LedgerError::Unavailable(format!("meta serialize: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO signals (
                id, symbol, side, level_price, entry_price, stop_loss_price,
                take_profit_price, status, trade_status, order_id, quantity,
                created_at, filled_at, exit_price, exit_at, exit_reason,
                elder_screen_1_passed, elder_screen_2_passed, meta_json,
                last_error, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11,
                ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21
            )
            "#,
        )
        .bind(signal.id.to_string())
        .bind(&signal.pair.symbol)
        .bind(signal.side.to_string())
        .bind(signal.level_price.to_string())
        .bind(Self::dec_opt(&signal.entry_price))
        .bind(Self::dec_opt(&signal.stop_loss_price))
        .bind(Self::dec_opt(&signal.take_profit_price))
        .bind(match signal.status {
            SignalStatus::Active => "ACTIVE",
            SignalStatus::Closed => "CLOSED",
        })
        .bind(signal.trade_status.map(|s| s.to_string()))
        .bind(&signal.order_id)
        .bind(Self::dec_opt(&signal.quantity))
        .bind(signal.created_at)
        .bind(signal.filled_at)
        .bind(Self::dec_opt(&signal.exit_price))
        .bind(signal.exit_at)
        .bind(signal.exit_reason.map(|r| r.to_string()))
        .bind(signal.elder_screen_1_passed)
        .bind(signal.elder_screen_2_passed)
        .bind(meta_json)
        .bind(&signal.last_error)
        .bind(signal.updated_at)
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;

        Ok(signal.id)
    }

    async fn get(&self, id: Uuid) -> Result<Signal, LedgerError> {
        let row = sqlx::query("SELECT * FROM signals WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_err)?
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))?;
        Self::row_to_signal(&row)
    }

    async fn update(&self, signal: &Signal) -> Result<(), LedgerError> {
        let meta_json = serde_json::to_string(&signal.meta)
            .map_err(|e| LedgerError::Unavailable(format!("meta serialize: {e}")))?;

        let result = sqlx::query(
            r#"
            UPDATE signals SET
                entry_price = ?2, stop_loss_price = ?3, take_profit_price = ?4,
                status = ?5, trade_status = ?6, order_id = ?7, quantity = ?8,
                filled_at = ?9, exit_price = ?10, exit_at = ?11, exit_reason = ?12,
                meta_json = ?13, last_error = ?14, updated_at = ?15
            WHERE id = ?1
            "#,
        )
        .bind(signal.id.to_string())
        .bind(Self::dec_opt(&signal.entry_price))
        .bind(Self::dec_opt(&signal.stop_loss_price))
        .bind(Self::dec_opt(&signal.take_profit_price))
        .bind(match signal.status {
            SignalStatus::Active => "ACTIVE",
            SignalStatus::Closed => "CLOSED",
        })
        .bind(signal.trade_status.map(|s| s.to_string()))
        .bind(&signal.order_id)
        .bind(Self::dec_opt(&signal.quantity))
        .bind(signal.filled_at)
        .bind(Self::dec_opt(&signal.exit_price))
        .bind(signal.exit_at)
        .bind(signal.exit_reason.map(|r| r.to_string()))
        .bind(meta_json)
        .bind(&signal.last_error)
        .bind(signal.updated_at)
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound(signal.id.to_string()));
        }
        Ok(())
    }

    async fn append_log(&self, entry: &SignalLogEntry) -> Result<(), LedgerError> {
        let details_json = serde_json::to_string(&entry.details)
            .map_err(|e| LedgerError::Unavailable(format!("details serialize: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO signal_log (id, signal_id, event_type, status, message, details_json, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(entry.signal_id.to_string())
        .bind(&entry.event_type)
        .bind(entry.status.map(|s| s.to_string()))
        .bind(&entry.message)
        .bind(details_json)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;

        Ok(())
    }

    async fn list_active_waiting(&self) -> Result<Vec<Signal>, LedgerError> {
        let rows = sqlx::query(
            "SELECT * FROM signals WHERE status = 'ACTIVE' AND order_id IS NULL AND trade_status IS NULL",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_err)?;
        rows.iter().map(Self::row_to_signal).collect()
    }

    async fn list_active_with_open_order(&self) -> Result<Vec<Signal>, LedgerError> {
        let rows = sqlx::query(
            "SELECT * FROM signals WHERE status = 'ACTIVE' AND trade_status IN ('SUBMITTING', 'PLACED')",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_err)?;
        rows.iter().map(Self::row_to_signal).collect()
    }

    async fn list_placed_unfilled(&self) -> Result<Vec<Signal>, LedgerError> {
        let rows = sqlx::query(
            "SELECT * FROM signals WHERE status = 'ACTIVE' AND trade_status = 'PLACED' AND filled_at IS NULL",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_err)?;
        rows.iter().map(Self::row_to_signal).collect()
    }

    async fn list_filled_open(&self) -> Result<Vec<Signal>, LedgerError> {
        let rows = sqlx::query(
            "SELECT * FROM signals WHERE status = 'ACTIVE' AND trade_status IN ('OPEN_POSITION', 'SL_TO_BREAKEVEN', 'POSITION_ALREADY_OPEN')",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_err)?;
        rows.iter().map(Self::row_to_signal).collect()
    }

    async fn list_invalidated(&self) -> Result<Vec<Signal>, LedgerError> {
        let rows = sqlx::query(
            "SELECT * FROM signals WHERE status = 'ACTIVE' AND trade_status IN ('LEVEL_BROKEN', 'PRICE_DEVIATION_TOO_LARGE')",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_err)?;
        rows.iter().map(Self::row_to_signal).collect()
    }

    async fn list_waiting(&self) -> Result<Vec<Signal>, LedgerError> {
        let rows = sqlx::query(
            "SELECT * FROM signals WHERE status = 'ACTIVE' AND trade_status = 'WAITING_FOR_PRICE'",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_err)?;
        rows.iter().map(Self::row_to_signal).collect()
    }

    async fn list_orphaned_closures(&self) -> Result<Vec<Signal>, LedgerError> {
        let rows = sqlx::query(
            "SELECT * FROM signals WHERE status = 'CLOSED' AND order_id IS NULL \
             AND trade_status IN ('WAITING_FOR_PRICE', 'LEVEL_BROKEN', 'PRICE_DEVIATION_TOO_LARGE')",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_err)?;
        rows.iter().map(Self::row_to_signal).collect()
    }

    async fn recent_closed(&self, since: DateTime<Utc>) -> Result<Vec<Signal>, LedgerError> {
        let rows = sqlx::query(
            "SELECT * FROM signals WHERE status = 'CLOSED' AND exit_at IS NOT NULL \
             AND entry_price IS NOT NULL AND exit_at >= ?1 ORDER BY exit_at ASC",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_err)?;
        rows.iter().map(Self::row_to_signal).collect()
    }

    async fn update_with_log(
        &self,
        signal: &Signal,
        entry: &SignalLogEntry,
    ) -> Result<(), LedgerError> {
        let meta_json = serde_json::to_string(&signal.meta)
            .map_err(|e| LedgerError::Unavailable(format!("meta serialize: {e}")))?;
        let details_json = serde_json::to_string(&entry.details)
            .map_err(|e| LedgerError::Unavailable(format!("details serialize: {e}")))?;

        let mut tx = self.pool.begin().await.map_err(sqlx_err)?;

        let result = sqlx::query(
            r#"
            UPDATE signals SET
                entry_price = ?2, stop_loss_price = ?3, take_profit_price = ?4,
                status = ?5, trade_status = ?6, order_id = ?7, quantity = ?8,
                filled_at = ?9, exit_price = ?10, exit_at = ?11, exit_reason = ?12,
                meta_json = ?13, last_error = ?14, updated_at = ?15
            WHERE id = ?1
            "#,
        )
        .bind(signal.id.to_string())
        .bind(Self::dec_opt(&signal.entry_price))
        .bind(Self::dec_opt(&signal.stop_loss_price))
        .bind(Self::dec_opt(&signal.take_profit_price))
        .bind(match signal.status {
            SignalStatus::Active => "ACTIVE",
            SignalStatus::Closed => "CLOSED",
        })
        .bind(signal.trade_status.map(|s| s.to_string()))
        .bind(&signal.order_id)
        .bind(Self::dec_opt(&signal.quantity))
        .bind(signal.filled_at)
        .bind(Self::dec_opt(&signal.exit_price))
        .bind(signal.exit_at)
        .bind(signal.exit_reason.map(|r| r.to_string()))
        .bind(meta_json)
        .bind(&signal.last_error)
        .bind(signal.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound(signal.id.to_string()));
        }

        sqlx::query(
            r#"
            INSERT INTO signal_log (id, signal_id, event_type, status, message, details_json, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(entry.signal_id.to_string())
        .bind(&entry.event_type)
        .bind(entry.status.map(|s| s.to_string()))
        .bind(&entry.message)
        .bind(details_json)
        .bind(entry.created_at)
        .execute(&mut *tx)
        .await
        .map_err(sqlx_err)?;

        tx.commit().await.map_err(sqlx_err)?;
        Ok(())
    }

    async fn last_closed(&self, limit: usize) -> Result<Vec<Signal>, LedgerError> {
        let rows = sqlx::query(
            "SELECT * FROM signals WHERE status = 'CLOSED' AND exit_at IS NOT NULL \
             ORDER BY exit_at DESC LIMIT ?1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_err)?;
        rows.iter().map(Self::row_to_signal).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::database::Database;

    async fn test_repo() -> SqliteSignalRepository {
        let db = Database::new("sqlite::memory:").await.expect("db init");
        SqliteSignalRepository::new(db.pool)
    }

    #[tokio::test]
    async fn create_and_get_roundtrip() {
        let repo = test_repo().await;
        let signal = Signal::new(
            TradingPair::new("BTCUSDT"),
            Side::Long,
            dec!(50000),
            true,
            true,
            Utc::now(),
        );
        let id = repo.create(&signal).await.expect("create");
        let fetched = repo.get(id).await.expect("get");
        assert_eq!(fetched.pair.symbol, "BTCUSDT");
        assert_eq!(fetched.level_price, dec!(50000));
    }

    #[tokio::test]
    async fn duplicate_within_tolerance_is_rejected() {
        let repo = test_repo().await;
        let now = Utc::now();
        let first = Signal::new(TradingPair::new("BTCUSDT"), Side::Long, dec!(50000), true, true, now);
        repo.create(&first).await.expect("create first");

        let second = Signal::new(TradingPair::new("BTCUSDT"), Side::Long, dec!(50010), true, true, now);
        let result = repo.create(&second).await;
        assert!(matches!(result, Err(LedgerError::Duplicate(_))));
    }

    #[tokio::test]
    async fn different_side_is_not_a_duplicate() {
        let repo = test_repo().await;
        let now = Utc::now();
        let first = Signal::new(TradingPair::new("BTCUSDT"), Side::Long, dec!(50000), true, true, now);
        repo.create(&first).await.expect("create first");

        let second = Signal::new(TradingPair::new("BTCUSDT"), Side::Short, dec!(50000), true, true, now);
        let id = repo.create(&second).await.expect("create second");
        assert_ne!(id, first.id);
    }
}
