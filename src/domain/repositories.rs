use crate::domain::errors::LedgerError;
use crate::domain::signal::{Signal, SignalLogEntry};
use crate::domain::types::Side;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// The persistent entity store for signals and their audit log (§4.1).
///
/// `create` enforces the duplicate-suppression rule; every other mutation
/// goes through `update`/`append_log`, which the in-process per-signal
/// exclusion (§5) makes effectively non-concurrent for a single id, but
/// which implementations must still serialize per-row against concurrent
/// readers (the reconciler's list queries).
#[async_trait]
pub trait SignalRepository: Send + Sync {
    /// Rejects with `LedgerError::Duplicate(existing_id)` if a matching
    /// `(pair, side, level within 0.1%, created within 30 min, ACTIVE)`
    /// signal already exists.
    async fn create(&self, signal: &Signal) -> Result<Uuid, LedgerError>;

    async fn get(&self, id: Uuid) -> Result<Signal, LedgerError>;

    /// Atomic; must bump `updated_at`.
    async fn update(&self, signal: &Signal) -> Result<(), LedgerError>;

    async fn append_log(&self, entry: &SignalLogEntry) -> Result<(), LedgerError>;

    /// Commits `update(signal)` and `append_log(entry)` as a single
    /// transaction (§3 ownership & lifecycle: "every SE/RC action that
    /// mutates a signal commits together with its log entries"). The
    /// default sequences the two calls for backends without a native
    /// transaction primitive; `SqliteSignalRepository` overrides this with
    /// a real `BEGIN`/`COMMIT`.
    async fn update_with_log(
        &self,
        signal: &Signal,
        entry: &SignalLogEntry,
    ) -> Result<(), LedgerError> {
        self.update(signal).await?;
        self.append_log(entry).await
    }

    /// `ACTIVE`, no order, no trade_status yet.
    async fn list_active_waiting(&self) -> Result<Vec<Signal>, LedgerError>;

    /// `order_id` set, trade_status in the open-entry-order family.
    async fn list_active_with_open_order(&self) -> Result<Vec<Signal>, LedgerError>;

    /// `trade_status = PLACED`, not yet filled.
    async fn list_placed_unfilled(&self) -> Result<Vec<Signal>, LedgerError>;

    /// Trade_status in the open-position family, not yet closed.
    async fn list_filled_open(&self) -> Result<Vec<Signal>, LedgerError>;

    /// `trade_status` in `{LEVEL_BROKEN, PRICE_DEVIATION_TOO_LARGE}`.
    async fn list_invalidated(&self) -> Result<Vec<Signal>, LedgerError>;

    /// `trade_status = WAITING_FOR_PRICE`.
    async fn list_waiting(&self) -> Result<Vec<Signal>, LedgerError>;

    /// Non-ACTIVE signals with no order, still in the waiting family
    /// (orphan closures, §4.5 step 5).
    async fn list_orphaned_closures(&self) -> Result<Vec<Signal>, LedgerError>;

    /// `CLOSED` signals with both entry and exit prices populated, within
    /// `window` of `now` — for the Risk Manager.
    async fn recent_closed(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<Signal>, LedgerError>;

    /// Most recent `limit` closed signals (most-recent-first), for
    /// consecutive-loss computation irrespective of the daily window.
    async fn last_closed(&self, limit: usize) -> Result<Vec<Signal>, LedgerError>;
}

/// Convenience bundle used by `create`'s duplicate check.
#[derive(Debug, Clone)]
pub struct DuplicateKey {
    pub pair_symbol: String,
    pub side: Side,
    pub level_price: Decimal,
    pub created_at: DateTime<Utc>,
}
