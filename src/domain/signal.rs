use crate::domain::types::{ExitReason, Side, SignalStatus, TradeStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Identity of a tradeable perpetual contract. Immutable within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingPair {
    pub symbol: String,
}

impl TradingPair {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self { symbol: symbol.into() }
    }
}

/// Extensible metadata carried alongside a signal. At minimum tracks the
/// latched max price deviation and first-touch profit thresholds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalMeta {
    pub max_price_deviation_pct: Option<Decimal>,
    pub max_favorable_move_pct: Option<Decimal>,
    pub max_adverse_move_pct: Option<Decimal>,
    pub threshold_0_5_touched_at: Option<DateTime<Utc>>,
    pub threshold_1_0_touched_at: Option<DateTime<Utc>>,
    pub threshold_1_5_touched_at: Option<DateTime<Utc>>,
    /// Extra analyzer-supplied fields the core does not interpret.
    #[serde(default)]
    pub extra: Value,
}

impl SignalMeta {
    /// Latch the maximum observed deviation; monotonically non-decreasing
    /// while an entry order is open (invariant, §3).
    pub fn latch_max_deviation(&mut self, observed_pct: Decimal) {
        self.max_price_deviation_pct = Some(match self.max_price_deviation_pct {
            Some(prev) if prev >= observed_pct => prev,
            _ => observed_pct,
        });
    }

    /// Stamps every untouched threshold `pnl_pct` has reached this sweep.
    /// Independent checks, not an else-if chain: a single sweep that jumps
    /// straight past all three (e.g. +1.6%) must stamp all three at once,
    /// not just the highest.
    pub fn record_threshold_touch(&mut self, pnl_pct: Decimal, now: DateTime<Utc>) {
        use rust_decimal_macros::dec;
        if pnl_pct >= dec!(0.5) && self.threshold_0_5_touched_at.is_none() {
            self.threshold_0_5_touched_at = Some(now);
        }
        if pnl_pct >= dec!(1.0) && self.threshold_1_0_touched_at.is_none() {
            self.threshold_1_0_touched_at = Some(now);
        }
        if pnl_pct >= dec!(1.5) && self.threshold_1_5_touched_at.is_none() {
            self.threshold_1_5_touched_at = Some(now);
        }
    }
}

/// The central entity: a proposed trade around a specific price level,
/// carrying its entire lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub pair: TradingPair,
    pub side: Side,
    pub level_price: Decimal,
    pub entry_price: Option<Decimal>,
    pub stop_loss_price: Option<Decimal>,
    pub take_profit_price: Option<Decimal>,
    pub status: SignalStatus,
    pub trade_status: Option<TradeStatus>,
    pub order_id: Option<String>,
    pub quantity: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
    pub exit_price: Option<Decimal>,
    pub exit_at: Option<DateTime<Utc>>,
    pub exit_reason: Option<ExitReason>,
    pub elder_screen_1_passed: bool,
    pub elder_screen_2_passed: bool,
    pub meta: SignalMeta,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Signal {
    /// Build a freshly analyzer-created signal: `ACTIVE`, no trade status.
    pub fn new(
        pair: TradingPair,
        side: Side,
        level_price: Decimal,
        elder_screen_1_passed: bool,
        elder_screen_2_passed: bool,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            pair,
            side,
            level_price,
            entry_price: None,
            stop_loss_price: None,
            take_profit_price: None,
            status: SignalStatus::Active,
            trade_status: None,
            order_id: None,
            quantity: None,
            created_at,
            filled_at: None,
            exit_price: None,
            exit_at: None,
            exit_reason: None,
            elder_screen_1_passed,
            elder_screen_2_passed,
            meta: SignalMeta::default(),
            last_error: None,
            updated_at: created_at,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }
}

/// Append-only audit record, one row per state-changing event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalLogEntry {
    pub id: Uuid,
    pub signal_id: Uuid,
    pub event_type: String,
    pub status: Option<TradeStatus>,
    pub message: String,
    pub details: Value,
    pub created_at: DateTime<Utc>,
}

impl SignalLogEntry {
    /// Audit messages are bounded to 500 characters before storage, matching
    /// the original system's audit log convention.
    const MAX_MESSAGE_LEN: usize = 500;

    pub fn new(
        signal_id: Uuid,
        event_type: impl Into<String>,
        status: Option<TradeStatus>,
        message: impl Into<String>,
        details: Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        let mut message = message.into();
        if message.len() > Self::MAX_MESSAGE_LEN {
            message.truncate(Self::MAX_MESSAGE_LEN);
        }
        Self {
            id: Uuid::new_v4(),
            signal_id,
            event_type: event_type.into(),
            status,
            message,
            details,
            created_at,
        }
    }
}
