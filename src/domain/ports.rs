use crate::domain::errors::ExchangeError;
use crate::domain::types::{ExitReason, OrderType, Side};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// A known venue order, as reported at submission time.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub id: String,
    pub status: String,
}

/// The real fill of an entry order, as observed on the venue.
#[derive(Debug, Clone)]
pub struct FillInfo {
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Current venue-side position for a symbol.
#[derive(Debug, Clone)]
pub struct PositionInfo {
    pub side: Side,
    pub contracts: Decimal,
    pub entry_price: Decimal,
    pub take_profit: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub position_idx: u8,
}

/// The earliest closing trade/order found after `since`.
#[derive(Debug, Clone)]
pub struct ExitInfo {
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
    pub reason: ExitReason,
}

/// Which protective legs to (re)install. `None` on a field leaves that
/// side untouched on the venue.
#[derive(Debug, Clone, Copy, Default)]
pub struct TpSl {
    pub take_profit: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
}

/// Venue facade (§4.2). Normalizes symbols and errors; the only component
/// that knows about wire-level dialects. All fallible calls resolve to
/// `ExchangeError::{Transient, RateLimited, Permanent}`.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    async fn current_price(&self, symbol: &str) -> Result<Decimal, ExchangeError>;

    /// Average `(high-low)/close` over a trailing window, in percent.
    async fn volatility_pct(&self, symbol: &str) -> Result<Decimal, ExchangeError>;

    async fn place_order(
        &self,
        symbol: &str,
        side: Side,
        order_type: OrderType,
        qty: Decimal,
        price: Option<Decimal>,
        reduce_only: bool,
    ) -> Result<PlacedOrder, ExchangeError>;

    async fn cancel_order(&self, order_id: &str, symbol: &str) -> Result<(), ExchangeError>;

    /// Consults `fetch_order` first, then `fetch_closed_orders`. Returns the
    /// real filled price, never the limit price.
    async fn order_fill_info(
        &self,
        order_id: &str,
        symbol: &str,
    ) -> Result<Option<FillInfo>, ExchangeError>;

    async fn position_info(&self, symbol: &str) -> Result<Option<PositionInfo>, ExchangeError>;

    async fn exit_fill_info(
        &self,
        symbol: &str,
        entry_order_id: &str,
        since: DateTime<Utc>,
        position_side: Side,
    ) -> Result<Option<ExitInfo>, ExchangeError>;

    /// Uses the venue's position-level trading-stop endpoint, never a new
    /// order, so volume is not increased. Preserves any side left `None`.
    async fn set_position_tp_sl(&self, symbol: &str, tp_sl: TpSl) -> Result<(), ExchangeError>;

    /// Idempotent.
    async fn ensure_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError>;
}

/// Injectable clock, used for age computation, polling budgets, and
/// "last check" timestamps (§5).
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Controllable clock for deterministic tests (§10.5): never reads system
/// time, only moves forward under explicit instruction.
pub struct ManualClock {
    current: std::sync::Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { current: std::sync::Mutex::new(start) }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut current = self.current.lock().unwrap();
        *current += delta;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.current.lock().unwrap() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock().unwrap()
    }
}

/// Trading-Mode Gate (§4.3): a process-wide, persistently cached boolean.
/// Falls back to an in-memory value on cache unavailability so the gate is
/// never silently "enabled".
#[async_trait]
pub trait TradingModeGate: Send + Sync {
    async fn is_live_enabled(&self) -> bool;
    async fn set_live_enabled(&self, enabled: bool);
}

/// Scheduler Interface (§6 SI): the minimal contract the core requires from
/// whatever job runner hosts it. `schedule_once` is fire-and-forget with
/// at-least-once delivery -- acceptable because `SignalExecutor::attempt`'s
/// preflight idempotentizes re-entries.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Runs `job_name` once, keyed by `signal_id`, as soon as the scheduler
    /// can get to it.
    async fn schedule_once(&self, job_name: &str, signal_id: uuid::Uuid);

    /// Registers `job_name` to run every `every`, starting after the first
    /// interval elapses.
    async fn schedule_periodic(&self, job_name: &str, every: std::time::Duration);
}
