//! Signal Executor (§4.4): drives a single signal through preflight
//! validation, price-approach waiting, order submission, fill
//! reconciliation, and the protective-order guarantee. Single entry point:
//! `attempt(signal_id, from_reconciler)`.

use std::sync::Arc;
use std::time::{Duration, Instant as TokioInstant};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{Value, json};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::application::risk_manager::{Enforcement, RiskManager};
use crate::config::trading_config::TradingEnvConfig;
use crate::domain::errors::LedgerError;
use crate::domain::ports::{Clock, ExchangeAdapter, FillInfo, TpSl, TradingModeGate};
use crate::domain::repositories::SignalRepository;
use crate::domain::signal::{Signal, SignalLogEntry};
use crate::domain::types::{OrderType, Outcome, Side, SignalStatus, TradeStatus};
use crate::infrastructure::observability::metrics::Metrics;

/// §4.4 preflight step 9: global cancellation for unfilled intent.
const SIGNAL_MAX_AGE: chrono::Duration = chrono::Duration::minutes(30);
/// §4.4.1: deviation beyond which a waiting signal is abandoned outright.
const INVALIDATION_DEV_PCT: Decimal = dec!(2.0);
/// §4.4.1: how far the level may be broken against the trade direction.
const LEVEL_BROKEN_PCT: Decimal = dec!(0.2);
/// §4.4.4: re-anchor TP/SL when the real fill differs from the expected
/// entry by more than this fraction.
const FILL_REPRICE_TOLERANCE: Decimal = dec!(0.001);
/// §4.4.6: buffer kept inside the entry price on a breakeven move.
const BREAKEVEN_BUFFER: Decimal = dec!(0.001);

enum WaitResult {
    Proceed(Decimal, OrderType),
    Outcome(Outcome),
}

/// Drives `attempt()`. Depends only on the Signal Ledger and the Exchange
/// Adapter per the layering in §9 ("SE depends on SL and EA only"); the TMG
/// and Risk Manager are consulted but not owned.
pub struct SignalExecutor {
    repo: Arc<dyn SignalRepository>,
    exchange: Arc<dyn ExchangeAdapter>,
    tmg: Arc<dyn TradingModeGate>,
    risk_manager: Arc<RiskManager>,
    clock: Arc<dyn Clock>,
    trading: TradingEnvConfig,
    leverage: u32,
    /// Whether the wired Exchange Adapter has usable credentials. A crate
    /// concern, not something the EA contract itself exposes (§4.4 step 2).
    exchange_configured: bool,
    metrics: Option<Arc<Metrics>>,
}

impl SignalExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repo: Arc<dyn SignalRepository>,
        exchange: Arc<dyn ExchangeAdapter>,
        tmg: Arc<dyn TradingModeGate>,
        risk_manager: Arc<RiskManager>,
        clock: Arc<dyn Clock>,
        trading: TradingEnvConfig,
        leverage: u32,
        exchange_configured: bool,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self {
            repo,
            exchange,
            tmg,
            risk_manager,
            clock,
            trading,
            leverage,
            exchange_configured,
            metrics,
        }
    }

    /// Single entry point (§4.4): preflight, wait, submit, reconcile fill,
    /// and guarantee protective orders for a freshly-filled position.
    pub async fn attempt(&self, signal_id: Uuid, from_reconciler: bool) -> Outcome {
        let now = self.clock.now();

        // Step 4: fetch (with retry covering a race against the creator's commit).
        let Some(mut signal) = self.fetch_with_retry(signal_id).await else {
            return Outcome::SignalNotFound;
        };

        // Step 1: Trading-Mode Gate.
        if !self.tmg.is_live_enabled().await {
            return self.park(&mut signal, TradeStatus::LiveDisabled, "LIVE_DISABLED", Outcome::Disabled, json!({}), now).await;
        }

        // Step 2: Exchange Adapter configured.
        if !self.exchange_configured {
            return self.invalidate(&mut signal, TradeStatus::NotConfigured, "NOT_CONFIGURED", json!({}), now).await;
        }

        // Step 3: Risk Manager.
        match self.risk_manager.enforce().await {
            Ok(Enforcement::Stopped) => return Outcome::RiskBlocked,
            Ok(Enforcement::NotStopped) => {}
            Err(e) => return Outcome::Failed(format!("risk manager unavailable: {e}")),
        }

        // Step 5: not already closed.
        if signal.status == SignalStatus::Closed {
            return Outcome::SignalClosed;
        }

        // Step 6: trade_status empty or retryable.
        if let Some(status) = signal.trade_status
            && !status.is_retryable()
        {
            return Outcome::AlreadyProcessed;
        }

        // Step 7: Elder screens.
        if !(signal.elder_screen_1_passed && signal.elder_screen_2_passed) {
            return self.invalidate(&mut signal, TradeStatus::ElderScreensFailed, "ELDER_SCREENS_FAILED", json!({}), now).await;
        }

        // Step 8: no duplicate open position on this side.
        match self.exchange.position_info(&signal.pair.symbol).await {
            Ok(Some(position)) if position.side == signal.side && !position.contracts.is_zero() => {
                return self.park(&mut signal, TradeStatus::PositionAlreadyOpen, "POSITION_ALREADY_OPEN", Outcome::DuplicatePosition, json!({}), now).await;
            }
            Ok(_) => {}
            Err(e) => warn!(signal_id = %signal_id, error = %e, "position_info check failed during preflight, proceeding"),
        }

        // Step 9: signal age.
        if signal.age(now) > SIGNAL_MAX_AGE {
            return self.invalidate(&mut signal, TradeStatus::SignalTooOld, "SIGNAL_TOO_OLD", json!({}), now).await;
        }

        // Step 10: level_price sane.
        if signal.level_price <= Decimal::ZERO {
            return self
                .invalidate(&mut signal, TradeStatus::InvalidEntry, "INVALID_ENTRY", json!({"level_price": signal.level_price}), now)
                .await;
        }

        // Step 11: invalidation check against current price.
        let current_price = match self.exchange.current_price(&signal.pair.symbol).await {
            Ok(p) => p,
            Err(e) => {
                warn!(signal_id = %signal_id, error = %e, "current_price failed, leaving signal untouched for next sweep");
                return Outcome::Failed(e.to_string());
            }
        };

        if let Some(status) = Self::invalidation_status(signal.side, signal.level_price, current_price) {
            let event_type = match status {
                TradeStatus::PriceDeviationTooLarge => "PRICE_DEVIATION_TOO_LARGE",
                _ => "LEVEL_BROKEN",
            };
            return self
                .invalidate(&mut signal, status, event_type, json!({"current_price": current_price}), now)
                .await;
        }

        // §4.4.2 allowed deviation and waiting.
        let vol_pct = self.exchange.volatility_pct(&signal.pair.symbol).await.ok();
        let allowed_pct = Self::allowed_pct(vol_pct);
        let too_far_pct = allowed_pct * dec!(3.0);

        let wait_result = if from_reconciler {
            self.evaluate_reconciler_wait(&mut signal, current_price, allowed_pct, too_far_pct, now).await
        } else {
            self.fast_wait(&mut signal, allowed_pct, too_far_pct).await
        };

        let (entry_price, order_type) = match wait_result {
            WaitResult::Proceed(price, order_type) => (price, order_type),
            WaitResult::Outcome(outcome) => return outcome,
        };

        self.submit_order(&mut signal, entry_price, order_type, self.clock.now()).await
    }

    async fn fetch_with_retry(&self, id: Uuid) -> Option<Signal> {
        let mut delay = Duration::from_millis(500);
        for attempt in 0..4 {
            match self.repo.get(id).await {
                Ok(signal) => return Some(signal),
                Err(LedgerError::NotFound(_)) if attempt < 3 => {
                    tokio::time::sleep(delay).await;
                    delay = delay.mul_f64(1.5);
                }
                Err(_) => return None,
            }
        }
        None
    }

    /// Initial attempt (`from_reconciler=false`): up to 30s, polling every 2s.
    async fn fast_wait(&self, signal: &mut Signal, allowed_pct: Decimal, too_far_pct: Decimal) -> WaitResult {
        let budget = Duration::from_secs(30);
        let poll_interval = Duration::from_secs(2);
        let start = TokioInstant::now();

        loop {
            let current_price = match self.exchange.current_price(&signal.pair.symbol).await {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!(signal_id = %signal.id, error = %e, "current_price failed during fast-wait");
                    None
                }
            };

            if let Some(current_price) = current_price {
                let dev_pct = Self::dev_pct(current_price, signal.level_price);
                if dev_pct <= allowed_pct {
                    let (entry_price, order_type) = self.choose_entry(current_price, signal.level_price, dev_pct);
                    return WaitResult::Proceed(entry_price, order_type);
                }
                if dev_pct >= too_far_pct {
                    let now = self.clock.now();
                    let outcome = self
                        .invalidate(signal, TradeStatus::PriceDeviationTooLarge, "PRICE_DEVIATION_TOO_LARGE", json!({"current_price": current_price}), now)
                        .await;
                    return WaitResult::Outcome(outcome);
                }
            }

            if start.elapsed() >= budget {
                break;
            }
            tokio::time::sleep(poll_interval).await;
        }

        let now = self.clock.now();
        let outcome = self
            .park(signal, TradeStatus::WaitingForPrice, "WAITING_FOR_PRICE", Outcome::WaitingForPrice, json!({}), now)
            .await;
        WaitResult::Outcome(outcome)
    }

    /// Reconciler attempt (`from_reconciler=true`): single-shot evaluation.
    async fn evaluate_reconciler_wait(
        &self,
        signal: &mut Signal,
        current_price: Decimal,
        allowed_pct: Decimal,
        too_far_pct: Decimal,
        now: DateTime<Utc>,
    ) -> WaitResult {
        let dev_pct = Self::dev_pct(current_price, signal.level_price);

        if dev_pct > too_far_pct {
            let outcome = self
                .invalidate(signal, TradeStatus::PriceDeviationTooLarge, "PRICE_DEVIATION_TOO_LARGE", json!({"current_price": current_price}), now)
                .await;
            return WaitResult::Outcome(outcome);
        }
        if dev_pct > allowed_pct {
            let outcome = self
                .park(signal, TradeStatus::WaitingForPrice, "WAITING_FOR_PRICE", Outcome::WaitingForPrice, json!({}), now)
                .await;
            return WaitResult::Outcome(outcome);
        }

        let (entry_price, order_type) = self.choose_entry(current_price, signal.level_price, dev_pct);
        WaitResult::Proceed(entry_price, order_type)
    }

    fn choose_entry(&self, current_price: Decimal, level_price: Decimal, dev_pct: Decimal) -> (Decimal, OrderType) {
        if dev_pct <= self.trading.market_entry_threshold_pct {
            (current_price, OrderType::Market)
        } else {
            (level_price, OrderType::Limit)
        }
    }

    /// §4.4.3: construct and submit the entry order, then reconcile its fill.
    async fn submit_order(&self, signal: &mut Signal, entry_price: Decimal, order_type: OrderType, now: DateTime<Utc>) -> Outcome {
        let quantity = (self.trading.order_size_usdt / entry_price).trunc_with_scale(self.trading.quantity_precision);
        if quantity <= Decimal::ZERO {
            return self
                .invalidate(signal, TradeStatus::InvalidQuantity, "INVALID_QUANTITY", json!({"entry_price": entry_price}), now)
                .await;
        }

        let (take_profit_price, stop_loss_price) =
            Self::compute_tp_sl(signal.side, entry_price, self.trading.take_profit_percent, self.trading.stop_loss_percent);

        if let Err(e) = self.exchange.ensure_leverage(&signal.pair.symbol, self.leverage).await {
            warn!(signal_id = %signal.id, error = %e, "ensure_leverage failed, proceeding with existing venue leverage");
        }

        signal.quantity = Some(quantity);
        signal.take_profit_price = Some(take_profit_price);
        signal.stop_loss_price = Some(stop_loss_price);
        signal.trade_status = Some(TradeStatus::Submitting);
        signal.last_error = None;
        signal.updated_at = now;

        let log = SignalLogEntry::new(
            signal.id,
            "SUBMITTING",
            signal.trade_status,
            format!("submitting {order_type:?} entry at {entry_price}"),
            json!({"entry_price": entry_price, "quantity": quantity}),
            now,
        );
        if let Err(e) = self.repo.update_with_log(signal, &log).await {
            error!(signal_id = %signal.id, error = %e, "failed to persist SUBMITTING state");
            return Outcome::Failed(e.to_string());
        }

        let price_param = matches!(order_type, OrderType::Limit).then_some(entry_price);
        let placed = match self
            .exchange
            .place_order(&signal.pair.symbol, signal.side, order_type, quantity, price_param, false)
            .await
        {
            Ok(placed) => placed,
            Err(e) => return self.fail(signal, &format!("place_order failed: {e}"), self.clock.now()).await,
        };

        signal.order_id = Some(placed.id.clone());
        signal.trade_status = placed.status.parse::<TradeStatus>().ok().or(Some(TradeStatus::Placed));
        signal.updated_at = self.clock.now();

        let log = SignalLogEntry::new(
            signal.id,
            "ORDER_PLACED",
            signal.trade_status,
            format!("order {} placed", placed.id),
            json!({"order_id": placed.id}),
            signal.updated_at,
        );
        if let Err(e) = self.repo.update_with_log(signal, &log).await {
            error!(signal_id = %signal.id, error = %e, "failed to persist ORDER_PLACED state");
            return Outcome::Failed(e.to_string());
        }

        if let Some(metrics) = &self.metrics {
            metrics.inc_submitted(&signal.pair.symbol, &signal.side.to_string());
        }
        info!(signal_id = %signal.id, order_id = %placed.id, "entry order placed");

        self.reconcile_fill(signal, entry_price).await
    }

    /// §4.4.4: poll up to 10s at 0.5s cadence for a real fill.
    pub async fn reconcile_fill(&self, signal: &mut Signal, expected_entry: Decimal) -> Outcome {
        let Some(order_id) = signal.order_id.clone() else {
            return Outcome::Submitted;
        };

        let budget = Duration::from_secs(10);
        let poll_interval = Duration::from_millis(500);
        let start = TokioInstant::now();
        let mut fill = None;

        loop {
            match self.exchange.order_fill_info(&order_id, &signal.pair.symbol).await {
                Ok(Some(f)) => {
                    fill = Some(f);
                    break;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(signal_id = %signal.id, error = %e, "order_fill_info failed, leaving for next sweep");
                    break;
                }
            }
            if start.elapsed() >= budget {
                break;
            }
            tokio::time::sleep(poll_interval).await;
        }

        let Some(fill) = fill else {
            return Outcome::Submitted;
        };

        self.apply_fill(signal, fill, expected_entry).await
    }

    /// Real fill observed: re-anchor TP/SL if the fill deviated from the
    /// expected entry, transition to `OPEN_POSITION`, then guarantee
    /// protective orders are installed (§4.4.5).
    pub async fn apply_fill(&self, signal: &mut Signal, fill: FillInfo, expected_entry: Decimal) -> Outcome {
        let now = self.clock.now();
        signal.filled_at = Some(fill.timestamp);
        signal.entry_price = Some(fill.price);

        if !expected_entry.is_zero() && ((fill.price / expected_entry) - Decimal::ONE).abs() > FILL_REPRICE_TOLERANCE {
            let (tp, sl) = Self::compute_tp_sl(signal.side, fill.price, self.trading.take_profit_percent, self.trading.stop_loss_percent);
            signal.take_profit_price = Some(tp);
            signal.stop_loss_price = Some(sl);
            if let Err(e) = self
                .exchange
                .set_position_tp_sl(&signal.pair.symbol, TpSl { take_profit: Some(tp), stop_loss: Some(sl) })
                .await
            {
                warn!(signal_id = %signal.id, error = %e, "failed to re-anchor TP/SL to real fill price");
            }
        }

        signal.trade_status = Some(TradeStatus::OpenPosition);
        signal.updated_at = now;

        let log = SignalLogEntry::new(
            signal.id,
            "ORDER_FILLED",
            signal.trade_status,
            format!("filled at {}", fill.price),
            json!({"fill_price": fill.price, "fill_timestamp": fill.timestamp}),
            now,
        );
        if let Err(e) = self.repo.update_with_log(signal, &log).await {
            error!(signal_id = %signal.id, error = %e, "failed to persist ORDER_FILLED state");
            return Outcome::Failed(e.to_string());
        }

        self.ensure_protective_orders(signal).await;
        Outcome::Submitted
    }

    /// §4.4.5: the core's strongest ongoing safety invariant. Never closes
    /// the position on repair failure; just logs and relies on the next
    /// reconciler sweep to retry.
    pub async fn ensure_protective_orders(&self, signal: &mut Signal) {
        let now = self.clock.now();
        let position = match self.exchange.position_info(&signal.pair.symbol).await {
            Ok(Some(p)) => p,
            Ok(None) => return,
            Err(e) => {
                warn!(signal_id = %signal.id, error = %e, "position_info failed during TP/SL guarantee");
                return;
            }
        };

        let missing_sl = position.stop_loss.is_none();
        let missing_tp = position.take_profit.is_none();
        if !missing_sl && !missing_tp {
            return;
        }

        // §9: when both are missing and the venue call can only carry one
        // side at a time, install SL first (the safety-critical side).
        let (tp_sl, leg) = if missing_sl {
            (TpSl { take_profit: None, stop_loss: signal.stop_loss_price }, "stop_loss")
        } else {
            (TpSl { take_profit: signal.take_profit_price, stop_loss: None }, "take_profit")
        };

        match self.exchange.set_position_tp_sl(&signal.pair.symbol, tp_sl).await {
            Ok(()) => {
                if let Some(metrics) = &self.metrics {
                    metrics.inc_protective_order(leg);
                }
                let log = SignalLogEntry::new(
                    signal.id,
                    "TP_SL_INSTALLED",
                    signal.trade_status,
                    format!("installed missing {leg}"),
                    json!({"leg": leg}),
                    now,
                );
                if let Err(e) = self.repo.append_log(&log).await {
                    warn!(signal_id = %signal.id, error = %e, "failed to append TP_SL_INSTALLED log");
                }
            }
            Err(e) => {
                warn!(signal_id = %signal.id, error = %e, leg, "TP_SL_MISSING, restore attempt failed");
                let log = SignalLogEntry::new(
                    signal.id,
                    "TP_SL_RESTORE_FAILED",
                    signal.trade_status,
                    format!("failed to restore {leg}: {e}"),
                    json!({"leg": leg}),
                    now,
                );
                if let Err(e) = self.repo.append_log(&log).await {
                    warn!(signal_id = %signal.id, error = %e, "failed to append TP_SL_RESTORE_FAILED log");
                }
            }
        }
    }

    /// §4.4.6: optional, off by default. Moves SL to just inside the entry
    /// once a position has been open long enough (or favorable enough).
    pub async fn maybe_apply_breakeven(&self, signal: &mut Signal) {
        if !self.trading.breakeven_enabled {
            return;
        }
        if signal.trade_status != Some(TradeStatus::OpenPosition) {
            return;
        }
        let (Some(filled_at), Some(entry)) = (signal.filled_at, signal.entry_price) else {
            return;
        };

        let now = self.clock.now();
        let elapsed = now - filled_at;

        let current_price = match self.exchange.current_price(&signal.pair.symbol).await {
            Ok(p) => p,
            Err(_) => return,
        };
        let favorable_pct = match signal.side {
            Side::Long => (current_price - entry) / entry * dec!(100),
            Side::Short => (entry - current_price) / entry * dec!(100),
        };

        let eligible = (elapsed >= chrono::Duration::minutes(15) && favorable_pct >= dec!(0.4))
            || elapsed >= chrono::Duration::minutes(40);
        if !eligible {
            return;
        }

        let position = match self.exchange.position_info(&signal.pair.symbol).await {
            Ok(Some(p)) => p,
            _ => return,
        };

        if position.stop_loss.is_none() {
            if let Some(base_sl) = signal.stop_loss_price {
                let _ = self
                    .exchange
                    .set_position_tp_sl(&signal.pair.symbol, TpSl { take_profit: None, stop_loss: Some(base_sl) })
                    .await;
                let log = SignalLogEntry::new(
                    signal.id,
                    "TP_SL_MISSING",
                    signal.trade_status,
                    "SL missing before breakeven eligibility, installed base SL instead",
                    json!({}),
                    now,
                );
                let _ = self.repo.append_log(&log).await;
            }
            return;
        }

        let breakeven_sl = match signal.side {
            Side::Long => entry * (Decimal::ONE - BREAKEVEN_BUFFER),
            Side::Short => entry * (Decimal::ONE + BREAKEVEN_BUFFER),
        };

        let result = self
            .exchange
            .set_position_tp_sl(&signal.pair.symbol, TpSl { take_profit: None, stop_loss: Some(breakeven_sl) })
            .await;

        if result.is_ok() {
            signal.stop_loss_price = Some(breakeven_sl);
            signal.trade_status = Some(TradeStatus::SlToBreakeven);
            signal.updated_at = now;
            let log = SignalLogEntry::new(
                signal.id,
                "SL_TO_BREAKEVEN",
                signal.trade_status,
                format!("moved stop loss to breakeven at {breakeven_sl}"),
                json!({"stop_loss": breakeven_sl}),
                now,
            );
            let _ = self.repo.update_with_log(signal, &log).await;
        }
    }

    async fn park(
        &self,
        signal: &mut Signal,
        status: TradeStatus,
        event_type: &str,
        outcome: Outcome,
        details: Value,
        now: DateTime<Utc>,
    ) -> Outcome {
        signal.trade_status = Some(status);
        signal.updated_at = now;
        let log = SignalLogEntry::new(signal.id, event_type, Some(status), status.to_string(), details, now);
        if let Err(e) = self.repo.update_with_log(signal, &log).await {
            error!(signal_id = %signal.id, error = %e, "failed to persist parked state {status}");
        }
        outcome
    }

    async fn invalidate(&self, signal: &mut Signal, status: TradeStatus, event_type: &str, details: Value, now: DateTime<Utc>) -> Outcome {
        let outcome = self.park(signal, status, event_type, Outcome::Invalidated(status), details, now).await;
        if let Some(metrics) = &self.metrics {
            metrics.inc_invalidated(event_type);
        }
        outcome
    }

    async fn fail(&self, signal: &mut Signal, message: &str, now: DateTime<Utc>) -> Outcome {
        signal.trade_status = Some(TradeStatus::Failed);
        signal.last_error = Some(message.to_string());
        signal.updated_at = now;
        let log = SignalLogEntry::new(signal.id, "FAILED", signal.trade_status, message, json!({}), now);
        if let Err(e) = self.repo.update_with_log(signal, &log).await {
            error!(signal_id = %signal.id, error = %e, "failed to persist FAILED state");
        }
        if let Some(metrics) = &self.metrics {
            metrics.inc_failed(&signal.pair.symbol);
        }
        error!(signal_id = %signal.id, message, "signal execution failed");
        Outcome::Failed(message.to_string())
    }

    /// Reused by the reconciler (§4.5 steps 2-4) so the invalidation
    /// predicate has exactly one definition.
    pub(crate) fn dev_pct(current: Decimal, level: Decimal) -> Decimal {
        if level.is_zero() {
            return Decimal::MAX;
        }
        ((current / level) - Decimal::ONE).abs() * dec!(100)
    }

    pub(crate) fn invalidation_status(side: Side, level: Decimal, current: Decimal) -> Option<TradeStatus> {
        if Self::dev_pct(current, level) > INVALIDATION_DEV_PCT {
            return Some(TradeStatus::PriceDeviationTooLarge);
        }
        let broken = match side {
            Side::Long => current < level && (level - current) / level * dec!(100) > LEVEL_BROKEN_PCT,
            Side::Short => current > level && (current - level) / level * dec!(100) > LEVEL_BROKEN_PCT,
        };
        broken.then_some(TradeStatus::LevelBroken)
    }

    fn allowed_pct(vol_pct: Option<Decimal>) -> Decimal {
        match vol_pct {
            Some(v) => (dec!(0.4) + v * dec!(0.3)).clamp(dec!(0.2), dec!(1.0)),
            None => dec!(0.4),
        }
    }

    fn compute_tp_sl(side: Side, entry: Decimal, tp_pct: Decimal, sl_pct: Decimal) -> (Decimal, Decimal) {
        match side {
            Side::Long => (entry * (Decimal::ONE + tp_pct / dec!(100)), entry * (Decimal::ONE - sl_pct / dec!(100))),
            Side::Short => (entry * (Decimal::ONE - tp_pct / dec!(100)), entry * (Decimal::ONE + sl_pct / dec!(100))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::trading_mode_gate::InMemoryTradingModeGate;
    use crate::config::risk_env_config::RiskEnvConfig;
    use crate::domain::ports::{ManualClock, PositionInfo};
    use crate::domain::repositories::SignalRepository;
    use crate::domain::signal::TradingPair;
    use crate::infrastructure::exchange::mock::MockExchangeAdapter;
    use crate::infrastructure::persistence::{Database, SqliteSignalRepository};
    use chrono::Utc as ChronoUtc;

    struct Harness {
        executor: SignalExecutor,
        repo: Arc<dyn SignalRepository>,
        exchange: Arc<MockExchangeAdapter>,
        tmg: Arc<dyn TradingModeGate>,
        clock: Arc<ManualClock>,
    }

    async fn harness(trading: TradingEnvConfig) -> Harness {
        let db = Database::new("sqlite::memory:").await.expect("db init");
        let repo: Arc<dyn SignalRepository> = Arc::new(SqliteSignalRepository::new(db.pool.clone()));
        let exchange = Arc::new(MockExchangeAdapter::new());
        let tmg: Arc<dyn TradingModeGate> = Arc::new(InMemoryTradingModeGate::new(true));
        let clock = Arc::new(ManualClock::new(ChronoUtc::now()));

        let risk_config = RiskEnvConfig {
            daily_loss_limit_pct: dec!(-5.0),
            max_consecutive_losses: 5,
            round_trip_commission_pct: Decimal::ZERO,
        };
        let risk_manager = Arc::new(
            RiskManager::new(repo.clone(), tmg.clone(), clock.clone(), risk_config, db.pool.clone()).await,
        );

        let executor = SignalExecutor::new(
            repo.clone(),
            exchange.clone(),
            tmg.clone(),
            risk_manager,
            clock.clone(),
            trading,
            5,
            true,
            None,
        );

        Harness { executor, repo, exchange, tmg, clock }
    }

    fn default_trading() -> TradingEnvConfig {
        TradingEnvConfig {
            order_size_usdt: dec!(50),
            quantity_precision: 3,
            take_profit_percent: dec!(1.5),
            stop_loss_percent: dec!(0.5),
            market_entry_threshold_pct: dec!(0),
            order_cancel_deviation_pct: dec!(1.5),
            auto_trading_enabled: true,
            breakeven_enabled: false,
        }
    }

    async fn new_signal(repo: &Arc<dyn SignalRepository>, clock: &Arc<ManualClock>, side: Side, level: Decimal) -> Uuid {
        let signal = Signal::new(TradingPair::new("BTC/USDT"), side, level, true, true, clock.now());
        repo.create(&signal).await.expect("create signal")
    }

    #[tokio::test(start_paused = true)]
    async fn happy_path_long_submits_and_fills() {
        let h = harness(default_trading()).await;
        let id = new_signal(&h.repo, &h.clock, Side::Long, dec!(20000)).await;

        h.exchange.set_price("BTC/USDT", dec!(20005));
        h.exchange.set_volatility("BTC/USDT", dec!(0.1));
        h.exchange.set_fill(
            "mock-order-1",
            FillInfo { price: dec!(19998), timestamp: h.clock.now() },
        );

        let outcome = h.executor.attempt(id, false).await;
        assert_eq!(outcome, Outcome::Submitted);

        let signal = h.repo.get(id).await.unwrap();
        assert_eq!(signal.trade_status, Some(TradeStatus::OpenPosition));
        assert_eq!(signal.entry_price, Some(dec!(19998)));
        assert_eq!(signal.quantity, Some(dec!(0.002)));
        assert_eq!(signal.stop_loss_price, Some(dec!(19998) * (Decimal::ONE - dec!(0.005))));

        let placed = h.exchange.placed_orders();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].side, Side::Long);
    }

    #[tokio::test(start_paused = true)]
    async fn too_far_deviation_invalidates_without_placing_order() {
        let h = harness(default_trading()).await;
        let id = new_signal(&h.repo, &h.clock, Side::Long, dec!(100)).await;

        // allowed=0.4 (vol failure default), too_far=1.2; dev=1% stays in the
        // "keep polling" band until the loop sees 1.5% and crosses too_far.
        h.exchange.set_price("BTC/USDT", dec!(101.5));

        let outcome = h.executor.attempt(id, false).await;
        assert_eq!(outcome, Outcome::Invalidated(TradeStatus::PriceDeviationTooLarge));
        assert!(h.exchange.placed_orders().is_empty());

        let signal = h.repo.get(id).await.unwrap();
        assert_eq!(signal.trade_status, Some(TradeStatus::PriceDeviationTooLarge));
    }

    #[tokio::test(start_paused = true)]
    async fn risk_blocked_short_circuits_before_any_venue_call() {
        let h = harness(default_trading()).await;
        let id = new_signal(&h.repo, &h.clock, Side::Long, dec!(20000)).await;

        // Seed a closed losing signal beyond the daily loss limit.
        let mut losing = Signal::new(TradingPair::new("BTC/USDT"), Side::Long, dec!(20000), true, true, h.clock.now());
        losing.status = SignalStatus::Closed;
        losing.entry_price = Some(dec!(20000));
        losing.exit_price = Some(dec!(18900));
        losing.exit_reason = Some(crate::domain::types::ExitReason::StopLoss);
        h.repo.create(&losing).await.unwrap();

        let outcome = h.executor.attempt(id, false).await;
        assert_eq!(outcome, Outcome::RiskBlocked);
        assert!(!h.tmg.is_live_enabled().await);
        assert!(h.exchange.placed_orders().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn live_disabled_parks_signal_without_venue_call() {
        let h = harness(default_trading()).await;
        h.tmg.set_live_enabled(false).await;
        let id = new_signal(&h.repo, &h.clock, Side::Long, dec!(20000)).await;

        let outcome = h.executor.attempt(id, false).await;
        assert_eq!(outcome, Outcome::Disabled);

        let signal = h.repo.get(id).await.unwrap();
        assert_eq!(signal.trade_status, Some(TradeStatus::LiveDisabled));
        assert!(h.exchange.placed_orders().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn ensure_protective_orders_installs_missing_stop_loss() {
        let h = harness(default_trading()).await;
        let id = new_signal(&h.repo, &h.clock, Side::Long, dec!(20000)).await;
        let mut signal = h.repo.get(id).await.unwrap();
        signal.entry_price = Some(dec!(20000));
        signal.take_profit_price = Some(dec!(20300));
        signal.stop_loss_price = Some(dec!(19900));
        signal.trade_status = Some(TradeStatus::OpenPosition);
        h.repo.update(&signal).await.unwrap();

        h.exchange.set_position(
            "BTC/USDT",
            PositionInfo {
                side: Side::Long,
                contracts: dec!(0.01),
                entry_price: dec!(20000),
                take_profit: Some(dec!(20300)),
                stop_loss: None,
                position_idx: 0,
            },
        );

        h.executor.ensure_protective_orders(&mut signal).await;

        let calls = h.exchange.tp_sl_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1.stop_loss, Some(dec!(19900)));
        assert_eq!(calls[0].1.take_profit, None);
    }
}
