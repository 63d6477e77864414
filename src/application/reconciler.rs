//! Reconciler (§4.5): the periodic sweep that repairs divergence between
//! the Signal Ledger and venue truth. Ten ordered steps, each touching a
//! disjoint set of signals and committing per signal; a single failing
//! signal never aborts the sweep.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{error, warn};

use crate::application::risk_manager::RiskManager;
use crate::application::signal_executor::SignalExecutor;
use crate::config::trading_config::TradingEnvConfig;
use crate::domain::errors::LedgerError;
use crate::domain::ports::{Clock, ExchangeAdapter};
use crate::domain::repositories::SignalRepository;
use crate::domain::signal::{Signal, SignalLogEntry};
use crate::domain::types::{Side, TradeStatus};
use crate::infrastructure::observability::metrics::Metrics;

/// §4.4 step 9 / §4.5 steps 2-3: signals older than this are abandoned
/// rather than revived or retried, mirroring `SignalExecutor`'s own gate.
const SIGNAL_MAX_AGE: chrono::Duration = chrono::Duration::minutes(30);

pub struct Reconciler {
    repo: Arc<dyn SignalRepository>,
    exchange: Arc<dyn ExchangeAdapter>,
    executor: Arc<SignalExecutor>,
    risk_manager: Arc<RiskManager>,
    clock: Arc<dyn Clock>,
    trading: TradingEnvConfig,
    metrics: Option<Arc<Metrics>>,
}

impl Reconciler {
    pub fn new(
        repo: Arc<dyn SignalRepository>,
        exchange: Arc<dyn ExchangeAdapter>,
        executor: Arc<SignalExecutor>,
        risk_manager: Arc<RiskManager>,
        clock: Arc<dyn Clock>,
        trading: TradingEnvConfig,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self { repo, exchange, executor, risk_manager, clock, trading, metrics }
    }

    /// Runs the ten sweep steps in order (§4.5). Called by the scheduler's
    /// `reconciler` periodic job, or directly from a test/operator surface.
    pub async fn run_sweep(&self) {
        let any_closed = {
            self.step1_pending_without_order().await;
            self.step2_revive_invalidated().await;
            self.step3_waiting_signals().await;
            self.step4_stale_entry_orders().await;
            self.step5_orphan_closures().await;
            self.step6_fill_detection().await;
            let closed = self.step7_close_detection().await;
            self.step8_protective_order_repair().await;
            self.step9_mfe_mae_thresholds().await;
            closed
        };

        self.timed("risk_enforcement", || async {
            if any_closed {
                if let Err(e) = self.risk_manager.enforce().await {
                    warn!(error = %e, "step10: risk enforcement failed during sweep");
                }
            }
        })
        .await;
    }

    async fn timed<F, Fut>(&self, step: &str, f: F)
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let start = Instant::now();
        f().await;
        if let Some(metrics) = &self.metrics {
            metrics.observe_sweep_step(step, start.elapsed().as_secs_f64());
        }
    }

    /// Step 1: pending signals with no order yet get a normal `attempt`.
    async fn step1_pending_without_order(&self) {
        self.timed("pending_without_order", || async {
            let signals = match self.repo.list_active_waiting().await {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "step1: list_active_waiting failed");
                    return;
                }
            };
            for signal in signals {
                if signal.age(self.clock.now()) > SIGNAL_MAX_AGE {
                    continue;
                }
                let outcome = self.executor.attempt(signal.id, false).await;
                tracing::debug!(signal_id = %signal.id, ?outcome, "step1: attempt");
            }
        })
        .await;
    }

    /// Step 2: an invalidated signal whose predicate no longer holds is
    /// restored to `WAITING_FOR_PRICE` rather than left to expire.
    async fn step2_revive_invalidated(&self) {
        self.timed("revive_invalidated", || async {
            let signals = match self.repo.list_invalidated().await {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "step2: list_invalidated failed");
                    return;
                }
            };
            let now = self.clock.now();
            for mut signal in signals {
                if signal.age(now) > SIGNAL_MAX_AGE {
                    continue;
                }
                let current_price = match self.exchange.current_price(&signal.pair.symbol).await {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(signal_id = %signal.id, error = %e, "step2: current_price failed");
                        continue;
                    }
                };
                if SignalExecutor::invalidation_status(signal.side, signal.level_price, current_price).is_some() {
                    continue;
                }
                let event_type = match signal.trade_status {
                    Some(TradeStatus::LevelBroken) => "LEVEL_RESTORED",
                    _ => "PRICE_RESTORED",
                };
                signal.trade_status = Some(TradeStatus::WaitingForPrice);
                signal.updated_at = now;
                let log = SignalLogEntry::new(
                    signal.id,
                    event_type,
                    signal.trade_status,
                    format!("invalidation predicate no longer holds at {current_price}"),
                    json!({"current_price": current_price}),
                    now,
                );
                if let Err(e) = self.repo.update_with_log(&signal, &log).await {
                    warn!(signal_id = %signal.id, error = %e, "step2: failed to persist revival");
                }
            }
        })
        .await;
    }

    /// Step 3: signals parked in `WAITING_FOR_PRICE` either age out, stay
    /// invalidated, or get a single-shot reconciler `attempt`.
    async fn step3_waiting_signals(&self) {
        self.timed("waiting_signals", || async {
            let signals = match self.repo.list_waiting().await {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "step3: list_waiting failed");
                    return;
                }
            };
            let now = self.clock.now();
            for signal in signals {
                if signal.age(now) > SIGNAL_MAX_AGE {
                    let mut signal = signal;
                    signal.trade_status = Some(TradeStatus::SignalTooOld);
                    signal.updated_at = now;
                    let log = SignalLogEntry::new(
                        signal.id,
                        "SIGNAL_TOO_OLD",
                        signal.trade_status,
                        "waiting signal expired",
                        json!({}),
                        now,
                    );
                    if let Err(e) = self.repo.update_with_log(&signal, &log).await {
                        warn!(signal_id = %signal.id, error = %e, "step3: failed to persist expiry");
                    }
                    continue;
                }
                let outcome = self.executor.attempt(signal.id, true).await;
                tracing::debug!(signal_id = %signal.id, ?outcome, "step3: attempt");
            }
        })
        .await;
    }

    /// Step 4: cancels a stale entry order once its latched max deviation
    /// crosses `order_cancel_deviation_pct`.
    async fn step4_stale_entry_orders(&self) {
        self.timed("stale_entry_orders", || async {
            let signals = match self.repo.list_active_with_open_order().await {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "step4: list_active_with_open_order failed");
                    return;
                }
            };
            let now = self.clock.now();
            for mut signal in signals {
                let Some(status) = signal.trade_status else { continue };
                if !status.is_open_entry_order() {
                    continue;
                }
                let current_price = match self.exchange.current_price(&signal.pair.symbol).await {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(signal_id = %signal.id, error = %e, "step4: current_price failed");
                        continue;
                    }
                };
                let dev_pct = SignalExecutor::dev_pct(current_price, signal.level_price);
                signal.meta.latch_max_deviation(dev_pct);
                let max_dev = signal.meta.max_price_deviation_pct.unwrap_or(dev_pct);

                if max_dev <= self.trading.order_cancel_deviation_pct {
                    if let Err(e) = self.repo.update(&signal).await {
                        warn!(signal_id = %signal.id, error = %e, "step4: failed to persist latched deviation");
                    }
                    continue;
                }

                if let Some(order_id) = signal.order_id.clone() {
                    if let Err(e) = self.exchange.cancel_order(&order_id, &signal.pair.symbol).await {
                        warn!(signal_id = %signal.id, error = %e, "step4: cancel_order failed");
                        if let Err(e) = self.repo.update(&signal).await {
                            warn!(signal_id = %signal.id, error = %e, "step4: failed to persist latched deviation after cancel failure");
                        }
                        continue;
                    }
                }

                signal.trade_status = Some(TradeStatus::OrderCancelledPriceMoved);
                signal.updated_at = now;
                let log = SignalLogEntry::new(
                    signal.id,
                    "ORDER_CANCELLED_PRICE_MOVED",
                    signal.trade_status,
                    format!("max deviation {max_dev}% exceeded cancel threshold {}%", self.trading.order_cancel_deviation_pct),
                    json!({"max_price_deviation_pct": max_dev}),
                    now,
                );
                if let Err(e) = self.repo.update_with_log(&signal, &log).await {
                    warn!(signal_id = %signal.id, error = %e, "step4: failed to persist cancellation");
                }
            }
        })
        .await;
    }

    /// Step 5: a closed signal that never reached the venue (no order id,
    /// still in the waiting family) is marked so it stops being swept.
    async fn step5_orphan_closures(&self) {
        self.timed("orphan_closures", || async {
            let signals = match self.repo.list_orphaned_closures().await {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "step5: list_orphaned_closures failed");
                    return;
                }
            };
            let now = self.clock.now();
            for mut signal in signals {
                signal.trade_status = Some(TradeStatus::SignalClosedNoOrder);
                signal.updated_at = now;
                let log = SignalLogEntry::new(
                    signal.id,
                    "SIGNAL_CLOSED_NO_ORDER",
                    signal.trade_status,
                    "signal closed upstream with no venue order ever placed",
                    json!({}),
                    now,
                );
                if let Err(e) = self.repo.update_with_log(&signal, &log).await {
                    warn!(signal_id = %signal.id, error = %e, "step5: failed to persist orphan closure");
                }
            }
        })
        .await;
    }

    /// Step 6: detects a real fill for signals still sitting at `PLACED`.
    async fn step6_fill_detection(&self) {
        self.timed("fill_detection", || async {
            let signals = match self.repo.list_placed_unfilled().await {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "step6: list_placed_unfilled failed");
                    return;
                }
            };
            for mut signal in signals {
                let Some(order_id) = signal.order_id.clone() else { continue };
                let fill = match self.exchange.order_fill_info(&order_id, &signal.pair.symbol).await {
                    Ok(Some(f)) => f,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(signal_id = %signal.id, error = %e, "step6: order_fill_info failed");
                        continue;
                    }
                };
                let expected_entry = self.expected_entry(&signal);
                let outcome = self.executor.apply_fill(&mut signal, fill, expected_entry).await;
                tracing::debug!(signal_id = %signal.id, ?outcome, "step6: fill detected");
            }
        })
        .await;
    }

    /// The entry price implied by the order actually submitted, recovered
    /// from notional/quantity since the raw chosen price is not itself
    /// persisted past submission (only `quantity` survives).
    fn expected_entry(&self, signal: &Signal) -> Decimal {
        match signal.quantity {
            Some(q) if !q.is_zero() => self.trading.order_size_usdt / q,
            _ => signal.level_price,
        }
    }

    /// Step 7: detects a closed position for every currently-open signal
    /// whose exit has not yet been recorded.
    async fn step7_close_detection(&self) -> bool {
        let mut any_closed = false;
        self.timed("close_detection", || async {
            let signals = match self.repo.list_filled_open().await {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "step7: list_filled_open failed");
                    return;
                }
            };
            let now = self.clock.now();
            for mut signal in signals {
                let (Some(filled_at), Some(_entry)) = (signal.filled_at, signal.entry_price) else { continue };
                if signal.exit_price.is_some() {
                    continue;
                }
                let position = match self.exchange.position_info(&signal.pair.symbol).await {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(signal_id = %signal.id, error = %e, "step7: position_info failed");
                        continue;
                    }
                };
                if position.is_some_and(|p| !p.contracts.is_zero()) {
                    continue;
                }
                let Some(order_id) = signal.order_id.clone() else { continue };
                let exit = match self.exchange.exit_fill_info(&signal.pair.symbol, &order_id, filled_at, signal.side).await {
                    Ok(Some(e)) => e,
                    Ok(None) => {
                        tracing::debug!(signal_id = %signal.id, "step7: position gone, exit not yet observed");
                        continue;
                    }
                    Err(e) => {
                        warn!(signal_id = %signal.id, error = %e, "step7: exit_fill_info failed");
                        continue;
                    }
                };

                signal.exit_price = Some(exit.price);
                signal.exit_at = Some(exit.timestamp);
                signal.exit_reason = Some(exit.reason);
                signal.status = crate::domain::types::SignalStatus::Closed;
                signal.updated_at = now;
                let log = SignalLogEntry::new(
                    signal.id,
                    "POSITION_CLOSED",
                    signal.trade_status,
                    format!("closed at {} ({})", exit.price, exit.reason),
                    json!({"exit_price": exit.price, "exit_reason": exit.reason.to_string()}),
                    now,
                );
                if self.repo.update_with_log(&signal, &log).await.is_ok() {
                    any_closed = true;
                } else {
                    error!(signal_id = %signal.id, "step7: failed to persist position close");
                }
            }
        })
        .await;
        any_closed
    }

    /// Step 8: re-applies the protective-order guarantee to every signal
    /// still holding an open position (§4.4.5).
    async fn step8_protective_order_repair(&self) {
        self.timed("protective_order_repair", || async {
            let signals = match self.repo.list_filled_open().await {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "step8: list_filled_open failed");
                    return;
                }
            };
            for mut signal in signals {
                self.executor.ensure_protective_orders(&mut signal).await;
                self.executor.maybe_apply_breakeven(&mut signal).await;
            }
        })
        .await;
    }

    /// Step 9: updates MFE/MAE and records first-touch profit-threshold
    /// timestamps for every currently-open position.
    async fn step9_mfe_mae_thresholds(&self) {
        self.timed("mfe_mae_thresholds", || async {
            let signals = match self.repo.list_filled_open().await {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "step9: list_filled_open failed");
                    return;
                }
            };
            let now = self.clock.now();
            for mut signal in signals {
                let Some(entry) = signal.entry_price else { continue };
                if entry.is_zero() {
                    continue;
                }
                let current_price = match self.exchange.current_price(&signal.pair.symbol).await {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(signal_id = %signal.id, error = %e, "step9: current_price failed");
                        continue;
                    }
                };
                let pnl_pct = Self::unrealized_pnl_pct(signal.side, entry, current_price);
                let before = (signal.meta.max_favorable_move_pct, signal.meta.max_adverse_move_pct);
                Self::latch_mfe_mae(&mut signal, pnl_pct, now);
                if (signal.meta.max_favorable_move_pct, signal.meta.max_adverse_move_pct) == before
                    && !Self::crossed_new_threshold(&signal, pnl_pct)
                {
                    continue;
                }
                signal.updated_at = now;
                let log = SignalLogEntry::new(
                    signal.id,
                    "THRESHOLD_HIT",
                    signal.trade_status,
                    format!("unrealized pnl {pnl_pct}%"),
                    json!({"pnl_pct": pnl_pct}),
                    now,
                );
                if let Err(e) = self.repo.update_with_log(&signal, &log).await {
                    warn!(signal_id = %signal.id, error = %e, "step9: failed to persist MFE/MAE update");
                }
            }
        })
        .await;
    }

    fn unrealized_pnl_pct(side: Side, entry: Decimal, current: Decimal) -> Decimal {
        use rust_decimal_macros::dec;
        match side {
            Side::Long => (current - entry) / entry * dec!(100),
            Side::Short => (entry - current) / entry * dec!(100),
        }
    }

    fn latch_mfe_mae(signal: &mut Signal, pnl_pct: Decimal, now: DateTime<Utc>) {
        if pnl_pct > Decimal::ZERO {
            signal.meta.max_favorable_move_pct = Some(match signal.meta.max_favorable_move_pct {
                Some(prev) if prev >= pnl_pct => prev,
                _ => pnl_pct,
            });
            signal.meta.record_threshold_touch(pnl_pct, now);
        } else if pnl_pct < Decimal::ZERO {
            let adverse = -pnl_pct;
            signal.meta.max_adverse_move_pct = Some(match signal.meta.max_adverse_move_pct {
                Some(prev) if prev >= adverse => prev,
                _ => adverse,
            });
        }
    }

    fn crossed_new_threshold(signal: &Signal, pnl_pct: Decimal) -> bool {
        use rust_decimal_macros::dec;
        (pnl_pct >= dec!(0.5) && signal.meta.threshold_0_5_touched_at.is_none())
            || (pnl_pct >= dec!(1.0) && signal.meta.threshold_1_0_touched_at.is_none())
            || (pnl_pct >= dec!(1.5) && signal.meta.threshold_1_5_touched_at.is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::risk_manager::RiskManager;
    use crate::application::trading_mode_gate::InMemoryTradingModeGate;
    use crate::config::risk_env_config::RiskEnvConfig;
    use crate::domain::ports::{ManualClock, PositionInfo, TradingModeGate};
    use crate::domain::signal::TradingPair;
    use crate::domain::types::{ExitReason, TradeStatus};
    use crate::infrastructure::exchange::mock::MockExchangeAdapter;
    use crate::infrastructure::persistence::{Database, SqliteSignalRepository};
    use chrono::Utc as ChronoUtc;
    use rust_decimal_macros::dec;

    struct Harness {
        reconciler: Reconciler,
        repo: Arc<dyn SignalRepository>,
        exchange: Arc<MockExchangeAdapter>,
        clock: Arc<ManualClock>,
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

    async fn harness() -> Harness {
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
        let executor = Arc::new(SignalExecutor::new(
            repo.clone(),
            exchange.clone(),
            tmg.clone(),
            risk_manager.clone(),
            clock.clone(),
            default_trading(),
            5,
            true,
            None,
        ));

        let reconciler = Reconciler::new(
            repo.clone(),
            exchange.clone(),
            executor,
            risk_manager,
            clock.clone(),
            default_trading(),
            None,
        );

        Harness { reconciler, repo, exchange, clock }
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_closes_a_position_the_venue_no_longer_holds() {
        let h = harness().await;
        let mut signal = Signal::new(TradingPair::new("BTC/USDT"), Side::Long, dec!(20000), true, true, h.clock.now());
        signal.order_id = Some("mock-order-1".to_string());
        signal.trade_status = Some(TradeStatus::OpenPosition);
        signal.entry_price = Some(dec!(20000));
        signal.filled_at = Some(h.clock.now());
        signal.quantity = Some(dec!(0.0025));
        let id = h.repo.create(&signal).await.unwrap();

        h.exchange.set_exit(
            "mock-order-1",
            crate::domain::ports::ExitInfo { price: dec!(20300), timestamp: h.clock.now(), reason: ExitReason::TakeProfit },
        );

        h.reconciler.run_sweep().await;

        let closed = h.repo.get(id).await.unwrap();
        assert_eq!(closed.status, crate::domain::types::SignalStatus::Closed);
        assert_eq!(closed.exit_price, Some(dec!(20300)));
        assert_eq!(closed.exit_reason, Some(ExitReason::TakeProfit));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_cancels_stale_entry_order_past_deviation_threshold() {
        let h = harness().await;
        let mut signal = Signal::new(TradingPair::new("BTC/USDT"), Side::Long, dec!(20000), true, true, h.clock.now());
        signal.order_id = Some("mock-order-1".to_string());
        signal.trade_status = Some(TradeStatus::Placed);
        let id = h.repo.create(&signal).await.unwrap();

        h.exchange.set_price("BTC/USDT", dec!(20500));

        h.reconciler.run_sweep().await;

        let updated = h.repo.get(id).await.unwrap();
        assert_eq!(updated.trade_status, Some(TradeStatus::OrderCancelledPriceMoved));
        assert_eq!(h.exchange.cancelled_orders(), vec!["mock-order-1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_repairs_missing_stop_loss_on_open_position() {
        let h = harness().await;
        let mut signal = Signal::new(TradingPair::new("BTC/USDT"), Side::Long, dec!(20000), true, true, h.clock.now());
        signal.trade_status = Some(TradeStatus::OpenPosition);
        signal.entry_price = Some(dec!(20000));
        signal.stop_loss_price = Some(dec!(19900));
        signal.take_profit_price = Some(dec!(20300));
        signal.filled_at = Some(h.clock.now());
        h.repo.create(&signal).await.unwrap();

        h.exchange.set_position(
            "BTC/USDT",
            PositionInfo {
                side: Side::Long,
                contracts: dec!(0.0025),
                entry_price: dec!(20000),
                take_profit: Some(dec!(20300)),
                stop_loss: None,
                position_idx: 0,
            },
        );

        h.reconciler.run_sweep().await;

        let calls = h.exchange.tp_sl_calls();
        assert!(calls.iter().any(|(_, tp_sl)| tp_sl.stop_loss == Some(dec!(19900))));
    }
}
