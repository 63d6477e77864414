//! End-to-end scenarios against a deterministic mock venue and a
//! controllable clock, exercising `SignalExecutor`/`Reconciler` together
//! the way the process actually wires them.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use signal_executor::application::reconciler::Reconciler;
use signal_executor::application::risk_manager::RiskManager;
use signal_executor::application::signal_executor::SignalExecutor;
use signal_executor::application::trading_mode_gate::InMemoryTradingModeGate;
use signal_executor::config::risk_env_config::RiskEnvConfig;
use signal_executor::config::trading_config::TradingEnvConfig;
use signal_executor::domain::ports::{Clock, ExitInfo, FillInfo, ManualClock, PositionInfo, TradingModeGate};
use signal_executor::domain::repositories::SignalRepository;
use signal_executor::domain::signal::{Signal, TradingPair};
use signal_executor::domain::types::{ExitReason, Outcome, Side, SignalStatus, TradeStatus};
use signal_executor::infrastructure::exchange::MockExchangeAdapter;
use signal_executor::infrastructure::persistence::{Database, SqliteSignalRepository};

struct Harness {
    repo: Arc<dyn SignalRepository>,
    exchange: Arc<MockExchangeAdapter>,
    tmg: Arc<dyn TradingModeGate>,
    clock: Arc<ManualClock>,
    executor: SignalExecutor,
    reconciler: Reconciler,
}

fn trading(order_cancel_deviation_pct: Decimal) -> TradingEnvConfig {
    TradingEnvConfig {
        order_size_usdt: dec!(50),
        quantity_precision: 3,
        take_profit_percent: dec!(1.5),
        stop_loss_percent: dec!(0.5),
        market_entry_threshold_pct: dec!(0),
        order_cancel_deviation_pct,
        auto_trading_enabled: true,
        breakeven_enabled: false,
    }
}

async fn harness(trading_config: TradingEnvConfig) -> Harness {
    let db = Database::new("sqlite::memory:").await.expect("db init");
    let repo: Arc<dyn SignalRepository> = Arc::new(SqliteSignalRepository::new(db.pool.clone()));
    let exchange = Arc::new(MockExchangeAdapter::new());
    let tmg: Arc<dyn TradingModeGate> = Arc::new(InMemoryTradingModeGate::new(true));
    let clock = Arc::new(ManualClock::new(Utc::now()));

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
        risk_manager.clone(),
        clock.clone(),
        trading_config.clone(),
        5,
        true,
        None,
    );

    let reconciler_executor = Arc::new(SignalExecutor::new(
        repo.clone(),
        exchange.clone(),
        tmg.clone(),
        risk_manager.clone(),
        clock.clone(),
        trading_config.clone(),
        5,
        true,
        None,
    ));

    let reconciler = Reconciler::new(
        repo.clone(),
        exchange.clone(),
        reconciler_executor,
        risk_manager,
        clock.clone(),
        trading_config,
        None,
    );

    Harness { repo, exchange, tmg, clock, executor, reconciler }
}

async fn new_signal(h: &Harness, side: Side, level: Decimal) -> Uuid {
    let signal = Signal::new(TradingPair::new("BTC/USDT"), side, level, true, true, h.clock.now());
    h.repo.create(&signal).await.expect("create signal")
}

#[tokio::test(start_paused = true)]
async fn s1_happy_path_long_closes_on_take_profit() {
    let h = harness(trading(dec!(1.5))).await;
    let id = new_signal(&h, Side::Long, dec!(20000)).await;

    h.exchange.set_price("BTC/USDT", dec!(20005));
    h.exchange.set_volatility("BTC/USDT", dec!(0.1));
    h.exchange.set_fill("mock-order-1", FillInfo { price: dec!(19998), timestamp: h.clock.now() });

    let outcome = h.executor.attempt(id, false).await;
    assert_eq!(outcome, Outcome::Submitted);

    let signal = h.repo.get(id).await.unwrap();
    assert_eq!(signal.entry_price, Some(dec!(19998)));
    assert_eq!(signal.quantity, Some(dec!(0.002)));
    assert_eq!(signal.trade_status, Some(TradeStatus::OpenPosition));

    // position_info initially reports both legs set (SE already repaired
    // them post-fill); the venue later reports the position gone with a
    // TAKE_PROFIT exit.
    h.exchange.clear_position("BTC/USDT");
    h.exchange.set_exit(
        "mock-order-1",
        ExitInfo { price: dec!(20298.97), timestamp: h.clock.now() + chrono::Duration::seconds(70), reason: ExitReason::TakeProfit },
    );

    h.reconciler.run_sweep().await;

    let closed = h.repo.get(id).await.unwrap();
    assert_eq!(closed.status, SignalStatus::Closed);
    assert_eq!(closed.exit_price, Some(dec!(20298.97)));
    assert_eq!(closed.exit_reason, Some(ExitReason::TakeProfit));
}

#[tokio::test(start_paused = true)]
async fn s2_waiting_then_too_far_invalidates_without_order() {
    let h = harness(trading(dec!(1.5))).await;
    let id = new_signal(&h, Side::Long, dec!(100)).await;

    h.exchange.set_price("BTC/USDT", dec!(101.5));

    let outcome = h.executor.attempt(id, false).await;
    assert_eq!(outcome, Outcome::Invalidated(TradeStatus::PriceDeviationTooLarge));
    assert!(h.exchange.placed_orders().is_empty());

    let signal = h.repo.get(id).await.unwrap();
    assert_eq!(signal.trade_status, Some(TradeStatus::PriceDeviationTooLarge));
}

#[tokio::test(start_paused = true)]
async fn s3_reactivation_restores_waiting_then_submits() {
    let h = harness(trading(dec!(1.5))).await;
    let id = new_signal(&h, Side::Long, dec!(100)).await;

    h.exchange.set_price("BTC/USDT", dec!(101.5));
    let outcome = h.executor.attempt(id, false).await;
    assert_eq!(outcome, Outcome::Invalidated(TradeStatus::PriceDeviationTooLarge));

    h.clock.advance(chrono::Duration::minutes(2));
    h.exchange.set_price("BTC/USDT", dec!(100.2));
    h.exchange.set_fill("mock-order-1", FillInfo { price: dec!(100.2), timestamp: h.clock.now() });

    h.reconciler.run_sweep().await;

    let revived = h.repo.get(id).await.unwrap();
    assert_eq!(revived.trade_status, Some(TradeStatus::OpenPosition));
    assert_eq!(h.exchange.placed_orders().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn s4_missing_sl_is_repaired_preserving_tp() {
    let h = harness(trading(dec!(1.5))).await;
    let id = new_signal(&h, Side::Long, dec!(20000)).await;

    h.exchange.set_price("BTC/USDT", dec!(20005));
    h.exchange.set_fill("mock-order-1", FillInfo { price: dec!(19998), timestamp: h.clock.now() });
    h.executor.attempt(id, false).await;

    // Simulate the venue reporting TP set but SL missing after the fill.
    h.exchange.set_position(
        "BTC/USDT",
        PositionInfo {
            side: Side::Long,
            contracts: dec!(0.002),
            entry_price: dec!(19998),
            take_profit: Some(dec!(20298)),
            stop_loss: None,
            position_idx: 0,
        },
    );

    h.reconciler.run_sweep().await;

    let calls = h.exchange.tp_sl_calls();
    assert!(calls.iter().any(|(_, tp_sl)| tp_sl.stop_loss.is_some() && tp_sl.take_profit.is_none()));
    assert_eq!(h.exchange.placed_orders().len(), 1, "no new entry order was placed during repair");
}

#[tokio::test(start_paused = true)]
async fn s5_risk_cutoff_disables_live_before_any_venue_call() {
    let h = harness(trading(dec!(1.5))).await;

    let mut losing = Signal::new(TradingPair::new("BTC/USDT"), Side::Long, dec!(20000), true, true, h.clock.now());
    losing.status = SignalStatus::Closed;
    losing.entry_price = Some(dec!(20000));
    losing.exit_price = Some(dec!(18900));
    losing.exit_reason = Some(ExitReason::StopLoss);
    h.repo.create(&losing).await.unwrap();

    let id = new_signal(&h, Side::Long, dec!(20000)).await;
    let outcome = h.executor.attempt(id, false).await;

    assert_eq!(outcome, Outcome::RiskBlocked);
    assert!(!h.tmg.is_live_enabled().await);
    assert!(h.exchange.placed_orders().is_empty());
}

#[tokio::test(start_paused = true)]
async fn s6_stale_entry_cancelled_on_latched_max_deviation() {
    let h = harness(trading(dec!(1.5))).await;
    let id = new_signal(&h, Side::Long, dec!(100)).await;

    // Force a limit entry at 100.0 by making the deviation exceed the
    // market-entry threshold but stay under the invalidation gate.
    h.exchange.set_price("BTC/USDT", dec!(100.5));
    h.exchange.set_volatility("BTC/USDT", dec!(2.0));
    let outcome = h.executor.attempt(id, false).await;
    assert_eq!(outcome, Outcome::Submitted);
    assert_eq!(h.repo.get(id).await.unwrap().trade_status, Some(TradeStatus::Placed));

    // Price spikes through the cancel threshold then returns; the latched
    // max must still trigger the cancel.
    h.exchange.set_price("BTC/USDT", dec!(102));
    h.reconciler.run_sweep().await;
    h.exchange.set_price("BTC/USDT", dec!(100.3));
    h.reconciler.run_sweep().await;

    let signal = h.repo.get(id).await.unwrap();
    assert_eq!(signal.trade_status, Some(TradeStatus::OrderCancelledPriceMoved));
    assert_eq!(h.exchange.cancelled_orders().len(), 1);
}
