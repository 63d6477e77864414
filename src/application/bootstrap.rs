//! Wiring (§10): builds every component from `Config`, registers the
//! scheduler's job bodies, and exposes a handle the binary can start and
//! later shut down against.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use crate::application::housekeeping::Housekeeper;
use crate::application::reconciler::Reconciler;
use crate::application::risk_manager::RiskManager;
use crate::application::signal_executor::SignalExecutor;
use crate::application::trading_mode_gate::SqliteTradingModeGate;
use crate::config::Config;
use crate::domain::ports::{Clock, ExchangeAdapter, Scheduler, SystemClock, TradingModeGate};
use crate::domain::repositories::SignalRepository;
use crate::infrastructure::exchange::BybitExchangeAdapter;
use crate::infrastructure::observability::{Metrics, MetricsReporter};
use crate::infrastructure::persistence::{Database, SqliteSignalRepository};
use crate::infrastructure::scheduler::TokioScheduler;

const INITIAL_SUBMIT_JOB: &str = "initial_submit";
const RECONCILER_JOB: &str = "reconciler";
const HOUSEKEEPING_JOB: &str = "housekeeping";

/// Every wired component an operator surface or the binary entry point
/// might need to reach directly.
pub struct Application {
    pub repo: Arc<dyn SignalRepository>,
    pub tmg: Arc<dyn TradingModeGate>,
    pub risk_manager: Arc<RiskManager>,
    pub executor: Arc<SignalExecutor>,
    pub reconciler: Arc<Reconciler>,
    pub scheduler: Arc<TokioScheduler>,
    pub metrics: Option<Arc<Metrics>>,
    pool: sqlx::SqlitePool,
    config: Config,
}

impl Application {
    /// Builds every component. Does not start any background task --
    /// callers invoke `start()` once they have the handle.
    pub async fn build(config: Config) -> Result<Self> {
        let db = Database::new(&config.database_url).await?;
        let repo: Arc<dyn SignalRepository> = Arc::new(SqliteSignalRepository::new(db.pool.clone()));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let tmg: Arc<dyn TradingModeGate> = Arc::new(SqliteTradingModeGate::load(db.pool.clone()).await);

        let risk_manager = Arc::new(
            RiskManager::new(repo.clone(), tmg.clone(), clock.clone(), config.risk.clone(), db.pool.clone()).await,
        );

        let exchange_configured = !config.exchange.api_key.is_empty() && !config.exchange.api_secret.is_empty();
        let exchange: Arc<dyn ExchangeAdapter> = Arc::new(BybitExchangeAdapter::new(config.exchange.clone()));

        let metrics = if config.observability.enabled {
            Some(Arc::new(Metrics::new()?))
        } else {
            None
        };

        let executor = Arc::new(SignalExecutor::new(
            repo.clone(),
            exchange.clone(),
            tmg.clone(),
            risk_manager.clone(),
            clock.clone(),
            config.trading.clone(),
            config.exchange.leverage,
            exchange_configured,
            metrics.clone(),
        ));

        let reconciler = Arc::new(Reconciler::new(
            repo.clone(),
            exchange.clone(),
            executor.clone(),
            risk_manager.clone(),
            clock.clone(),
            config.trading.clone(),
            metrics.clone(),
        ));

        let scheduler = Arc::new(TokioScheduler::new());

        Ok(Self { repo, tmg, risk_manager, executor, reconciler, scheduler, metrics, pool: db.pool, config })
    }

    /// Registers every job body and starts the scheduler's periodic work
    /// (reconciler sweep, housekeeping) plus the watchdog. `initial_submit`
    /// is registered but only ever fired by the analyzer calling
    /// `schedule_once` -- this crate never creates signals itself.
    pub async fn start(&self) -> Result<()> {
        let executor = self.executor.clone();
        self.scheduler
            .register_once(INITIAL_SUBMIT_JOB, move |signal_id| {
                let executor = executor.clone();
                async move {
                    let outcome = executor.attempt(signal_id, false).await;
                    info!(signal_id = %signal_id, ?outcome, "initial_submit: attempt finished");
                }
            })
            .await;

        let reconciler = self.reconciler.clone();
        self.scheduler
            .register_periodic(RECONCILER_JOB, move || {
                let reconciler = reconciler.clone();
                async move {
                    reconciler.run_sweep().await;
                }
            })
            .await;

        let housekeeper = Arc::new(Housekeeper::new(
            self.pool.clone(),
            self.config.archive_retention_days,
            self.config.audit_log_retention_days,
        ));
        self.scheduler
            .register_periodic(HOUSEKEEPING_JOB, move || {
                let housekeeper = housekeeper.clone();
                async move {
                    housekeeper.run().await;
                }
            })
            .await;

        self.scheduler.spawn_watchdog();
        self.scheduler
            .schedule_periodic(RECONCILER_JOB, Duration::from_secs(self.config.reconciler_interval_secs))
            .await;
        self.scheduler
            .schedule_periodic(HOUSEKEEPING_JOB, Duration::from_secs(self.config.housekeeping_interval_secs))
            .await;

        info!("application started: reconciler and housekeeping scheduled");
        Ok(())
    }

    /// Spawns the push-based metrics reporter if observability is enabled.
    pub fn spawn_metrics_reporter(&self) {
        let Some(metrics) = &self.metrics else { return };
        let reporter = MetricsReporter::new(
            self.repo.clone(),
            (**metrics).clone(),
            self.config.observability.report_interval_secs,
        );
        tokio::spawn(reporter.run());
    }
}
