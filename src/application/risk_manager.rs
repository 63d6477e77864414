use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::risk_env_config::RiskEnvConfig;
use crate::domain::errors::LedgerError;
use crate::domain::ports::{Clock, TradingModeGate};
use crate::domain::repositories::SignalRepository;

const SINGLETON_ROW_ID: &str = "risk_manager";

/// Result of `RiskManager::enforce`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enforcement {
    Stopped,
    NotStopped,
}

/// Per-reference-day trip bookkeeping, persisted so a restart doesn't
/// forget that today's limit has already fired once.
struct RiskState {
    tripped_this_period: bool,
    reference_date: NaiveDate,
}

/// Computes daily realized P&L and consecutive-loss streak from the
/// signal ledger and flips the Trading-Mode Gate off on breach (§4.3).
///
/// Operator-override semantics: the first breach in a reference day trips
/// the gate; subsequent breaches that same day, while the gate reads
/// enabled again, are read as a deliberate operator re-enable and are not
/// re-tripped. The flag clears when the reference day rolls over.
pub struct RiskManager {
    repo: Arc<dyn SignalRepository>,
    tmg: Arc<dyn TradingModeGate>,
    clock: Arc<dyn Clock>,
    config: RiskEnvConfig,
    pool: SqlitePool,
    state: Mutex<RiskState>,
}

impl RiskManager {
    pub async fn new(
        repo: Arc<dyn SignalRepository>,
        tmg: Arc<dyn TradingModeGate>,
        clock: Arc<dyn Clock>,
        config: RiskEnvConfig,
        pool: SqlitePool,
    ) -> Self {
        let today = clock.now().date_naive();
        let loaded: Option<(bool, NaiveDate)> = sqlx::query_as(
            "SELECT tripped_this_period, reference_date FROM risk_state WHERE id = ?1",
        )
        .bind(SINGLETON_ROW_ID)
        .fetch_optional(&pool)
        .await
        .unwrap_or(None);

        let state = match loaded {
            Some((tripped, reference_date)) if reference_date == today => RiskState {
                tripped_this_period: tripped,
                reference_date,
            },
            _ => RiskState {
                tripped_this_period: false,
                reference_date: today,
            },
        };

        Self {
            repo,
            tmg,
            clock,
            config,
            pool,
            state: Mutex::new(state),
        }
    }

    async fn persist_state(&self, state: &RiskState) {
        let result = sqlx::query(
            "INSERT INTO risk_state (id, tripped_this_period, reference_date, updated_at) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(id) DO UPDATE SET tripped_this_period = ?2, reference_date = ?3, updated_at = ?4",
        )
        .bind(SINGLETON_ROW_ID)
        .bind(state.tripped_this_period)
        .bind(state.reference_date)
        .bind(Utc::now())
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            warn!(error = %e, "failed to persist risk manager state");
        }
    }

    fn reference_day_start(now: DateTime<Utc>) -> DateTime<Utc> {
        now.date_naive()
            .and_hms_opt(0, 0, 0)
            .expect("midnight is always valid")
            .and_utc()
    }

    /// Net realized P&L percent for signals closed since the start of the
    /// current reference day, after subtracting the configured round-trip
    /// commission.
    pub async fn daily_pnl_pct(&self) -> Result<Decimal, LedgerError> {
        let now = self.clock.now();
        let since = Self::reference_day_start(now);
        let closed = self.repo.recent_closed(since).await?;

        let mut total_pct = Decimal::ZERO;
        for signal in &closed {
            let (Some(entry), Some(exit)) = (signal.entry_price, signal.exit_price) else {
                continue;
            };
            if entry.is_zero() {
                continue;
            }
            let raw_pct = match signal.side {
                crate::domain::types::Side::Long => (exit - entry) / entry * Decimal::from(100),
                crate::domain::types::Side::Short => (entry - exit) / entry * Decimal::from(100),
            };
            total_pct += raw_pct - self.config.round_trip_commission_pct * Decimal::from(2);
        }
        Ok(total_pct)
    }

    /// Length of the current losing streak, most-recent-first, stopping at
    /// the first winning or breakeven close.
    pub async fn consecutive_losses(&self) -> Result<usize, LedgerError> {
        let closed = self.repo.last_closed(50).await?;
        let mut streak = 0usize;
        for signal in &closed {
            let (Some(entry), Some(exit)) = (signal.entry_price, signal.exit_price) else {
                break;
            };
            if entry.is_zero() {
                break;
            }
            let raw_pct = match signal.side {
                crate::domain::types::Side::Long => (exit - entry) / entry * Decimal::from(100),
                crate::domain::types::Side::Short => (entry - exit) / entry * Decimal::from(100),
            };
            let net_pct = raw_pct - self.config.round_trip_commission_pct * Decimal::from(2);
            if net_pct < Decimal::ZERO {
                streak += 1;
            } else {
                break;
            }
        }
        Ok(streak)
    }

    /// Checks the two configured limits and flips the gate off on the
    /// first breach of the day. Returns `NotStopped` when no limit is
    /// breached, or when a limit is breached but the gate has already
    /// tripped once today (operator-override reading, §9).
    pub async fn enforce(&self) -> Result<Enforcement, LedgerError> {
        let pnl_pct = self.daily_pnl_pct().await?;
        let losses = self.consecutive_losses().await?;

        let breached = pnl_pct <= self.config.daily_loss_limit_pct
            || losses >= self.config.max_consecutive_losses;

        if !breached {
            return Ok(Enforcement::NotStopped);
        }

        let today = self.clock.now().date_naive();
        let mut state = self.state.lock().await;
        if state.reference_date != today {
            state.reference_date = today;
            state.tripped_this_period = false;
        }

        if state.tripped_this_period {
            warn!(
                daily_pnl_pct = %pnl_pct,
                consecutive_losses = losses,
                "risk limit still breached but already tripped today; treating as operator override"
            );
            return Ok(Enforcement::NotStopped);
        }

        if self.tmg.is_live_enabled().await {
            self.tmg.set_live_enabled(false).await;
            info!(
                daily_pnl_pct = %pnl_pct,
                consecutive_losses = losses,
                "risk limit breached, live trading disabled"
            );
        }
        state.tripped_this_period = true;
        self.persist_state(&state).await;

        Ok(Enforcement::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::trading_mode_gate::InMemoryTradingModeGate;
    use crate::domain::ports::SystemClock;
    use crate::infrastructure::persistence::{Database, SqliteSignalRepository};

    async fn setup() -> (RiskManager, Arc<dyn TradingModeGate>) {
        let db = Database::new("sqlite::memory:").await.expect("db init");
        let repo: Arc<dyn SignalRepository> =
            Arc::new(SqliteSignalRepository::new(db.pool.clone()));
        let tmg: Arc<dyn TradingModeGate> = Arc::new(InMemoryTradingModeGate::new(true));
        let config = RiskEnvConfig {
            daily_loss_limit_pct: Decimal::from(-5),
            max_consecutive_losses: 5,
            round_trip_commission_pct: Decimal::ZERO,
        };
        let rm = RiskManager::new(
            repo,
            tmg.clone(),
            Arc::new(SystemClock),
            config,
            db.pool,
        )
        .await;
        (rm, tmg)
    }

    #[tokio::test]
    async fn enforce_passes_when_ledger_empty() {
        let (rm, _tmg) = setup().await;
        assert_eq!(rm.enforce().await.unwrap(), Enforcement::NotStopped);
    }
}
