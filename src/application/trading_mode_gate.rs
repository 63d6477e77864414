use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::{error, warn};

use crate::domain::ports::TradingModeGate;

const SINGLETON_ROW_ID: &str = "trading_mode";

/// Process-wide, persistently cached "live trading enabled" flag (§4.3).
///
/// Reads hit the in-memory cell; writes update both the cell and the
/// backing row. If the backing store is unreachable the cell still holds
/// the last known value, so the gate never silently reads as enabled.
pub struct SqliteTradingModeGate {
    pool: SqlitePool,
    cached: AtomicBool,
}

impl SqliteTradingModeGate {
    /// Loads the persisted value (defaulting to disabled if no row exists
    /// yet — a fresh deployment starts conservative).
    pub async fn load(pool: SqlitePool) -> Self {
        let row: Option<(bool,)> =
            sqlx::query_as("SELECT live_enabled FROM trading_mode WHERE id = ?1")
                .bind(SINGLETON_ROW_ID)
                .fetch_optional(&pool)
                .await
                .unwrap_or_else(|e| {
                    error!(error = %e, "failed to load trading mode row, defaulting to disabled");
                    None
                });

        let enabled = row.map(|(v,)| v).unwrap_or(false);
        Self {
            pool,
            cached: AtomicBool::new(enabled),
        }
    }
}

#[async_trait]
impl TradingModeGate for SqliteTradingModeGate {
    async fn is_live_enabled(&self) -> bool {
        self.cached.load(Ordering::SeqCst)
    }

    async fn set_live_enabled(&self, enabled: bool) {
        self.cached.store(enabled, Ordering::SeqCst);

        let result = sqlx::query(
            "INSERT INTO trading_mode (id, live_enabled, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(id) DO UPDATE SET live_enabled = ?2, updated_at = ?3",
        )
        .bind(SINGLETON_ROW_ID)
        .bind(enabled)
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            warn!(error = %e, "failed to persist trading mode change, cache still updated");
        }
    }
}

/// In-memory-only gate, defaulting to disabled, used by tests and by any
/// deployment that opts out of persistence.
pub struct InMemoryTradingModeGate {
    enabled: AtomicBool,
}

impl InMemoryTradingModeGate {
    pub fn new(initial: bool) -> Self {
        Self {
            enabled: AtomicBool::new(initial),
        }
    }
}

impl Default for InMemoryTradingModeGate {
    fn default() -> Self {
        Self::new(false)
    }
}

#[async_trait]
impl TradingModeGate for InMemoryTradingModeGate {
    async fn is_live_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn set_live_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_gate_defaults_disabled() {
        let gate = InMemoryTradingModeGate::default();
        assert!(!gate.is_live_enabled().await);
        gate.set_live_enabled(true).await;
        assert!(gate.is_live_enabled().await);
    }
}
