//! Push-based metrics reporter (§10.6).
//!
//! Periodically renders a JSON snapshot to stdout on a configurable
//! interval. No inbound HTTP server, no Pushgateway: this process only
//! emits, it never accepts connections.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::domain::repositories::SignalRepository;
use crate::domain::types::TradeStatus;
use crate::infrastructure::observability::metrics::Metrics;

#[derive(Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub signals: SignalsSnapshot,
}

#[derive(Serialize)]
pub struct SignalsSnapshot {
    pub open_positions: usize,
    pub waiting_for_price: usize,
    pub open_entry_orders: usize,
}

pub struct MetricsReporter {
    repository: Arc<dyn SignalRepository>,
    metrics: Metrics,
    start_time: Instant,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(repository: Arc<dyn SignalRepository>, metrics: Metrics, interval_seconds: u64) -> Self {
        Self {
            repository,
            metrics,
            start_time: Instant::now(),
            interval: Duration::from_secs(interval_seconds),
        }
    }

    pub async fn run(self) {
        info!(interval = ?self.interval, "MetricsReporter: starting push-based metrics");

        loop {
            tokio::time::sleep(self.interval).await;

            match self.collect_snapshot().await {
                Ok(snapshot) => match serde_json::to_string(&snapshot) {
                    Ok(json) => {
                        println!("SIGNAL_METRICS_JSON:{json}");
                        info!(
                            open_positions = snapshot.signals.open_positions,
                            waiting_for_price = snapshot.signals.waiting_for_price,
                            uptime_seconds = snapshot.uptime_seconds,
                            "metrics snapshot"
                        );
                    }
                    Err(e) => warn!(error = %e, "failed to serialize metrics snapshot"),
                },
                Err(e) => warn!(error = %e, "failed to collect metrics snapshot"),
            }
        }
    }

    async fn collect_snapshot(&self) -> Result<MetricsSnapshot, crate::domain::errors::LedgerError> {
        let open = self.repository.list_filled_open().await?;
        let waiting = self.repository.list_waiting().await?;
        let entry_orders = self.repository.list_active_with_open_order().await?;
        let open_entry_orders = entry_orders
            .iter()
            .filter(|s| s.trade_status.is_some_and(TradeStatus::is_open_entry_order))
            .count();

        let uptime = self.start_time.elapsed().as_secs();

        self.metrics.open_positions_count.set(open.len() as f64);
        self.metrics.waiting_signals_count.set(waiting.len() as f64);
        self.metrics.uptime_seconds.set(uptime as f64);

        Ok(MetricsSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_seconds: uptime,
            version: env!("CARGO_PKG_VERSION").to_string(),
            signals: SignalsSnapshot {
                open_positions: open.len(),
                waiting_for_price: waiting.len(),
                open_entry_orders,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::database::Database;
    use crate::infrastructure::persistence::signal_repository::SqliteSignalRepository;

    async fn setup_repository() -> Arc<dyn SignalRepository> {
        let db = Database::new("sqlite::memory:").await.expect("db init");
        Arc::new(SqliteSignalRepository::new(db.pool))
    }

    #[tokio::test]
    async fn collect_snapshot_on_empty_ledger() {
        let repository = setup_repository().await;
        let metrics = Metrics::new().expect("failed to create metrics");
        let reporter = MetricsReporter::new(repository, metrics, 60);

        let snapshot = reporter.collect_snapshot().await.expect("snapshot collection failed");
        assert_eq!(snapshot.signals.open_positions, 0);
        assert_eq!(snapshot.signals.waiting_for_price, 0);
        assert!(!snapshot.timestamp.is_empty());
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let snapshot = MetricsSnapshot {
            timestamp: "2026-01-10T10:00:00Z".to_string(),
            uptime_seconds: 3600,
            version: "0.1.0".to_string(),
            signals: SignalsSnapshot { open_positions: 2, waiting_for_price: 1, open_entry_orders: 0 },
        };
        let json = serde_json::to_string(&snapshot).expect("failed to serialize");
        assert!(json.contains("open_positions"));
    }
}
