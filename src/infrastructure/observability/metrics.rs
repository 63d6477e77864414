//! Prometheus metric definitions (§10.6). All metrics use the
//! `signal_executor_` prefix and are read-only outside this module.

use prometheus::{
    CounterVec, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
    core::{AtomicF64, GenericGauge},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Signals carried through `attempt` to a successful submission.
    pub signals_submitted_total: CounterVec,
    /// Signals invalidated by a preflight guard, labeled by the resulting `TradeStatus`.
    pub signals_invalidated_total: CounterVec,
    /// `attempt` calls that ended in `Outcome::Failed`.
    pub signals_failed_total: CounterVec,
    /// Current count of signals in an open-position state.
    pub open_positions_count: GenericGauge<AtomicF64>,
    /// Current count of signals parked in a waiting-family state.
    pub waiting_signals_count: GenericGauge<AtomicF64>,
    /// Risk Manager trips, labeled by cause (`daily_loss` / `consecutive_losses`).
    pub risk_trips_total: CounterVec,
    /// Whether the Trading Mode Gate currently permits live submission.
    pub trading_mode_enabled: GenericGauge<AtomicF64>,
    /// Exchange Adapter call latency, labeled by operation.
    pub exchange_latency_seconds: HistogramVec,
    /// Circuit breaker state (0=closed, 1=open, 0.5=half-open).
    pub circuit_breaker_status: GenericGauge<AtomicF64>,
    /// Reconciler sweep duration.
    pub reconciler_sweep_seconds: HistogramVec,
    /// Protective orders installed by the reconciler, labeled by leg (`take_profit`/`stop_loss`).
    pub protective_orders_installed_total: CounterVec,
    /// Process uptime in seconds.
    pub uptime_seconds: GenericGauge<AtomicF64>,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let signals_submitted_total = CounterVec::new(
            Opts::new("signal_executor_signals_submitted_total", "Signals submitted to the venue"),
            &["symbol", "side"],
        )?;
        registry.register(Box::new(signals_submitted_total.clone()))?;

        let signals_invalidated_total = CounterVec::new(
            Opts::new(
                "signal_executor_signals_invalidated_total",
                "Signals invalidated by a preflight guard",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(signals_invalidated_total.clone()))?;

        let signals_failed_total = CounterVec::new(
            Opts::new("signal_executor_signals_failed_total", "Attempts that ended in failure"),
            &["symbol"],
        )?;
        registry.register(Box::new(signals_failed_total.clone()))?;

        let open_positions_count = Gauge::with_opts(Opts::new(
            "signal_executor_open_positions_count",
            "Signals currently in an open-position state",
        ))?;
        registry.register(Box::new(open_positions_count.clone()))?;

        let waiting_signals_count = Gauge::with_opts(Opts::new(
            "signal_executor_waiting_signals_count",
            "Signals currently parked in a waiting-family state",
        ))?;
        registry.register(Box::new(waiting_signals_count.clone()))?;

        let risk_trips_total = CounterVec::new(
            Opts::new("signal_executor_risk_trips_total", "Risk Manager trips by cause"),
            &["cause"],
        )?;
        registry.register(Box::new(risk_trips_total.clone()))?;

        let trading_mode_enabled = Gauge::with_opts(Opts::new(
            "signal_executor_trading_mode_enabled",
            "Whether live submission is currently permitted (1) or not (0)",
        ))?;
        registry.register(Box::new(trading_mode_enabled.clone()))?;

        let exchange_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "signal_executor_exchange_latency_seconds",
                "Exchange Adapter call latency in seconds",
            )
            .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["operation"],
        )?;
        registry.register(Box::new(exchange_latency_seconds.clone()))?;

        let circuit_breaker_status = Gauge::with_opts(Opts::new(
            "signal_executor_circuit_breaker_status",
            "Exchange Adapter circuit breaker state (0=closed, 1=open, 0.5=half-open)",
        ))?;
        registry.register(Box::new(circuit_breaker_status.clone()))?;

        let reconciler_sweep_seconds = HistogramVec::new(
            HistogramOpts::new(
                "signal_executor_reconciler_sweep_seconds",
                "Reconciler sweep wall-clock duration",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["step"],
        )?;
        registry.register(Box::new(reconciler_sweep_seconds.clone()))?;

        let protective_orders_installed_total = CounterVec::new(
            Opts::new(
                "signal_executor_protective_orders_installed_total",
                "Protective TP/SL legs installed by the reconciler",
            ),
            &["leg"],
        )?;
        registry.register(Box::new(protective_orders_installed_total.clone()))?;

        let uptime_seconds = Gauge::with_opts(Opts::new(
            "signal_executor_uptime_seconds",
            "Process uptime in seconds",
        ))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            signals_submitted_total,
            signals_invalidated_total,
            signals_failed_total,
            open_positions_count,
            waiting_signals_count,
            risk_trips_total,
            trading_mode_enabled,
            exchange_latency_seconds,
            circuit_breaker_status,
            reconciler_sweep_seconds,
            protective_orders_installed_total,
            uptime_seconds,
        })
    }

    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder.encode_to_string(&metric_families).unwrap_or_default()
    }

    pub fn inc_submitted(&self, symbol: &str, side: &str) {
        self.signals_submitted_total.with_label_values(&[symbol, side]).inc();
    }

    pub fn inc_invalidated(&self, reason: &str) {
        self.signals_invalidated_total.with_label_values(&[reason]).inc();
    }

    pub fn inc_failed(&self, symbol: &str) {
        self.signals_failed_total.with_label_values(&[symbol]).inc();
    }

    pub fn inc_risk_trip(&self, cause: &str) {
        self.risk_trips_total.with_label_values(&[cause]).inc();
    }

    pub fn observe_exchange_latency(&self, operation: &str, seconds: f64) {
        self.exchange_latency_seconds.with_label_values(&[operation]).observe(seconds);
    }

    pub fn observe_sweep_step(&self, step: &str, seconds: f64) {
        self.reconciler_sweep_seconds.with_label_values(&[step]).observe(seconds);
    }

    pub fn inc_protective_order(&self, leg: &str) {
        self.protective_orders_installed_total.with_label_values(&[leg]).inc();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("failed to construct default Metrics registry")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_render_contains_prefix() {
        let metrics = Metrics::new().expect("failed to create metrics");
        assert!(metrics.render().contains("signal_executor_"));
    }

    #[test]
    fn open_positions_gauge_reflects_set_value() {
        let metrics = Metrics::new().expect("failed to create metrics");
        metrics.open_positions_count.set(3.0);
        assert!(metrics.render().contains("signal_executor_open_positions_count 3"));
    }

    #[test]
    fn counters_are_labeled() {
        let metrics = Metrics::new().expect("failed to create metrics");
        metrics.inc_submitted("BTC/USDT", "LONG");
        metrics.inc_invalidated("PRICE_DEVIATION_TOO_LARGE");
        let output = metrics.render();
        assert!(output.contains("signal_executor_signals_submitted_total"));
        assert!(output.contains("signal_executor_signals_invalidated_total"));
    }
}
