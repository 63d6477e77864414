// Wires the Signal Ledger, Exchange Adapter, Trading-Mode Gate, Risk
// Manager, Signal Executor, Reconciler, and Scheduler into a running
// process (§10).
pub mod bootstrap;

// Periodic archive/prune jobs (§10.7).
pub mod housekeeping;

// Reconciler: the background sweep that repairs Ledger/venue divergence (§4.5).
pub mod reconciler;

// Risk Manager: daily-loss and consecutive-loss circuit breaker (§4.3).
pub mod risk_manager;

// Signal Executor: the per-signal state machine (§4.4).
pub mod signal_executor;

// Trading-Mode Gate (§4.3).
pub mod trading_mode_gate;
