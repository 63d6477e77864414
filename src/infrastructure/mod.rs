// Shared low-level building blocks (circuit breaker, HTTP client factory).
pub mod core;

// Exchange Adapter implementations (§4.2, §10.4): a Bybit-v5-style venue
// client and a deterministic mock used by the test suite (§10.5).
pub mod exchange;

// Push-based metrics surface (§10.6).
pub mod observability;

// Signal Ledger persistence (§4.1, §10.3): SQLite behind the repository trait.
pub mod persistence;

// Scheduler Interface reference implementation (§6 SI, §10): an in-process
// tokio job runner with per-signal exclusion and a heartbeat watchdog.
pub mod scheduler;
