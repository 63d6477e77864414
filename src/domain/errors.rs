use thiserror::Error;

/// Errors the Exchange Adapter surfaces to callers. The core only ever
/// branches on the Transient/Permanent distinction (§7); it never inspects
/// venue-specific detail beyond the message.
#[derive(Debug, Error, Clone)]
pub enum ExchangeError {
    #[error("transient venue error: {0}")]
    Transient(String),

    #[error("rate limited, retry after {retry_after_secs}s: {message}")]
    RateLimited { retry_after_secs: u64, message: String },

    #[error("permanent venue error: {0}")]
    Permanent(String),
}

impl ExchangeError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExchangeError::Transient(_) | ExchangeError::RateLimited { .. })
    }
}

/// Errors surfaced by the Signal Ledger. `Unavailable` is the one fatal
/// exception class in the whole system (§7): it propagates up and causes
/// the worker to yield so the watchdog may restart it.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("signal not found: {0}")]
    NotFound(String),

    #[error("duplicate signal, existing id: {0}")]
    Duplicate(uuid::Uuid),

    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Errors internal to the Signal Executor's own bookkeeping (not outcomes --
/// see `domain::types::Outcome` for the public result of `attempt`).
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("exchange error: {0}")]
    Exchange(#[from] ExchangeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_error_retryability() {
        assert!(ExchangeError::Transient("timeout".into()).is_retryable());
        assert!(
            ExchangeError::RateLimited { retry_after_secs: 5, message: "too many".into() }
                .is_retryable()
        );
        assert!(!ExchangeError::Permanent("bad request".into()).is_retryable());
    }

    #[test]
    fn test_ledger_error_formatting() {
        let err = LedgerError::NotFound("abc".to_string());
        assert!(err.to_string().contains("abc"));
    }
}
