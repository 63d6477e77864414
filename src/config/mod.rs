//! Layered, environment-variable-driven configuration (§10.2).
//!
//! Mirrors the teacher's split of a config aggregate into per-concern
//! sub-structs, each with its own `from_env()`.

pub mod exchange_config;
pub mod observability_config;
pub mod risk_env_config;
pub mod trading_config;

use anyhow::Result;
use exchange_config::ExchangeEnvConfig;
use observability_config::ObservabilityEnvConfig;
use risk_env_config::RiskEnvConfig;
use std::env;
use trading_config::TradingEnvConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub reconciler_interval_secs: u64,
    /// §10.7 housekeeping: archive `CLOSED`/terminal signals past this many days.
    pub archive_retention_days: i64,
    /// §10.7 housekeeping: prune `signal_log` rows past this many days.
    pub audit_log_retention_days: i64,
    pub housekeeping_interval_secs: u64,
    pub exchange: ExchangeEnvConfig,
    pub trading: TradingEnvConfig,
    pub risk: RiskEnvConfig,
    pub observability: ObservabilityEnvConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://signals.db".to_string()),
            reconciler_interval_secs: env::var("RECONCILER_INTERVAL_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse::<u64>()
                .unwrap_or(30),
            archive_retention_days: env::var("ARCHIVE_RETENTION_DAYS")
                .unwrap_or_else(|_| "30".to_string())
                .parse::<i64>()
                .unwrap_or(30),
            audit_log_retention_days: env::var("AUDIT_LOG_RETENTION_DAYS")
                .unwrap_or_else(|_| "90".to_string())
                .parse::<i64>()
                .unwrap_or(90),
            housekeeping_interval_secs: env::var("HOUSEKEEPING_INTERVAL_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse::<u64>()
                .unwrap_or(3600),
            exchange: ExchangeEnvConfig::from_env()?,
            trading: TradingEnvConfig::from_env()?,
            risk: RiskEnvConfig::from_env()?,
            observability: ObservabilityEnvConfig::from_env(),
        })
    }
}
