//! Risk Manager configuration parsing from environment variables.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::env;

#[derive(Debug, Clone)]
pub struct RiskEnvConfig {
    pub daily_loss_limit_pct: Decimal,
    pub max_consecutive_losses: usize,
    /// Fixed round-trip commission subtracted when computing realized PnL,
    /// default 0.035% applied on both legs (0.07% total).
    pub round_trip_commission_pct: Decimal,
}

impl RiskEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            daily_loss_limit_pct: Self::parse_decimal("DAILY_LOSS_LIMIT_PCT", "-5.0")?,
            max_consecutive_losses: Self::parse_usize("MAX_CONSECUTIVE_LOSSES", 5)?,
            round_trip_commission_pct: Self::parse_decimal("ROUND_TRIP_COMMISSION_PCT", "0.035")?,
        })
    }

    fn parse_decimal(key: &str, default: &str) -> Result<Decimal> {
        let raw = env::var(key).unwrap_or_else(|_| default.to_string());
        raw.parse::<f64>()
            .ok()
            .and_then(Decimal::from_f64)
            .context(format!("Failed to parse {key} as decimal"))
    }

    fn parse_usize(key: &str, default: usize) -> Result<usize> {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<usize>()
            .context(format!("Failed to parse {key}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_config_defaults() {
        let config = RiskEnvConfig::from_env().expect("should parse with defaults");
        assert_eq!(config.max_consecutive_losses, 5);
    }
}
