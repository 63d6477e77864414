//! Exchange Adapter configuration parsing from environment variables.

use anyhow::{Context, Result};
use std::env;

/// Venue credentials and dialect settings (§6 config table: `symbol_suffix`,
/// `leverage`, `position_idx`, `time_in_force`).
#[derive(Debug, Clone)]
pub struct ExchangeEnvConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub recv_window_ms: u64,
    pub symbol_suffix: String,
    pub leverage: u32,
    pub position_idx: u8,
    pub time_in_force: String,
    pub demo_trading: bool,
}

impl ExchangeEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            base_url: env::var("EXCHANGE_BASE_URL")
                .unwrap_or_else(|_| "https://api-demo.bybit.com".to_string()),
            api_key: env::var("EXCHANGE_API_KEY").unwrap_or_default(),
            api_secret: env::var("EXCHANGE_API_SECRET").unwrap_or_default(),
            recv_window_ms: Self::parse_u64("EXCHANGE_RECV_WINDOW_MS", 5000)?,
            symbol_suffix: env::var("SYMBOL_SUFFIX").unwrap_or_default(),
            leverage: Self::parse_u32("LEVERAGE", 5)?,
            position_idx: env::var("POSITION_IDX")
                .unwrap_or_else(|_| "0".to_string())
                .parse::<u8>()
                .context("Failed to parse POSITION_IDX")?,
            time_in_force: env::var("TIME_IN_FORCE").unwrap_or_else(|_| "GTC".to_string()),
            demo_trading: Self::parse_bool("EXCHANGE_DEMO_TRADING", true),
        })
    }

    fn parse_u64(key: &str, default: u64) -> Result<u64> {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<u64>()
            .context(format!("Failed to parse {key}"))
    }

    fn parse_u32(key: &str, default: u32) -> Result<u32> {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<u32>()
            .context(format!("Failed to parse {key}"))
    }

    fn parse_bool(key: &str, default: bool) -> bool {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<bool>()
            .unwrap_or(default)
    }
}
