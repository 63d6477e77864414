//! Signal Executor / Reconciler trading parameters (§6 config table).

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::env;

#[derive(Debug, Clone)]
pub struct TradingEnvConfig {
    pub order_size_usdt: Decimal,
    pub quantity_precision: u32,
    pub take_profit_percent: Decimal,
    pub stop_loss_percent: Decimal,
    pub market_entry_threshold_pct: Decimal,
    pub order_cancel_deviation_pct: Decimal,
    pub auto_trading_enabled: bool,
    pub breakeven_enabled: bool,
}

impl TradingEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            order_size_usdt: Self::parse_decimal("ORDER_SIZE_USDT", "50")?,
            quantity_precision: Self::parse_u32("QUANTITY_PRECISION", 3)?,
            take_profit_percent: Self::parse_decimal("TAKE_PROFIT_PERCENT", "1.5")?,
            stop_loss_percent: Self::parse_decimal("STOP_LOSS_PERCENT", "0.5")?,
            market_entry_threshold_pct: Self::parse_decimal("MARKET_ENTRY_THRESHOLD_PCT", "0")?,
            order_cancel_deviation_pct: Self::parse_decimal("ORDER_CANCEL_DEVIATION_PCT", "1.5")?,
            auto_trading_enabled: Self::parse_bool("AUTO_TRADING_ENABLED", true),
            breakeven_enabled: Self::parse_bool("BREAKEVEN_ENABLED", false),
        })
    }

    fn parse_decimal(key: &str, default: &str) -> Result<Decimal> {
        let raw = env::var(key).unwrap_or_else(|_| default.to_string());
        raw.parse::<f64>()
            .ok()
            .and_then(Decimal::from_f64)
            .context(format!("Failed to parse {key} as decimal"))
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
