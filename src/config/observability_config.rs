//! Observability configuration parsing from environment variables.
//!
//! Push-based metrics only (§10.6): there is no bind address to configure
//! because nothing here accepts inbound connections.

use std::env;

#[derive(Debug, Clone)]
pub struct ObservabilityEnvConfig {
    pub enabled: bool,
    pub report_interval_secs: u64,
}

impl Default for ObservabilityEnvConfig {
    fn default() -> Self {
        Self { enabled: true, report_interval_secs: 60 }
    }
}

impl ObservabilityEnvConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: env::var("OBSERVABILITY_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .parse::<bool>()
                .unwrap_or(true),
            report_interval_secs: env::var("METRICS_REPORT_INTERVAL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse::<u64>()
                .unwrap_or(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observability_config_defaults() {
        let config = ObservabilityEnvConfig::from_env();
        assert!(config.enabled);
        assert_eq!(config.report_interval_secs, 60);
    }
}
