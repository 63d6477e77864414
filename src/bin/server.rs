//! Signal Executor server: headless, no UI, no inbound HTTP.
//!
//! Runs the Signal Executor and Reconciler against a venue and a SQLite
//! Signal Ledger. Metrics are pushed via structured JSON logs to stdout
//! (§10.6) -- nothing here accepts connections.
//!
//! # Environment variables
//! See `config::Config::from_env` for the full list; `DATABASE_URL`,
//! `EXCHANGE_API_KEY`/`EXCHANGE_API_SECRET`, and `RECONCILER_INTERVAL_SECS`
//! are the ones most worth setting explicitly.

use anyhow::Result;
use signal_executor::application::bootstrap::Application;
use signal_executor::config::Config;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false).pretty();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("signal-executor {} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!(database_url = %config.database_url, "configuration loaded");

    let app = Application::build(config).await?;
    app.start().await?;
    app.spawn_metrics_reporter();

    info!("server running, press Ctrl+C to shut down");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, exiting");

    Ok(())
}
