use anyhow::{Context, Result};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Shared SQLite handle for the Signal Ledger and ambient state tables.
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!("Connected to database: {}", db_url);

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    /// Initialize database schema (§4.1 Signal Ledger, §4.3 Risk Manager state).
    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signals (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                level_price TEXT NOT NULL,
                entry_price TEXT,
                stop_loss_price TEXT,
                take_profit_price TEXT,
                status TEXT NOT NULL,
                trade_status TEXT,
                order_id TEXT,
                quantity TEXT,
                created_at DATETIME NOT NULL,
                filled_at DATETIME,
                exit_price TEXT,
                exit_at DATETIME,
                exit_reason TEXT,
                elder_screen_1_passed BOOLEAN NOT NULL,
                elder_screen_2_passed BOOLEAN NOT NULL,
                meta_json TEXT NOT NULL DEFAULT '{}',
                last_error TEXT,
                updated_at DATETIME NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create signals table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_signals_symbol_side_level \
             ON signals (symbol, side, level_price, status, created_at);",
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create signals duplicate-lookup index")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_signals_trade_status \
             ON signals (trade_status, status);",
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create signals trade_status index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signal_log (
                id TEXT PRIMARY KEY,
                signal_id TEXT NOT NULL REFERENCES signals(id),
                event_type TEXT NOT NULL,
                status TEXT,
                message TEXT NOT NULL,
                details_json TEXT NOT NULL DEFAULT '{}',
                created_at DATETIME NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create signal_log table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_signal_log_signal_id ON signal_log (signal_id);",
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create signal_log index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trading_mode (
                id TEXT PRIMARY KEY,
                live_enabled BOOLEAN NOT NULL,
                updated_at DATETIME NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create trading_mode table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS risk_state (
                id TEXT PRIMARY KEY,
                tripped_this_period BOOLEAN NOT NULL,
                reference_date DATE NOT NULL,
                updated_at DATETIME NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create risk_state table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS archived_signals (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                level_price TEXT NOT NULL,
                entry_price TEXT,
                stop_loss_price TEXT,
                take_profit_price TEXT,
                status TEXT NOT NULL,
                trade_status TEXT,
                order_id TEXT,
                quantity TEXT,
                created_at DATETIME NOT NULL,
                filled_at DATETIME,
                exit_price TEXT,
                exit_at DATETIME,
                exit_reason TEXT,
                elder_screen_1_passed BOOLEAN NOT NULL,
                elder_screen_2_passed BOOLEAN NOT NULL,
                meta_json TEXT NOT NULL DEFAULT '{}',
                last_error TEXT,
                updated_at DATETIME NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create archived_signals table")?;

        info!("Database schema initialized.");
        Ok(())
    }
}
