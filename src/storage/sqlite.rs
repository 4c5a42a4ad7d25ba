//! SQLite implementation of TradeJournal.

use crate::domain::{ExitReason, OrderSide, TradeRecord};
use crate::storage::{StorageError, TradeJournal};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;
use tracing::{debug, info};

/// SqliteStorage implements TradeJournal using SQLite.
pub struct SqliteStorage {
    pool: Pool<Sqlite>,
}

/// SqliteStorageConfig holds SQLite storage configuration.
#[derive(Debug, Clone)]
pub struct SqliteStorageConfig {
    /// Path to the SQLite database file.
    pub path: String,
    /// Maximum number of connections in the pool.
    pub max_connections: u32,
}

impl Default for SqliteStorageConfig {
    fn default() -> Self {
        Self {
            path: "state/trades.db".to_string(),
            max_connections: 5,
        }
    }
}

impl SqliteStorage {
    /// Creates a new SQLite storage instance.
    pub async fn new(config: SqliteStorageConfig) -> Result<Self, StorageError> {
        if let Some(parent) = std::path::Path::new(&config.path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", config.path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        let storage = Self { pool };

        storage.migrate().await?;

        info!(path = %config.path, "SQLite trade journal initialized");
        Ok(storage)
    }

    /// Runs database migrations to create the schema.
    async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                unique_hash TEXT NOT NULL UNIQUE,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                exit_price TEXT NOT NULL,
                realized_pnl TEXT NOT NULL,
                fees TEXT NOT NULL,
                reason TEXT NOT NULL,
                strategy TEXT NOT NULL,
                opened_at TEXT NOT NULL,
                closed_at TEXT NOT NULL,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades(symbol)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_closed_at ON trades(closed_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

/// Fixed-width UTC timestamps so that text order equals time order.
fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Generates the key that makes a second append of the same close a no-op.
///
/// A trade is identified by symbol, open and close time, quantity and exit price.
fn generate_unique_hash(record: &TradeRecord) -> String {
    let data = format!(
        "{}|{}|{}|{}|{}",
        record.symbol,
        format_ts(&record.opened_at),
        format_ts(&record.closed_at),
        record.quantity.normalize(),
        record.exit_price.normalize()
    );

    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    let hash = hasher.finalize();

    // Use first 16 bytes for shorter hash
    hex::encode(&hash[..16])
}

#[async_trait]
impl TradeJournal for SqliteStorage {
    async fn append(&self, record: &TradeRecord) -> Result<bool, StorageError> {
        let unique_hash = generate_unique_hash(record);

        let result = sqlx::query(
            r#"
            INSERT INTO trades (
                unique_hash, symbol, side, quantity, entry_price, exit_price,
                realized_pnl, fees, reason, strategy, opened_at, closed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(unique_hash) DO NOTHING
            "#,
        )
        .bind(&unique_hash)
        .bind(&record.symbol)
        .bind(record.side.to_string())
        .bind(record.quantity.to_string())
        .bind(record.entry_price.to_string())
        .bind(record.exit_price.to_string())
        .bind(record.realized_pnl.to_string())
        .bind(record.fees.to_string())
        .bind(record.reason.to_string())
        .bind(&record.strategy)
        .bind(format_ts(&record.opened_at))
        .bind(format_ts(&record.closed_at))
        .execute(&self.pool)
        .await?;

        let rows_affected = result.rows_affected();

        if rows_affected > 0 {
            debug!(
                symbol = %record.symbol,
                pnl = %record.realized_pnl,
                hash = %unique_hash,
                "Trade recorded"
            );
        }

        Ok(rows_affected > 0)
    }

    async fn closed_since(&self, since: DateTime<Utc>) -> Result<Vec<TradeRecord>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT symbol, side, quantity, entry_price, exit_price, realized_pnl, fees,
                reason, strategy, opened_at, closed_at
            FROM trades WHERE closed_at >= ? ORDER BY closed_at ASC, id ASC
            "#,
        )
        .bind(format_ts(&since))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(parse_trade_row).collect()
    }

    async fn count(&self) -> Result<i64, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM trades")
            .fetch_one(&self.pool)
            .await?;

        let count: i64 = row.try_get("count")?;
        Ok(count)
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.pool.close().await;
        Ok(())
    }
}

fn parse_decimal(row: &sqlx::sqlite::SqliteRow, column: &str) -> Result<Decimal, StorageError> {
    let raw: String = row.try_get(column)?;
    Decimal::from_str(&raw)
        .map_err(|e| StorageError::InvalidData(format!("Invalid {}: {}", column, e)))
}

fn parse_timestamp(
    row: &sqlx::sqlite::SqliteRow,
    column: &str,
) -> Result<DateTime<Utc>, StorageError> {
    let raw: String = row.try_get(column)?;
    Ok(DateTime::parse_from_rfc3339(&raw)
        .map_err(|e| StorageError::InvalidData(format!("Invalid {}: {}", column, e)))?
        .with_timezone(&Utc))
}

/// Parses a trade record from a database row.
fn parse_trade_row(row: &sqlx::sqlite::SqliteRow) -> Result<TradeRecord, StorageError> {
    let side_str: String = row.try_get("side")?;
    let side = OrderSide::from_str(&side_str).map_err(StorageError::InvalidData)?;

    let reason_str: String = row.try_get("reason")?;
    let reason = ExitReason::from_str(&reason_str).map_err(StorageError::InvalidData)?;

    Ok(TradeRecord {
        symbol: row.try_get("symbol")?,
        side,
        quantity: parse_decimal(row, "quantity")?,
        entry_price: parse_decimal(row, "entry_price")?,
        exit_price: parse_decimal(row, "exit_price")?,
        realized_pnl: parse_decimal(row, "realized_pnl")?,
        fees: parse_decimal(row, "fees")?,
        reason,
        strategy: row.try_get("strategy")?,
        opened_at: parse_timestamp(row, "opened_at")?,
        closed_at: parse_timestamp(row, "closed_at")?,
    })
}
