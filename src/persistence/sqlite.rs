//! SQLite store
//!
//! Numbers are bound as `f64` and timestamps as RFC 3339 text.

use super::types::{parse_timestamp, timestamp_string};
use super::{BalanceSnapshot, BotStatus, PersistenceClient, PersistenceError, TradeRecord, TradeStatus};
use crate::risk::{Balance, CloseReason};
use crate::signal::Side;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

/// Database-backed store
pub struct SqliteStore {
    pool: SqlitePool,
}

#[derive(Debug, sqlx::FromRow)]
struct TradeRow {
    id: String,
    symbol: String,
    side: String,
    status: String,
    entry_price: f64,
    exit_price: Option<f64>,
    amount: f64,
    entry_time: String,
    exit_time: Option<String>,
    stop_loss: f64,
    take_profit: f64,
    entry_fee: f64,
    exit_fee: f64,
    holding_fee: f64,
    total_fees: f64,
    gross_pnl: f64,
    net_pnl: f64,
    close_reason: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct BalanceRow {
    timestamp: String,
    total: f64,
    free: f64,
    used: f64,
}

#[derive(Debug, sqlx::FromRow)]
struct BotStatusRow {
    status: String,
    last_heartbeat: String,
    open_positions: i64,
    mode: String,
}

fn scalar(value: Decimal) -> f64 {
    value.to_f64().unwrap_or_default()
}

fn decimal(value: f64) -> Result<Decimal, PersistenceError> {
    Decimal::from_f64(value)
        .map(|d| d.normalize())
        .ok_or_else(|| PersistenceError::Corrupt(format!("number {value}")))
}

fn parse_side(s: &str) -> Result<Side, PersistenceError> {
    match s {
        "long" => Ok(Side::Long),
        "short" => Ok(Side::Short),
        other => Err(PersistenceError::Corrupt(format!("side {other}"))),
    }
}

fn parse_reason(s: &str) -> Result<CloseReason, PersistenceError> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|_| PersistenceError::Corrupt(format!("close reason {s}")))
}

impl TryFrom<TradeRow> for TradeRecord {
    type Error = PersistenceError;

    fn try_from(row: TradeRow) -> Result<Self, Self::Error> {
        Ok(TradeRecord {
            id: Uuid::parse_str(&row.id).map_err(|e| PersistenceError::Corrupt(format!("trade id: {e}")))?,
            symbol: row.symbol,
            side: parse_side(&row.side)?,
            status: TradeStatus::parse(&row.status)?,
            entry_price: decimal(row.entry_price)?,
            exit_price: row.exit_price.map(decimal).transpose()?,
            amount: decimal(row.amount)?,
            entry_time: parse_timestamp(&row.entry_time)?,
            exit_time: row.exit_time.as_deref().map(parse_timestamp).transpose()?,
            stop_loss: decimal(row.stop_loss)?,
            take_profit: decimal(row.take_profit)?,
            entry_fee: decimal(row.entry_fee)?,
            exit_fee: decimal(row.exit_fee)?,
            holding_fee: decimal(row.holding_fee)?,
            total_fees: decimal(row.total_fees)?,
            gross_pnl: decimal(row.gross_pnl)?,
            net_pnl: decimal(row.net_pnl)?,
            close_reason: row.close_reason.as_deref().map(parse_reason).transpose()?,
        })
    }
}

impl SqliteStore {
    /// Connect and create the schema
    pub async fn connect(database_url: &str) -> Result<Self, PersistenceError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| PersistenceError::Unavailable(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;
        tracing::info!(url = database_url, "Connected to SQLite store");
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                status TEXT NOT NULL,
                entry_price REAL NOT NULL,
                exit_price REAL,
                amount REAL NOT NULL,
                entry_time TEXT NOT NULL,
                exit_time TEXT,
                stop_loss REAL NOT NULL,
                take_profit REAL NOT NULL,
                entry_fee REAL NOT NULL DEFAULT 0,
                exit_fee REAL NOT NULL DEFAULT 0,
                holding_fee REAL NOT NULL DEFAULT 0,
                total_fees REAL NOT NULL DEFAULT 0,
                gross_pnl REAL NOT NULL DEFAULT 0,
                net_pnl REAL NOT NULL DEFAULT 0,
                close_reason TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS balance (
                timestamp TEXT PRIMARY KEY,
                total REAL NOT NULL,
                free REAL NOT NULL,
                used REAL NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cooldowns (
                symbol TEXT PRIMARY KEY,
                last_trade_time TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bot_status (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                status TEXT NOT NULL,
                last_heartbeat TEXT NOT NULL,
                open_positions INTEGER NOT NULL DEFAULT 0,
                mode TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_status ON trades(status)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl PersistenceClient for SqliteStore {
    async fn save_trade(&self, record: &TradeRecord) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO trades (
                id, symbol, side, status, entry_price, exit_price, amount, entry_time, exit_time,
                stop_loss, take_profit, entry_fee, exit_fee, holding_fee, total_fees, gross_pnl, net_pnl,
                close_reason
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.symbol)
        .bind(record.side.as_str())
        .bind(record.status.as_str())
        .bind(scalar(record.entry_price))
        .bind(record.exit_price.map(scalar))
        .bind(scalar(record.amount))
        .bind(timestamp_string(record.entry_time))
        .bind(record.exit_time.map(timestamp_string))
        .bind(scalar(record.stop_loss))
        .bind(scalar(record.take_profit))
        .bind(scalar(record.entry_fee))
        .bind(scalar(record.exit_fee))
        .bind(scalar(record.holding_fee))
        .bind(scalar(record.total_fees))
        .bind(scalar(record.gross_pnl))
        .bind(scalar(record.net_pnl))
        .bind(record.close_reason.map(|r| r.as_str()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_trades(&self, status: Option<TradeStatus>) -> Result<Vec<TradeRecord>, PersistenceError> {
        let rows: Vec<TradeRow> = match status {
            Some(status) => {
                sqlx::query_as("SELECT * FROM trades WHERE status = ? ORDER BY entry_time")
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as("SELECT * FROM trades ORDER BY entry_time")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.into_iter().map(TradeRecord::try_from).collect()
    }

    async fn update_balance(&self, balance: &Balance, at: DateTime<Utc>) -> Result<(), PersistenceError> {
        sqlx::query("INSERT OR REPLACE INTO balance (timestamp, total, free, used) VALUES (?, ?, ?, ?)")
            .bind(timestamp_string(at))
            .bind(scalar(balance.total))
            .bind(scalar(balance.free))
            .bind(scalar(balance.used))
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn get_latest_balance(&self) -> Result<Option<BalanceSnapshot>, PersistenceError> {
        let row: Option<BalanceRow> =
            sqlx::query_as("SELECT timestamp, total, free, used FROM balance ORDER BY timestamp DESC LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;

        row.map(|r| {
            Ok(BalanceSnapshot {
                timestamp: parse_timestamp(&r.timestamp)?,
                total: decimal(r.total)?,
                free: decimal(r.free)?,
                used: decimal(r.used)?,
            })
        })
        .transpose()
    }

    async fn update_heartbeat(
        &self,
        status: &str,
        open_positions: usize,
        mode: &str,
        at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            INSERT INTO bot_status (id, status, last_heartbeat, open_positions, mode)
            VALUES (1, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                last_heartbeat = excluded.last_heartbeat,
                open_positions = excluded.open_positions,
                mode = excluded.mode
            "#,
        )
        .bind(status)
        .bind(timestamp_string(at))
        .bind(open_positions as i64)
        .bind(mode)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_bot_status(&self) -> Result<Option<BotStatus>, PersistenceError> {
        let row: Option<BotStatusRow> =
            sqlx::query_as("SELECT status, last_heartbeat, open_positions, mode FROM bot_status WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;

        row.map(|r| {
            Ok(BotStatus {
                status: r.status,
                last_heartbeat: parse_timestamp(&r.last_heartbeat)?,
                open_positions: usize::try_from(r.open_positions).unwrap_or_default(),
                mode: r.mode,
            })
        })
        .transpose()
    }

    async fn save_cooldown(&self, symbol: &str, last_trade: DateTime<Utc>) -> Result<(), PersistenceError> {
        sqlx::query("INSERT OR REPLACE INTO cooldowns (symbol, last_trade_time) VALUES (?, ?)")
            .bind(symbol)
            .bind(timestamp_string(last_trade))
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn get_cooldowns(&self) -> Result<HashMap<String, DateTime<Utc>>, PersistenceError> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT symbol, last_trade_time FROM cooldowns")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|(symbol, at)| Ok((symbol, parse_timestamp(&at)?)))
            .collect()
    }

    async fn clear_expired_cooldowns(&self, minutes: u32, now: DateTime<Utc>) -> Result<usize, PersistenceError> {
        let cutoff = now - Duration::minutes(i64::from(minutes));
        let result = sqlx::query("DELETE FROM cooldowns WHERE last_trade_time < ?")
            .bind(timestamp_string(cutoff))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() as usize)
    }
}
