//! Persistence records and errors

use crate::fees::TradeFees;
use crate::risk::{Balance, CloseReason, ClosedPosition, Position};
use crate::signal::Side;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Storage failures
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Backend unreachable or switched off
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// Stored value could not be decoded
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Lifecycle status of a stored trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Open,
    Closed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Open => "open",
            TradeStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, PersistenceError> {
        match s {
            "open" => Ok(TradeStatus::Open),
            "closed" => Ok(TradeStatus::Closed),
            other => Err(PersistenceError::Corrupt(format!("trade status {other}"))),
        }
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the `trades` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub status: TradeStatus,
    pub entry_price: Decimal,
    pub exit_price: Option<Decimal>,
    pub amount: Decimal,
    pub entry_time: DateTime<Utc>,
    pub exit_time: Option<DateTime<Utc>>,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub entry_fee: Decimal,
    pub exit_fee: Decimal,
    pub holding_fee: Decimal,
    pub total_fees: Decimal,
    pub gross_pnl: Decimal,
    pub net_pnl: Decimal,
    pub close_reason: Option<CloseReason>,
}

impl TradeRecord {
    /// Record for a freshly opened position
    pub fn opened(position: &Position) -> Self {
        Self {
            id: position.id,
            symbol: position.symbol.clone(),
            side: position.side,
            status: TradeStatus::Open,
            entry_price: position.entry_price,
            exit_price: None,
            amount: position.amount,
            entry_time: position.entry_time,
            exit_time: None,
            stop_loss: position.stop_loss,
            take_profit: position.take_profit,
            entry_fee: position.entry_fee,
            exit_fee: Decimal::ZERO,
            holding_fee: Decimal::ZERO,
            total_fees: position.entry_fee,
            gross_pnl: Decimal::ZERO,
            net_pnl: Decimal::ZERO,
            close_reason: None,
        }
    }

    /// Record for a closed position
    pub fn closed(closed: &ClosedPosition) -> Self {
        Self {
            status: TradeStatus::Closed,
            exit_price: Some(closed.exit_price),
            exit_time: Some(closed.exit_time),
            exit_fee: closed.fees.exit_fee,
            holding_fee: closed.fees.holding_fee,
            total_fees: closed.fees.total_fees,
            gross_pnl: closed.gross_pnl,
            net_pnl: closed.net_pnl,
            close_reason: Some(closed.reason),
            ..Self::opened(&closed.position)
        }
    }

    /// Rebuild the open position, peak reset to entry
    pub fn to_position(&self) -> Position {
        Position {
            id: self.id,
            symbol: self.symbol.clone(),
            side: self.side,
            entry_price: self.entry_price,
            amount: self.amount,
            entry_time: self.entry_time,
            stop_loss: self.stop_loss,
            take_profit: self.take_profit,
            peak_price: self.entry_price,
            entry_fee: self.entry_fee,
        }
    }

    /// Rebuild a closed position; `None` for open trades
    pub fn to_closed(&self) -> Option<ClosedPosition> {
        Some(ClosedPosition {
            position: self.to_position(),
            exit_price: self.exit_price?,
            exit_time: self.exit_time?,
            reason: self.close_reason?,
            fees: TradeFees {
                entry_fee: self.entry_fee,
                exit_fee: self.exit_fee,
                holding_fee: self.holding_fee,
                total_fees: self.total_fees,
            },
            gross_pnl: self.gross_pnl,
            net_pnl: self.net_pnl,
        })
    }

    /// Capital committed at entry
    pub fn notional(&self) -> Decimal {
        self.entry_price * self.amount
    }

    /// Amount returned to free balance on top of the notional at close
    pub fn settlement(&self) -> Decimal {
        self.gross_pnl - self.exit_fee - self.holding_fee
    }
}

/// One row of the `balance` table
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub timestamp: DateTime<Utc>,
    pub total: Decimal,
    pub free: Decimal,
    pub used: Decimal,
}

impl BalanceSnapshot {
    pub fn new(balance: &Balance, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            total: balance.total,
            free: balance.free,
            used: balance.used,
        }
    }

    pub fn balance(&self) -> Balance {
        Balance::from_parts(self.free, self.used)
    }
}

/// The singleton `bot_status` row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotStatus {
    pub status: String,
    pub last_heartbeat: DateTime<Utc>,
    pub open_positions: usize,
    pub mode: String,
}

/// Sortable RFC 3339 timestamp used by every store
pub(crate) fn timestamp_string(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, PersistenceError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PersistenceError::Corrupt(format!("timestamp {s}: {e}")))
}
