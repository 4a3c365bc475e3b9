//! Execution types

use crate::signal::Side;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order identifier
pub type OrderId = Uuid;

/// Whether an order opens or closes a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderIntent {
    Open,
    Close,
}

/// An order to be submitted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Trading pair
    pub symbol: String,
    /// Position side the order belongs to
    pub side: Side,
    /// Quoted price
    pub price: Decimal,
    /// Size in base units
    pub amount: Decimal,
    pub intent: OrderIntent,
    /// Quote time
    pub timestamp: DateTime<Utc>,
}

impl Order {
    /// Order opening a position
    pub fn open(symbol: impl Into<String>, side: Side, price: Decimal, amount: Decimal, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            price,
            amount,
            intent: OrderIntent::Open,
            timestamp,
        }
    }

    /// Order closing a position
    pub fn close(symbol: impl Into<String>, side: Side, price: Decimal, amount: Decimal, timestamp: DateTime<Utc>) -> Self {
        Self {
            intent: OrderIntent::Close,
            ..Self::open(symbol, side, price, amount, timestamp)
        }
    }

    /// `price * amount`
    pub fn notional(&self) -> Decimal {
        self.price * self.amount
    }
}

/// A fill (executed trade)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: OrderId,
    pub symbol: String,
    pub side: Side,
    pub intent: OrderIntent,
    /// Fill price
    pub price: Decimal,
    /// Fill size
    pub amount: Decimal,
    /// Fill timestamp
    pub timestamp: DateTime<Utc>,
}
