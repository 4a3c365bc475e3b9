//! Market data types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One OHLCV bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bar open time
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Market data fetch errors
#[derive(Debug, Clone, Error)]
pub enum FeedError {
    /// Network failure or retryable exchange status
    #[error("Transient fetch error: {0}")]
    Transient(String),
    /// Request did not complete in time
    #[error("Fetch timed out")]
    Timeout,
    /// Empty or malformed candle set
    #[error("Data quality: {0}")]
    DataQuality(String),
    /// Non-retryable exchange response
    #[error("Request rejected: {0}")]
    Rejected(String),
}

impl FeedError {
    /// Whether a retry may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, FeedError::Transient(_) | FeedError::Timeout)
    }
}
