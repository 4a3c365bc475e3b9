//! Market data module
//!
//! Recent candle fetches from the exchange REST API, with caller-side retry

mod binance;
mod retry;
mod types;

pub use binance::{BinanceClient, BinanceConfig, BINANCE_API_URL};
pub use retry::{fetch_with_retry, RetryPolicy};
pub use types::{Candle, FeedError};

use async_trait::async_trait;

/// Trait for market data sources
#[async_trait]
pub trait MarketDataClient: Send + Sync {
    /// Fetch the most recent `limit` candles, oldest first
    async fn fetch_recent_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, FeedError>;
}
