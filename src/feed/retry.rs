//! Caller-side retry with exponential backoff

use super::{Candle, FeedError, MarketDataClient};
use std::time::Duration;
use tokio::time::sleep;

/// Bounded retry policy for transient fetch errors
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound on the delay between retries
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
        }
    }
}

/// Fetch candles, retrying transient errors with doubling delays
///
/// Non-transient errors (rejections, bad data) are returned immediately.
pub async fn fetch_with_retry(
    client: &dyn MarketDataClient,
    symbol: &str,
    timeframe: &str,
    limit: usize,
    policy: &RetryPolicy,
) -> Result<Vec<Candle>, FeedError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut delay = policy.initial_delay;
    let mut attempt = 0;

    loop {
        attempt += 1;
        match client.fetch_recent_candles(symbol, timeframe, limit).await {
            Ok(candles) => return Ok(candles),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                tracing::warn!(
                    symbol,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient fetch error, retrying"
                );
                sleep(delay).await;
                delay = (delay * 2).min(policy.max_delay);
            }
            Err(e) => {
                if e.is_transient() {
                    tracing::error!(symbol, attempts = attempt, error = %e, "Fetch failed after retries");
                }
                return Err(e);
            }
        }
    }
}
