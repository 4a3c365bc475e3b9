//! Binance REST kline client

use super::{Candle, FeedError, MarketDataClient};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;

/// Binance REST base URL
pub const BINANCE_API_URL: &str = "https://api.binance.com";

/// Hard cap on klines per request
const MAX_KLINES: usize = 1000;

/// Pause between pages of a historical download
const PAGE_PAUSE: Duration = Duration::from_millis(250);

/// Configuration for the Binance client
#[derive(Debug, Clone)]
pub struct BinanceConfig {
    /// Base URL for the REST API
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            base_url: BINANCE_API_URL.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Candle source backed by Binance `/api/v3/klines`
pub struct BinanceClient {
    config: BinanceConfig,
    client: Client,
}

impl BinanceClient {
    /// Create a new client with custom configuration
    pub fn with_config(config: BinanceConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    /// Exchange symbol for a slash pair: `BTC/USDT` -> `BTCUSDT`
    fn exchange_symbol(symbol: &str) -> String {
        symbol.replace('/', "").to_uppercase()
    }

    /// Parse a klines response body
    ///
    /// Each row is `[open_time_ms, "open", "high", "low", "close", "volume", ...]`.
    fn parse_klines(body: &str) -> Result<Vec<Candle>, FeedError> {
        let rows: Vec<Vec<Value>> = serde_json::from_str(body)
            .map_err(|e| FeedError::DataQuality(format!("invalid klines payload: {e}")))?;

        rows.iter()
            .map(|row| {
                if row.len() < 6 {
                    return Err(FeedError::DataQuality(format!(
                        "kline row has {} fields",
                        row.len()
                    )));
                }
                let open_ms = row[0]
                    .as_i64()
                    .ok_or_else(|| FeedError::DataQuality("kline open time".into()))?;
                let timestamp = Utc
                    .timestamp_millis_opt(open_ms)
                    .single()
                    .ok_or_else(|| FeedError::DataQuality(format!("bad timestamp {open_ms}")))?;

                Ok(Candle {
                    timestamp,
                    open: Self::parse_field(&row[1])?,
                    high: Self::parse_field(&row[2])?,
                    low: Self::parse_field(&row[3])?,
                    close: Self::parse_field(&row[4])?,
                    volume: Self::parse_field(&row[5])?,
                })
            })
            .collect()
    }

    fn parse_field(value: &Value) -> Result<Decimal, FeedError> {
        value
            .as_str()
            .and_then(|s| Decimal::from_str(s).ok())
            .ok_or_else(|| FeedError::DataQuality(format!("bad kline field {value}")))
    }

    fn classify_status(status: StatusCode, body: &str) -> FeedError {
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            FeedError::Transient(format!("{status}: {body}"))
        } else {
            FeedError::Rejected(format!("{status}: {body}"))
        }
    }

    async fn get_klines(&self, query: &[(&str, String)]) -> Result<Vec<Candle>, FeedError> {
        let url = format!("{}/api/v3/klines", self.config.base_url);

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FeedError::Timeout
                } else {
                    FeedError::Transient(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| FeedError::Transient(e.to_string()))?;

        if !status.is_success() {
            return Err(Self::classify_status(status, &body));
        }

        Self::parse_klines(&body)
    }

    /// Every candle opening in `[start, end]`, oldest first
    ///
    /// Pages through the range `MAX_KLINES` at a time.
    pub async fn fetch_range(
        &self,
        symbol: &str,
        timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, FeedError> {
        let exchange_symbol = Self::exchange_symbol(symbol);
        let end_ms = end.timestamp_millis();
        let mut cursor = start.timestamp_millis();
        let mut candles: Vec<Candle> = vec![];

        while cursor <= end_ms {
            tracing::debug!(symbol, timeframe, cursor, "Fetching kline page");
            let page = self
                .get_klines(&[
                    ("symbol", exchange_symbol.clone()),
                    ("interval", timeframe.to_string()),
                    ("startTime", cursor.to_string()),
                    ("endTime", end_ms.to_string()),
                    ("limit", MAX_KLINES.to_string()),
                ])
                .await?;

            let Some(last) = page.last() else {
                break;
            };
            let next = last.timestamp.timestamp_millis() + 1;
            let full = page.len() >= MAX_KLINES;
            candles.extend(page.into_iter().filter(|c| c.timestamp >= start && c.timestamp <= end));

            if !full || next <= cursor {
                break;
            }
            cursor = next;
            tokio::time::sleep(PAGE_PAUSE).await;
        }

        candles.dedup_by_key(|c| c.timestamp);
        tracing::info!(symbol, timeframe, candles = candles.len(), "Historical klines downloaded");
        Ok(candles)
    }
}

#[async_trait]
impl MarketDataClient for BinanceClient {
    async fn fetch_recent_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, FeedError> {
        tracing::debug!(symbol, timeframe, "Fetching klines");

        self.get_klines(&[
            ("symbol", Self::exchange_symbol(symbol)),
            ("interval", timeframe.to_string()),
            ("limit", limit.min(MAX_KLINES).to_string()),
        ])
        .await
    }
}
