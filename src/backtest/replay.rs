//! Recorded candles served back on a manual clock

use crate::clock::{Clock, ManualClock};
use crate::feed::{Candle, FeedError, MarketDataClient};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

/// Length of one candle for an exchange interval such as `15m`, `1h` or `1d`
pub fn timeframe_duration(timeframe: &str) -> Option<Duration> {
    let split = timeframe.find(|c: char| !c.is_ascii_digit())?;
    let (count, unit) = timeframe.split_at(split);
    let count: i64 = count.parse().ok().filter(|n| *n > 0)?;
    match unit {
        "m" => Some(Duration::minutes(count)),
        "h" => Some(Duration::hours(count)),
        "d" => Some(Duration::days(count)),
        "w" => Some(Duration::weeks(count)),
        _ => None,
    }
}

/// Candle periods in a 365 day year
pub fn periods_per_year(step: Duration) -> f64 {
    let seconds = step.num_seconds().max(1) as f64;
    365.0 * 24.0 * 3600.0 / seconds
}

/// Historical candles per symbol, stored as JSON
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub timeframe: String,
    pub candles: BTreeMap<String, Vec<Candle>>,
}

impl Recording {
    pub fn new(timeframe: impl Into<String>) -> Self {
        Self {
            timeframe: timeframe.into(),
            candles: BTreeMap::new(),
        }
    }

    /// Add a symbol's series, sorted and deduplicated by open time
    pub fn insert(&mut self, symbol: &str, mut candles: Vec<Candle>) {
        candles.sort_by_key(|c| c.timestamp);
        candles.dedup_by_key(|c| c.timestamp);
        self.candles.insert(symbol.to_string(), candles);
    }

    pub fn symbols(&self) -> Vec<String> {
        self.candles.keys().cloned().collect()
    }

    pub async fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let body = tokio::fs::read_to_string(path.as_ref()).await?;
        let mut recording: Recording = serde_json::from_str(&body)?;
        for series in recording.candles.values_mut() {
            series.sort_by_key(|c| c.timestamp);
        }
        Ok(recording)
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, serde_json::to_string(self)?).await?;
        Ok(())
    }
}

/// Market data source that only sees candles closed by the clock's time
///
/// A symbol with fewer than `warmup` closed candles is reported as a data
/// quality failure and skipped by the cycle.
pub struct CandleReplay {
    recording: Recording,
    step: Duration,
    warmup: usize,
    clock: Arc<ManualClock>,
}

impl CandleReplay {
    pub fn new(recording: Recording, warmup: usize, clock: Arc<ManualClock>) -> anyhow::Result<Self> {
        let step = timeframe_duration(&recording.timeframe)
            .ok_or_else(|| anyhow::anyhow!("unsupported timeframe {}", recording.timeframe))?;
        Ok(Self {
            recording,
            step,
            warmup,
            clock,
        })
    }

    pub fn step(&self) -> Duration {
        self.step
    }

    /// Candles of `symbol` closed at `at`, oldest first
    fn closed(&self, symbol: &str, at: DateTime<Utc>) -> &[Candle] {
        let Some(series) = self.recording.candles.get(symbol) else {
            return &[];
        };
        let end = series.partition_point(|c| c.timestamp + self.step <= at);
        &series[..end]
    }

    /// Last close of `symbol` at `at`
    pub fn price_at(&self, symbol: &str, at: DateTime<Utc>) -> Option<Decimal> {
        self.closed(symbol, at).last().map(|c| c.close)
    }

    /// Candle close times in `[start, end]` at which some symbol is warm
    pub fn timeline(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let warmup = self.warmup.max(1);
        let times: BTreeSet<DateTime<Utc>> = self
            .recording
            .candles
            .values()
            .flat_map(|series| series.iter().skip(warmup - 1).map(|c| c.timestamp + self.step))
            .filter(|at| *at >= start && *at <= end)
            .collect();
        times.into_iter().collect()
    }
}

#[async_trait]
impl MarketDataClient for CandleReplay {
    async fn fetch_recent_candles(&self, symbol: &str, _timeframe: &str, limit: usize) -> Result<Vec<Candle>, FeedError> {
        let closed = self.closed(symbol, self.clock.now());
        if closed.is_empty() {
            return Err(FeedError::Rejected(format!("no recorded candles for {symbol}")));
        }
        if closed.len() < self.warmup {
            return Err(FeedError::DataQuality(format!(
                "{} closed candles, warmup needs {}",
                closed.len(),
                self.warmup
            )));
        }
        Ok(closed[closed.len().saturating_sub(limit)..].to_vec())
    }
}
