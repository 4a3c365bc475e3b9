//! Concurrent per-symbol fetch and score
//!
//! Each symbol is an independent future carrying its own timeout. Failures
//! are collected next to the successes; nothing here short-circuits.

use crate::config::FeedConfig;
use crate::feed::{fetch_with_retry, FeedError, MarketDataClient, RetryPolicy};
use crate::signal::{Classifier, Signal};
use futures_util::future::join_all;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::timeout;

/// Fresh price and signal for one symbol
#[derive(Debug, Clone)]
pub struct SymbolAnalysis {
    pub symbol: String,
    /// Last close
    pub price: Decimal,
    pub signal: Signal,
}

/// A symbol excluded from this cycle
#[derive(Debug, Clone)]
pub struct SymbolFailure {
    pub symbol: String,
    pub error: FeedError,
}

#[derive(Debug, Default)]
pub struct BatchAnalysis {
    pub analyses: BTreeMap<String, SymbolAnalysis>,
    pub failures: Vec<SymbolFailure>,
}

impl BatchAnalysis {
    pub fn get(&self, symbol: &str) -> Option<&SymbolAnalysis> {
        self.analyses.get(symbol)
    }

    pub fn prices(&self) -> std::collections::HashMap<String, Decimal> {
        self.analyses
            .values()
            .map(|a| (a.symbol.clone(), a.price))
            .collect()
    }
}

/// Fetch and score every symbol, at most `max_concurrent_fetches` at a time
pub async fn analyze_batch(
    client: &dyn MarketDataClient,
    classifier: &dyn Classifier,
    symbols: &[String],
    config: &FeedConfig,
) -> BatchAnalysis {
    let semaphore = Semaphore::new(config.max_concurrent_fetches.max(1));
    let policy = config.retry_policy();
    let limit = Duration::from_secs(config.fetch_timeout_secs);

    let tasks = symbols.iter().map(|symbol| {
        let semaphore = &semaphore;
        let policy = &policy;
        async move {
            let result = match semaphore.acquire().await {
                Ok(_permit) => match timeout(limit, analyze_symbol(client, classifier, symbol, config, policy)).await {
                    Ok(result) => result,
                    Err(_) => Err(FeedError::Timeout),
                },
                Err(_) => Err(FeedError::Transient("fetch pool closed".into())),
            };
            (symbol.clone(), result)
        }
    });

    let mut batch = BatchAnalysis::default();
    for (symbol, result) in join_all(tasks).await {
        match result {
            Ok(analysis) => {
                batch.analyses.insert(symbol, analysis);
            }
            Err(error) => {
                tracing::warn!(symbol = %symbol, error = %error, "Symbol skipped this cycle");
                batch.failures.push(SymbolFailure { symbol, error });
            }
        }
    }

    tracing::debug!(
        analyzed = batch.analyses.len(),
        failed = batch.failures.len(),
        "Batch analysis complete"
    );
    batch
}

async fn analyze_symbol(
    client: &dyn MarketDataClient,
    classifier: &dyn Classifier,
    symbol: &str,
    config: &FeedConfig,
    policy: &RetryPolicy,
) -> Result<SymbolAnalysis, FeedError> {
    let candles = fetch_with_retry(client, symbol, &config.timeframe, config.candle_limit, policy).await?;

    let last = candles
        .last()
        .ok_or_else(|| FeedError::DataQuality("no candles".into()))?;
    if last.close <= Decimal::ZERO {
        return Err(FeedError::DataQuality(format!("non-positive close {}", last.close)));
    }

    let signal = classifier.score(&candles, symbol);
    Ok(SymbolAnalysis {
        symbol: symbol.to_string(),
        price: last.close,
        signal,
    })
}
