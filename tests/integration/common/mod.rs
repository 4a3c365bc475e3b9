//! Scripted collaborators for driving the orchestrator

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use swing_alloc::clock::ManualClock;
use swing_alloc::config::Config;
use swing_alloc::execution::{ExecutionEngine, Fill, Order, PaperEngine};
use swing_alloc::feed::{Candle, FeedError, MarketDataClient};
use swing_alloc::orchestrator::CycleOrchestrator;
use swing_alloc::persistence::MemoryStore;
use swing_alloc::signal::{Action, Classifier, Signal};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap()
}

/// Prices and failures set per symbol by the test
#[derive(Default)]
pub struct ScriptedMarket {
    quotes: Mutex<HashMap<String, Result<Decimal, FeedError>>>,
}

impl ScriptedMarket {
    pub fn price(&self, symbol: &str, price: Decimal) {
        self.quotes.lock().unwrap().insert(symbol.to_string(), Ok(price));
    }

    pub fn fail(&self, symbol: &str, error: FeedError) {
        self.quotes.lock().unwrap().insert(symbol.to_string(), Err(error));
    }
}

#[async_trait]
impl MarketDataClient for ScriptedMarket {
    async fn fetch_recent_candles(&self, symbol: &str, _timeframe: &str, _limit: usize) -> Result<Vec<Candle>, FeedError> {
        let quote = self
            .quotes
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| Err(FeedError::Rejected(format!("no script for {symbol}"))))?;

        Ok(vec![Candle {
            timestamp: t0(),
            open: quote,
            high: quote,
            low: quote,
            close: quote,
            volume: dec!(1),
        }])
    }
}

/// Signals set per symbol; unscripted symbols HOLD
#[derive(Default)]
pub struct ScriptedClassifier {
    signals: Mutex<HashMap<String, (Action, Decimal)>>,
}

impl ScriptedClassifier {
    pub fn signal(&self, symbol: &str, action: Action, confidence: Decimal) {
        self.signals
            .lock()
            .unwrap()
            .insert(symbol.to_string(), (action, confidence));
    }
}

impl Classifier for ScriptedClassifier {
    fn score(&self, _candles: &[Candle], symbol: &str) -> Signal {
        let (action, confidence) = self
            .signals
            .lock()
            .unwrap()
            .get(symbol)
            .copied()
            .unwrap_or((Action::Hold, Decimal::ZERO));
        Signal::new(symbol, action, confidence, t0())
    }
}

/// Paper engine whose releases fail for chosen symbols
#[derive(Default)]
pub struct FlakyEngine {
    inner: PaperEngine,
    failing_releases: Mutex<HashSet<String>>,
}

impl FlakyEngine {
    pub fn fail_releases(&self, symbol: &str) {
        self.failing_releases.lock().unwrap().insert(symbol.to_string());
    }

    pub fn heal(&self) {
        self.failing_releases.lock().unwrap().clear();
    }
}

#[async_trait]
impl ExecutionEngine for FlakyEngine {
    async fn acquire(&self, order: Order) -> anyhow::Result<Fill> {
        self.inner.acquire(order).await
    }

    async fn release(&self, order: Order) -> anyhow::Result<Fill> {
        if self.failing_releases.lock().unwrap().contains(&order.symbol) {
            anyhow::bail!("exchange rejected close for {}", order.symbol);
        }
        self.inner.release(order).await
    }

    async fn fills(&self) -> anyhow::Result<Vec<Fill>> {
        self.inner.fills().await
    }
}

/// Config with a given watchlist and quick, deterministic fetches
pub fn config(watchlist: &[&str]) -> Config {
    let mut config = Config::default();
    config.orchestrator.watchlist = watchlist.iter().map(|s| s.to_string()).collect();
    config.feed.retry_attempts = 1;
    config.feed.fetch_timeout_secs = 5;
    config
}

pub struct Harness {
    pub market: Arc<ScriptedMarket>,
    pub classifier: Arc<ScriptedClassifier>,
    pub store: Arc<MemoryStore>,
    pub engine: Arc<FlakyEngine>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            market: Arc::new(ScriptedMarket::default()),
            classifier: Arc::new(ScriptedClassifier::default()),
            store: Arc::new(MemoryStore::new()),
            engine: Arc::new(FlakyEngine::default()),
            clock: Arc::new(ManualClock::new(t0())),
        }
    }

    pub fn orchestrator(&self, config: Config) -> CycleOrchestrator {
        CycleOrchestrator::new(
            config,
            self.market.clone(),
            self.classifier.clone(),
            self.store.clone(),
            self.engine.clone(),
            self.clock.clone(),
        )
        .unwrap()
    }

    /// Set price and signal in one go
    pub fn quote(&self, symbol: &str, price: Decimal, action: Action, confidence: Decimal) {
        self.market.price(symbol, price);
        self.classifier.signal(symbol, action, confidence);
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }
}
