//! Backtest command implementation

use crate::backtest::{
    timeframe_duration, BacktestConfig, BacktestSimulator, Recording, StressScenario, DEFAULT_WARMUP,
};
use crate::config::Config;
use crate::feed::{BinanceClient, BinanceConfig};
use crate::signal::TrendClassifier;
use anyhow::Context;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::Args;
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Args, Debug)]
pub struct BacktestArgs {
    /// Candle recording; downloaded from Binance when missing
    #[arg(long, default_value = "data/backtest.json")]
    pub data: PathBuf,

    /// Stress scenario, sets the range and symbols
    #[arg(long, value_enum)]
    pub scenario: Option<StressScenario>,

    /// Start date (YYYY-MM-DD)
    #[arg(long)]
    pub start: Option<NaiveDate>,

    /// End date (YYYY-MM-DD)
    #[arg(long)]
    pub end: Option<NaiveDate>,

    /// Symbols, comma separated; defaults to the watchlist
    #[arg(long, value_delimiter = ',')]
    pub symbols: Vec<String>,

    /// Initial capital
    #[arg(long)]
    pub capital: Option<Decimal>,

    /// Closed candles required before a symbol is traded
    #[arg(long, default_value_t = DEFAULT_WARMUP)]
    pub warmup: usize,

    /// Download again even if the recording exists
    #[arg(long)]
    pub refresh: bool,

    /// Output format: json or table
    #[arg(long, default_value = "table")]
    pub format: String,
}

impl BacktestArgs {
    pub async fn execute(&self, mut config: Config) -> anyhow::Result<()> {
        let (start, end, symbols) = self.plan(&config)?;
        if let Some(capital) = self.capital {
            config.orchestrator.initial_balance = capital;
        }
        config.validate()?;

        let recording = self.recording(&config, start, end, &symbols).await?;
        let backtest = BacktestConfig::new(start, end).with_warmup(self.warmup);
        let simulator = BacktestSimulator::new(config, backtest, Arc::new(TrendClassifier::default()));
        let result = simulator.run(recording).await?;

        match self.format.as_str() {
            "json" => println!("{}", serde_json::to_string_pretty(&result)?),
            _ => {
                if let Some(scenario) = self.scenario {
                    println!("Stress test: {}", scenario.description());
                }
                println!("Period: {start} to {end}");
                println!("Symbols: {}", symbols.join(", "));
                println!("{}", result.summary.format_table());
            }
        }
        Ok(())
    }

    /// Range and symbols from the scenario or the explicit flags
    fn plan(&self, config: &Config) -> anyhow::Result<(DateTime<Utc>, DateTime<Utc>, Vec<String>)> {
        if let Some(scenario) = self.scenario {
            let (start, end) = scenario.range();
            tracing::info!(scenario = ?scenario, description = scenario.description(), "Stress test");
            return Ok((start, end, scenario.symbols()));
        }

        let (Some(start), Some(end)) = (self.start, self.end) else {
            anyhow::bail!("--start and --end are required without --scenario");
        };
        if start >= end {
            anyhow::bail!("--start must be before --end");
        }
        let symbols = if self.symbols.is_empty() {
            config.orchestrator.watchlist.clone()
        } else {
            self.symbols.clone()
        };
        let midnight = |date: NaiveDate| date.and_time(NaiveTime::MIN).and_utc();
        Ok((midnight(start), midnight(end), symbols))
    }

    /// Load the recording, downloading it when missing, stale or refreshed
    async fn recording(
        &self,
        config: &Config,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        symbols: &[String],
    ) -> anyhow::Result<Recording> {
        let timeframe = config.feed.timeframe.as_str();
        let step = timeframe_duration(timeframe).with_context(|| format!("unsupported timeframe {timeframe}"))?;

        if !self.refresh && self.data.exists() {
            let recording = Recording::load(&self.data)
                .await
                .with_context(|| format!("reading {}", self.data.display()))?;
            let covers = recording.timeframe == timeframe
                && symbols.iter().all(|s| {
                    recording.candles.get(s).is_some_and(|series| match (series.first(), series.last()) {
                        (Some(first), Some(last)) => first.timestamp <= start && last.timestamp + step >= end,
                        _ => false,
                    })
                });
            if covers {
                tracing::info!(path = %self.data.display(), "Using cached recording");
                return Ok(recording);
            }
            tracing::info!(path = %self.data.display(), "Cached recording does not match, downloading");
        }

        let from = start - step * i32::try_from(self.warmup).unwrap_or(i32::MAX);
        let client = BinanceClient::with_config(BinanceConfig {
            base_url: config.feed.base_url.clone(),
            timeout: Duration::from_secs(config.feed.fetch_timeout_secs),
        })?;

        let mut recording = Recording::new(timeframe);
        for symbol in symbols {
            let candles = client
                .fetch_range(symbol, timeframe, from, end)
                .await
                .with_context(|| format!("downloading {symbol}"))?;
            if candles.is_empty() {
                tracing::warn!(symbol = %symbol, "No candles in range");
                continue;
            }
            recording.insert(symbol, candles);
        }

        recording
            .save(&self.data)
            .await
            .with_context(|| format!("writing {}", self.data.display()))?;
        tracing::info!(path = %self.data.display(), symbols = recording.candles.len(), "Recording cached");
        Ok(recording)
    }
}
