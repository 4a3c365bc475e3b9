//! Backtesting module
//!
//! Replays recorded candles through the trading cycle and reports trade
//! statistics

mod analytics;
mod replay;
mod simulator;

pub use analytics::{calculate_metrics, max_drawdown_pct, BacktestResult, BacktestSummary, EquityPoint};
pub use replay::{periods_per_year, timeframe_duration, CandleReplay, Recording};
pub use simulator::BacktestSimulator;

use chrono::{DateTime, NaiveDate, Utc};
use clap::ValueEnum;

/// Closed candles a symbol needs before it can be traded
pub const DEFAULT_WARMUP: usize = 50;

/// Backtest configuration
#[derive(Debug, Clone)]
pub struct BacktestConfig {
    /// First cycle time considered
    pub start: DateTime<Utc>,
    /// Last cycle time considered
    pub end: DateTime<Utc>,
    pub warmup: usize,
}

impl BacktestConfig {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end,
            warmup: DEFAULT_WARMUP,
        }
    }

    pub fn with_warmup(mut self, warmup: usize) -> Self {
        self.warmup = warmup;
        self
    }
}

/// Historical market regimes for stress testing
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StressScenario {
    #[value(name = "crash_2022")]
    Crash2022,
    #[value(name = "rally_2021")]
    Rally2021,
    #[value(name = "sideways_2023")]
    Sideways2023,
}

/// Volatile majors traded in every stress scenario
pub const STRESS_SYMBOLS: [&str; 4] = ["BTC/USDT", "ETH/USDT", "SOL/USDT", "XRP/USDT"];

impl StressScenario {
    pub fn description(&self) -> &'static str {
        match self {
            StressScenario::Crash2022 => "May-June 2022 Crypto Crash (BTC -40%)",
            StressScenario::Rally2021 => "October-November 2021 Bull Run",
            StressScenario::Sideways2023 => "2023 Q2 Consolidation",
        }
    }

    /// Start and end of the scenario, midnight UTC
    pub fn range(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let (start, end) = match self {
            StressScenario::Crash2022 => ((2022, 5, 1), (2022, 7, 1)),
            StressScenario::Rally2021 => ((2021, 10, 1), (2021, 11, 15)),
            StressScenario::Sideways2023 => ((2023, 3, 1), (2023, 6, 1)),
        };
        (midnight(start), midnight(end))
    }

    pub fn symbols(&self) -> Vec<String> {
        STRESS_SYMBOLS.iter().map(|s| s.to_string()).collect()
    }
}

fn midnight((year, month, day): (i32, u32, u32)) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .unwrap_or_default()
}
