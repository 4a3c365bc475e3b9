//! Configuration types for swing-alloc
//!
//! Every section and field has a default, so an empty file is a valid config.

use crate::fees::FeeConfig;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Invalid policy values; fatal at startup
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{field} must be within [0, 1], got {value}")]
    OutOfRange { field: &'static str, value: Decimal },
    #[error("{field} must be positive, got {value}")]
    NotPositive { field: &'static str, value: Decimal },
    #[error("{0} must not be zero")]
    Zero(&'static str),
    #[error("{0} must be strictly ascending")]
    NotAscending(&'static str),
    #[error("{0} must not be empty")]
    Empty(&'static str),
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub risk: RiskConfig,
    pub fees: FeeConfig,
    pub orchestrator: OrchestratorConfig,
    pub feed: FeedConfig,
    pub persistence: PersistenceConfig,
    pub telemetry: TelemetryConfig,
}

/// Confidence threshold and the size multiplier it unlocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConfidenceTier {
    pub min_confidence: Decimal,
    pub multiplier: Decimal,
}

/// Take-profit percentage for an `atr / price` volatility band
///
/// `max_atr_ratio = None` marks the open-ended top band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct TakeProfitBand {
    pub max_atr_ratio: Option<Decimal>,
    pub take_profit_pct: Decimal,
}

/// Admission and sizing policy
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RiskConfig {
    pub max_open_positions: usize,
    pub max_positions_per_symbol: usize,
    pub max_daily_trades: u32,
    pub max_daily_loss_pct: Decimal,
    pub max_drawdown_pct: Decimal,
    pub max_total_exposure_pct: Decimal,
    /// Smallest notional worth opening
    pub min_trade_value: Decimal,
    pub risk_per_trade_pct: Decimal,
    /// Notional cap as a share of free balance
    pub max_position_pct: Decimal,
    pub default_stop_loss_pct: Decimal,
    /// Flat take-profit when ATR is unknown
    pub default_take_profit_pct: Decimal,
    pub cooldown_minutes: u32,
    /// Ascending by `min_confidence`; below the first tier is no trade
    pub confidence_tiers: Vec<ConfidenceTier>,
    pub trailing_activation_pct: Decimal,
    pub trailing_distance_pct: Decimal,
    /// Ascending by `max_atr_ratio`, last band open-ended
    pub take_profit_bands: Vec<TakeProfitBand>,
    pub kelly_fraction_cap: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_open_positions: 5,
            max_positions_per_symbol: 2,
            max_daily_trades: 9999,
            max_daily_loss_pct: dec!(0.05),
            max_drawdown_pct: dec!(0.15),
            max_total_exposure_pct: dec!(0.60),
            min_trade_value: dec!(10),
            risk_per_trade_pct: dec!(0.02),
            max_position_pct: dec!(0.15),
            default_stop_loss_pct: dec!(0.025),
            default_take_profit_pct: dec!(0.045),
            cooldown_minutes: 30,
            confidence_tiers: vec![
                ConfidenceTier {
                    min_confidence: dec!(0.55),
                    multiplier: dec!(0.5),
                },
                ConfidenceTier {
                    min_confidence: dec!(0.60),
                    multiplier: dec!(0.8),
                },
                ConfidenceTier {
                    min_confidence: dec!(0.70),
                    multiplier: dec!(1.0),
                },
                ConfidenceTier {
                    min_confidence: dec!(0.85),
                    multiplier: dec!(1.2),
                },
            ],
            trailing_activation_pct: dec!(0.02),
            trailing_distance_pct: dec!(0.01),
            take_profit_bands: vec![
                TakeProfitBand {
                    max_atr_ratio: Some(dec!(0.015)),
                    take_profit_pct: dec!(0.03),
                },
                TakeProfitBand {
                    max_atr_ratio: Some(dec!(0.03)),
                    take_profit_pct: dec!(0.045),
                },
                TakeProfitBand {
                    max_atr_ratio: None,
                    take_profit_pct: dec!(0.06),
                },
            ],
            kelly_fraction_cap: dec!(0.25),
        }
    }
}

/// Execution mode: paper trading or live
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Paper,
    Live,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Paper => "paper",
            ExecutionMode::Live => "live",
        }
    }
}

/// Cycle scheduling and auction settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub mode: ExecutionMode,
    /// Symbols analyzed every cycle in addition to held ones
    pub watchlist: Vec<String>,
    pub cycle_interval_secs: u64,
    /// Minimum confidence gap for an arbitrage swap
    pub swap_threshold: Decimal,
    pub balance_snapshot_minutes: u32,
    /// Skip exit checks too while the daily gate is tripped
    pub halt_also_freezes_exits: bool,
    pub allow_short: bool,
    pub use_kelly: bool,
    /// Close every open position when the run loop is interrupted
    pub close_on_shutdown: bool,
    /// Starting capital when no balance snapshot exists
    pub initial_balance: Decimal,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Paper,
            watchlist: vec![
                "BTC/USDT".to_string(),
                "ETH/USDT".to_string(),
                "SOL/USDT".to_string(),
                "BNB/USDT".to_string(),
                "XRP/USDT".to_string(),
            ],
            cycle_interval_secs: 60,
            swap_threshold: dec!(0.25),
            balance_snapshot_minutes: 60,
            halt_also_freezes_exits: true,
            allow_short: false,
            use_kelly: false,
            close_on_shutdown: false,
            initial_balance: dec!(1000),
        }
    }
}

/// Market data fetch settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FeedConfig {
    pub base_url: String,
    pub timeframe: String,
    pub candle_limit: usize,
    pub max_concurrent_fetches: usize,
    /// Per-symbol timeout covering retries
    pub fetch_timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_initial_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: crate::feed::BINANCE_API_URL.to_string(),
            timeframe: "1h".to_string(),
            candle_limit: 200,
            max_concurrent_fetches: 4,
            fetch_timeout_secs: 30,
            retry_attempts: 3,
            retry_initial_delay_ms: 1000,
            retry_max_delay_ms: 8000,
        }
    }
}

impl FeedConfig {
    /// Retry policy for candle fetches
    pub fn retry_policy(&self) -> crate::feed::RetryPolicy {
        crate::feed::RetryPolicy {
            max_attempts: self.retry_attempts,
            initial_delay: std::time::Duration::from_millis(self.retry_initial_delay_ms),
            max_delay: std::time::Duration::from_millis(self.retry_max_delay_ms),
        }
    }
}

/// Storage backends
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// SQLite URL for the primary store; local file only when unset
    pub database_url: Option<String>,
    /// Local fallback store
    pub fallback_path: PathBuf,
    /// Seconds before a tripped primary is tried again
    pub reprobe_interval_secs: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            fallback_path: PathBuf::from("./data/state.json"),
            reprobe_interval_secs: 300,
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Prometheus exporter port; disabled when unset
    pub metrics_port: Option<u16>,
    pub log_level: String,
    pub log_format: crate::telemetry::LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            metrics_port: None,
            log_level: "info".to_string(),
            log_format: crate::telemetry::LogFormat::Pretty,
        }
    }
}

fn unit_interval(field: &'static str, value: Decimal) -> Result<(), ConfigError> {
    if value < Decimal::ZERO || value > Decimal::ONE {
        return Err(ConfigError::OutOfRange { field, value });
    }
    Ok(())
}

fn positive(field: &'static str, value: Decimal) -> Result<(), ConfigError> {
    if value <= Decimal::ZERO {
        return Err(ConfigError::NotPositive { field, value });
    }
    Ok(())
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Reject policies the allocator cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let risk = &self.risk;
        unit_interval("risk.max_daily_loss_pct", risk.max_daily_loss_pct)?;
        unit_interval("risk.max_drawdown_pct", risk.max_drawdown_pct)?;
        unit_interval("risk.risk_per_trade_pct", risk.risk_per_trade_pct)?;
        unit_interval("risk.max_position_pct", risk.max_position_pct)?;
        unit_interval("risk.default_take_profit_pct", risk.default_take_profit_pct)?;
        unit_interval("risk.trailing_activation_pct", risk.trailing_activation_pct)?;
        unit_interval("risk.trailing_distance_pct", risk.trailing_distance_pct)?;
        unit_interval("risk.kelly_fraction_cap", risk.kelly_fraction_cap)?;
        unit_interval("risk.default_stop_loss_pct", risk.default_stop_loss_pct)?;
        positive("risk.default_stop_loss_pct", risk.default_stop_loss_pct)?;
        positive("risk.max_total_exposure_pct", risk.max_total_exposure_pct)?;
        if risk.min_trade_value < Decimal::ZERO {
            return Err(ConfigError::NotPositive {
                field: "risk.min_trade_value",
                value: risk.min_trade_value,
            });
        }
        if risk.max_open_positions == 0 {
            return Err(ConfigError::Zero("risk.max_open_positions"));
        }
        if risk.max_positions_per_symbol == 0 {
            return Err(ConfigError::Zero("risk.max_positions_per_symbol"));
        }

        if risk.confidence_tiers.is_empty() {
            return Err(ConfigError::Empty("risk.confidence_tiers"));
        }
        for tier in &risk.confidence_tiers {
            unit_interval("risk.confidence_tiers.min_confidence", tier.min_confidence)?;
            if tier.multiplier < Decimal::ZERO {
                return Err(ConfigError::NotPositive {
                    field: "risk.confidence_tiers.multiplier",
                    value: tier.multiplier,
                });
            }
        }
        if risk
            .confidence_tiers
            .windows(2)
            .any(|w| w[0].min_confidence >= w[1].min_confidence)
        {
            return Err(ConfigError::NotAscending("risk.confidence_tiers"));
        }

        if risk.take_profit_bands.is_empty() {
            return Err(ConfigError::Empty("risk.take_profit_bands"));
        }
        for band in &risk.take_profit_bands {
            unit_interval("risk.take_profit_bands.take_profit_pct", band.take_profit_pct)?;
        }
        // Only the last band may be open-ended
        let bounded = &risk.take_profit_bands[..risk.take_profit_bands.len() - 1];
        if bounded.iter().any(|b| b.max_atr_ratio.is_none()) {
            return Err(ConfigError::NotAscending("risk.take_profit_bands"));
        }
        if risk.take_profit_bands.windows(2).any(|w| {
            matches!((w[0].max_atr_ratio, w[1].max_atr_ratio), (Some(a), Some(b)) if a >= b)
        }) {
            return Err(ConfigError::NotAscending("risk.take_profit_bands"));
        }

        let fees = &self.fees;
        unit_interval("fees.taker_rate", fees.taker_rate)?;
        unit_interval("fees.margin_open_rate", fees.margin_open_rate)?;
        unit_interval("fees.margin_rollover_rate", fees.margin_rollover_rate)?;
        unit_interval("fees.slippage_rate", fees.slippage_rate)?;
        if fees.rollover_interval_hours == 0 {
            return Err(ConfigError::Zero("fees.rollover_interval_hours"));
        }

        let orchestrator = &self.orchestrator;
        unit_interval("orchestrator.swap_threshold", orchestrator.swap_threshold)?;
        if orchestrator.watchlist.is_empty() {
            return Err(ConfigError::Empty("orchestrator.watchlist"));
        }
        positive("orchestrator.initial_balance", orchestrator.initial_balance)?;

        if self.feed.max_concurrent_fetches == 0 {
            return Err(ConfigError::Zero("feed.max_concurrent_fetches"));
        }
        if self.feed.candle_limit == 0 {
            return Err(ConfigError::Zero("feed.candle_limit"));
        }

        Ok(())
    }
}
