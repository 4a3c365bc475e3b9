//! Candle classifiers
//!
//! The orchestrator only depends on the [`Classifier`] trait. [`TrendClassifier`]
//! is a small moving-average crossover scorer used by the CLI runner.

use super::{Action, Signal, Strength};
use crate::feed::Candle;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Turns a candle history into a signal
pub trait Classifier: Send + Sync {
    /// Score the most recent state of `symbol`
    fn score(&self, candles: &[Candle], symbol: &str) -> Signal;
}

/// Moving-average crossover scorer measured in ATR units
#[derive(Debug, Clone)]
pub struct TrendClassifier {
    /// Fast moving-average period
    pub fast_period: usize,
    /// Slow moving-average period
    pub slow_period: usize,
    /// ATR period
    pub atr_period: usize,
    /// Minimum confidence for BUY/SELL
    pub min_actionable: Decimal,
    /// Confidence at which a signal is STRONG
    pub strong_threshold: Decimal,
}

impl Default for TrendClassifier {
    fn default() -> Self {
        Self {
            fast_period: 10,
            slow_period: 30,
            atr_period: 14,
            min_actionable: dec!(0.15),
            strong_threshold: dec!(0.70),
        }
    }
}

impl TrendClassifier {
    fn sma(closes: &[Decimal], period: usize) -> Decimal {
        let window = &closes[closes.len() - period..];
        window.iter().copied().sum::<Decimal>() / Decimal::from(period)
    }

    /// Simple average of the last `period` true ranges
    pub fn atr(candles: &[Candle], period: usize) -> Option<Decimal> {
        if period == 0 || candles.len() < period + 1 {
            return None;
        }

        let start = candles.len() - period;
        let total: Decimal = (start..candles.len())
            .map(|i| {
                let prev_close = candles[i - 1].close;
                let c = &candles[i];
                (c.high - c.low)
                    .max((c.high - prev_close).abs())
                    .max((c.low - prev_close).abs())
            })
            .sum();

        Some(total / Decimal::from(period))
    }
}

impl Classifier for TrendClassifier {
    fn score(&self, candles: &[Candle], symbol: &str) -> Signal {
        let now = candles
            .last()
            .map(|c| c.timestamp)
            .unwrap_or_else(chrono::Utc::now);

        let needed = self.slow_period.max(self.atr_period + 1);
        if candles.len() < needed {
            return Signal::hold(symbol, "Insufficient data", now);
        }

        let closes: Vec<Decimal> = candles.iter().map(|c| c.close).collect();
        let fast = Self::sma(&closes, self.fast_period);
        let slow = Self::sma(&closes, self.slow_period);
        let atr = match Self::atr(candles, self.atr_period) {
            Some(atr) if atr > Decimal::ZERO => atr,
            _ => return Signal::hold(symbol, "Flat market", now),
        };

        // Distance between the averages in ATRs; two ATRs maps to full confidence
        let spread_atrs = (fast - slow) / atr;
        let confidence = (spread_atrs.abs() / dec!(2)).min(Decimal::ONE);

        let action = if confidence < self.min_actionable {
            Action::Hold
        } else if spread_atrs > Decimal::ZERO {
            Action::Buy
        } else {
            Action::Sell
        };

        let last_close = closes[closes.len() - 1];
        let confirmed = match action {
            Action::Buy => last_close > fast,
            Action::Sell => last_close < fast,
            Action::Hold => false,
        };

        let mut signal = Signal::new(symbol, action, confidence, now)
            .with_atr(atr)
            .with_reason(format!(
                "MA{} vs MA{}: {:.2} ATR",
                self.fast_period,
                self.slow_period,
                spread_atrs.round_dp(2)
            ));

        if confirmed && confidence >= self.strong_threshold {
            signal = signal
                .with_strength(Strength::Strong)
                .with_reason("Price confirms trend");
        }

        signal
    }
}
