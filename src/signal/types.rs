//! Signal types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of reasons carried by a signal
pub const MAX_REASONS: usize = 5;

/// Position direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Profits when price rises
    Long,
    /// Profits when price falls
    Short,
}

impl Side {
    /// Direction implied by a signal action, if any
    pub fn from_action(action: Action) -> Option<Self> {
        match action {
            Action::Buy => Some(Side::Long),
            Action::Sell => Some(Side::Short),
            Action::Hold => None,
        }
    }

    /// Lowercase label used in storage and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifier decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl Action {
    /// True when this action calls for exiting a position on `side`
    pub fn opposes(&self, side: Side) -> bool {
        matches!(
            (self, side),
            (Action::Sell, Side::Long) | (Action::Buy, Side::Short)
        )
    }
}

/// Signal strength
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strength {
    #[default]
    Normal,
    /// Independent scorers agree
    Strong,
}

/// A scored opportunity for one symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Trading pair, e.g. `BTC/USDT`
    pub symbol: String,
    /// Recommended action
    pub action: Action,
    /// Confidence in [0, 1]
    pub confidence: Decimal,
    /// Average true range in price units, when known
    pub atr: Option<Decimal>,
    /// Signal strength
    pub strength: Strength,
    /// Human-readable reasons, at most [`MAX_REASONS`]
    pub reasons: Vec<String>,
    /// Scoring timestamp
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    /// Create a new signal; confidence is clamped to [0, 1]
    pub fn new(
        symbol: impl Into<String>,
        action: Action,
        confidence: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            action,
            confidence: confidence.max(Decimal::ZERO).min(Decimal::ONE),
            atr: None,
            strength: Strength::Normal,
            reasons: vec![],
            timestamp,
        }
    }

    /// A no-trade signal carrying a single reason
    pub fn hold(symbol: impl Into<String>, reason: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self::new(symbol, Action::Hold, Decimal::ZERO, timestamp).with_reason(reason)
    }

    /// Attach an ATR reading
    pub fn with_atr(mut self, atr: Decimal) -> Self {
        self.atr = Some(atr);
        self
    }

    /// Set the signal strength
    pub fn with_strength(mut self, strength: Strength) -> Self {
        self.strength = strength;
        self
    }

    /// Append a reason; extra reasons beyond [`MAX_REASONS`] are dropped
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        if self.reasons.len() < MAX_REASONS {
            self.reasons.push(reason.into());
        }
        self
    }

    /// Whether the signal asks for a trade
    pub fn is_actionable(&self) -> bool {
        self.action != Action::Hold
    }
}
