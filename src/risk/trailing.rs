//! Trailing stop evaluation

use crate::signal::Side;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Trailing stop lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrailingState {
    /// Peak profit below the activation threshold
    Inactive,
    /// Trailing the peak, not crossed
    Active,
    /// Price crossed the trail level
    Triggered,
}

/// Result of one trailing stop evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrailingStop {
    pub should_close: bool,
    /// Trail level, set once active
    pub trail_price: Option<Decimal>,
    pub state: TrailingState,
}

/// Trailing stop parameters
#[derive(Debug, Clone, Copy)]
pub struct TrailingRule {
    /// Peak profit from entry that arms the trail
    pub activation_pct: Decimal,
    /// Distance of the trail level behind the peak
    pub distance_pct: Decimal,
}

impl TrailingRule {
    /// Evaluate the trail for a position at `current` with extreme `peak`
    ///
    /// `peak` is the highest price seen for longs and the lowest for shorts.
    pub fn evaluate(&self, entry: Decimal, current: Decimal, peak: Decimal, side: Side) -> TrailingStop {
        if entry <= Decimal::ZERO {
            return TrailingStop {
                should_close: false,
                trail_price: None,
                state: TrailingState::Inactive,
            };
        }

        let peak_profit = match side {
            Side::Long => (peak - entry) / entry,
            Side::Short => (entry - peak) / entry,
        };

        if peak_profit < self.activation_pct {
            return TrailingStop {
                should_close: false,
                trail_price: None,
                state: TrailingState::Inactive,
            };
        }

        let (trail, crossed) = match side {
            Side::Long => {
                let trail = peak * (Decimal::ONE - self.distance_pct);
                (trail, current <= trail)
            }
            Side::Short => {
                let trail = peak * (Decimal::ONE + self.distance_pct);
                (trail, current >= trail)
            }
        };

        TrailingStop {
            should_close: crossed,
            trail_price: Some(trail),
            state: if crossed {
                TrailingState::Triggered
            } else {
                TrailingState::Active
            },
        }
    }
}
