//! Risk management types

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a new position was not admitted
///
/// Not a failure: a normal control-flow outcome carrying a readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// Realized losses today exceed the daily limit
    #[error("daily loss limit reached ({pnl:.2} < -{limit:.2})")]
    DailyLossLimit { pnl: Decimal, limit: Decimal },
    /// Daily trade count exhausted
    #[error("max daily trades reached ({0})")]
    MaxDailyTrades(u32),
    /// Portfolio-wide position cap reached
    #[error("max open positions reached ({0})")]
    MaxOpenPositions(usize),
    /// Per-symbol position cap reached
    #[error("max positions for {symbol} reached ({limit})")]
    MaxSymbolPositions { symbol: String, limit: usize },
    /// Symbol traded too recently
    #[error("cooldown active for {symbol} ({remaining_minutes:.1}min remaining)")]
    Cooldown {
        symbol: String,
        remaining_minutes: Decimal,
    },
    /// Drawdown from peak balance above limit
    #[error("max drawdown reached ({0:.4})")]
    MaxDrawdown(Decimal),
    /// Open notional above exposure limit
    #[error("max exposure reached ({exposure:.2} > {limit:.2})")]
    MaxExposure { exposure: Decimal, limit: Decimal },
    /// Confidence below the lowest sizing tier
    #[error("confidence {0} below minimum")]
    LowConfidence(Decimal),
    /// Sized notional under the configured floor
    #[error("position value {notional:.2} below minimum {min:.2}")]
    BelowMinimumSize { notional: Decimal, min: Decimal },
    /// Notional plus entry fees exceed free balance
    #[error("insufficient funds (need {required:.2}, free {free:.2})")]
    InsufficientFunds { required: Decimal, free: Decimal },
    /// Quote unusable for sizing
    #[error("invalid price {0}")]
    InvalidPrice(Decimal),
}

impl Rejection {
    /// Capacity rejections can be cured by freeing capital or a slot
    ///
    /// Only these are eligible for preemption; everything else is a hard skip.
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            Rejection::InsufficientFunds { .. }
                | Rejection::BelowMinimumSize { .. }
                | Rejection::MaxOpenPositions(_)
                | Rejection::MaxExposure { .. }
        )
    }
}

/// Account balance in quote currency
///
/// Invariant: `total == free + used` after every mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub total: Decimal,
    pub free: Decimal,
    pub used: Decimal,
}

impl Balance {
    /// Fully free balance
    pub fn new(total: Decimal) -> Self {
        Self {
            total,
            free: total,
            used: Decimal::ZERO,
        }
    }

    /// Balance restored from a snapshot; `total` is recomputed from its parts
    pub fn from_parts(free: Decimal, used: Decimal) -> Self {
        Self {
            total: free + used,
            free,
            used,
        }
    }

    /// Move `notional` from free to used and pay `entry_fee`
    pub fn commit(&mut self, notional: Decimal, entry_fee: Decimal) -> Result<(), Rejection> {
        let required = notional + entry_fee;
        if required > self.free {
            return Err(Rejection::InsufficientFunds {
                required,
                free: self.free,
            });
        }

        self.free -= required;
        self.used += notional;
        self.total = self.free + self.used;
        Ok(())
    }

    /// Release `notional` back to free, adding `pnl` (after exit costs)
    pub fn settle(&mut self, notional: Decimal, pnl: Decimal) {
        self.used -= notional;
        self.free += notional + pnl;
        self.total = self.free + self.used;
    }

    /// Whether the bookkeeping invariant holds
    pub fn is_consistent(&self) -> bool {
        self.total == self.free + self.used
    }
}
