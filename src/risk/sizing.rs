//! Position sizing
//!
//! Risk-based notional scaled by confidence tier and volatility, capped by the
//! per-position limit. Exit levels are derived from the entry price: a fixed
//! stop distance and a take-profit picked by `atr / price` band.

use super::Rejection;
use crate::config::{ConfidenceTier, RiskConfig};
use crate::signal::Side;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Inputs for one sizing decision
#[derive(Debug, Clone)]
pub struct SizingRequest {
    pub free_balance: Decimal,
    pub price: Decimal,
    pub confidence: Decimal,
    pub side: Side,
    pub atr: Option<Decimal>,
    /// De-rating input; 2.0 halves the size, floored at 0.5
    pub volatility_factor: Option<Decimal>,
    /// Bet fraction from trade history, replaces the flat risk sizing
    pub kelly_fraction: Option<Decimal>,
}

impl SizingRequest {
    pub fn new(free_balance: Decimal, price: Decimal, confidence: Decimal, side: Side) -> Self {
        Self {
            free_balance,
            price,
            confidence,
            side,
            atr: None,
            volatility_factor: None,
            kelly_fraction: None,
        }
    }

    pub fn with_atr(mut self, atr: Option<Decimal>) -> Self {
        self.atr = atr;
        self
    }

    pub fn with_volatility_factor(mut self, factor: Decimal) -> Self {
        self.volatility_factor = Some(factor);
        self
    }

    pub fn with_kelly(mut self, fraction: Option<Decimal>) -> Self {
        self.kelly_fraction = fraction;
        self
    }
}

/// Sized position with its exit levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sizing {
    /// Amount in base units
    pub size: Decimal,
    /// `size * price`
    pub notional: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
}

/// Multiplier of the highest tier reached, `None` below the first tier
pub fn confidence_multiplier(tiers: &[ConfidenceTier], confidence: Decimal) -> Option<Decimal> {
    tiers
        .iter()
        .rev()
        .find(|tier| confidence >= tier.min_confidence)
        .map(|tier| tier.multiplier)
}

/// Take-profit distance for the volatility band of `atr / price`
pub fn take_profit_pct(config: &RiskConfig, price: Decimal, atr: Option<Decimal>) -> Decimal {
    let atr = match atr {
        Some(atr) if atr > dec!(0) && price > dec!(0) => atr,
        _ => return config.default_take_profit_pct,
    };

    let ratio = atr / price;
    config
        .take_profit_bands
        .iter()
        .find(|band| band.max_atr_ratio.map_or(true, |max| ratio < max))
        .map(|band| band.take_profit_pct)
        .unwrap_or(config.default_take_profit_pct)
}

/// Stop and target prices for an entry at `price`
pub fn exit_levels(config: &RiskConfig, price: Decimal, side: Side, atr: Option<Decimal>) -> (Decimal, Decimal) {
    let stop = config.default_stop_loss_pct;
    let target = take_profit_pct(config, price, atr);

    match side {
        Side::Long => (price * (Decimal::ONE - stop), price * (Decimal::ONE + target)),
        Side::Short => (price * (Decimal::ONE + stop), price * (Decimal::ONE - target)),
    }
}

/// Size a new position
pub fn size_position(config: &RiskConfig, req: &SizingRequest) -> Result<Sizing, Rejection> {
    if req.price <= dec!(0) {
        return Err(Rejection::InvalidPrice(req.price));
    }

    let multiplier = confidence_multiplier(&config.confidence_tiers, req.confidence)
        .ok_or(Rejection::LowConfidence(req.confidence))?;

    let mut notional = match req.kelly_fraction {
        Some(kelly) if kelly > dec!(0) => req.free_balance * kelly.min(config.kelly_fraction_cap),
        _ => req.free_balance * config.risk_per_trade_pct / config.default_stop_loss_pct,
    };

    notional *= multiplier;

    if let Some(factor) = req.volatility_factor {
        notional /= factor.max(dec!(0.5));
    }

    let max_notional = req.free_balance * config.max_position_pct;
    notional = notional.min(max_notional);

    if notional < config.min_trade_value || notional <= dec!(0) {
        return Err(Rejection::BelowMinimumSize {
            notional,
            min: config.min_trade_value,
        });
    }

    let (stop_loss, take_profit) = exit_levels(config, req.price, req.side, req.atr);

    Ok(Sizing {
        size: notional / req.price,
        notional,
        stop_loss,
        take_profit,
    })
}
