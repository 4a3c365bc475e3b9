//! Admission control
//!
//! Gatekeeper for new positions: ordered limit checks, sizing, trailing stops,
//! and the daily/portfolio bookkeeping those checks read.

use super::limits::RiskState;
use super::sizing::{self, Sizing, SizingRequest};
use super::trailing::{TrailingRule, TrailingStop};
use super::Rejection;
use crate::config::RiskConfig;
use crate::signal::Side;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct OpenExposure {
    symbol: String,
    notional: Decimal,
}

/// Stateful admission controller
pub struct AdmissionController {
    config: RiskConfig,
    state: RiskState,
    open: HashMap<Uuid, OpenExposure>,
}

impl AdmissionController {
    /// Create a controller for an account holding `initial_balance`
    pub fn new(config: RiskConfig, initial_balance: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            config,
            state: RiskState::new(initial_balance, now),
            open: HashMap::new(),
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn state(&self) -> &RiskState {
        &self.state
    }

    /// Whether the account may open anything at all today
    ///
    /// Covers the daily loss and daily trade count checks only.
    pub fn trading_halt(&self, balance: Decimal) -> Option<Rejection> {
        let limit = balance * self.config.max_daily_loss_pct;
        if self.state.daily_pnl < -limit {
            return Some(Rejection::DailyLossLimit {
                pnl: self.state.daily_pnl,
                limit,
            });
        }

        if self.state.daily_trade_count >= self.config.max_daily_trades {
            return Some(Rejection::MaxDailyTrades(self.config.max_daily_trades));
        }

        None
    }

    /// Run the admission checks in order; the first failure wins
    pub fn can_admit(&self, symbol: &str, balance: Decimal, now: DateTime<Utc>) -> Result<(), Rejection> {
        if let Some(halt) = self.trading_halt(balance) {
            return Err(halt);
        }

        if self.open.len() >= self.config.max_open_positions {
            return Err(Rejection::MaxOpenPositions(self.config.max_open_positions));
        }

        let for_symbol = self.open.values().filter(|e| e.symbol == symbol).count();
        if for_symbol >= self.config.max_positions_per_symbol {
            return Err(Rejection::MaxSymbolPositions {
                symbol: symbol.to_string(),
                limit: self.config.max_positions_per_symbol,
            });
        }

        if let Some(remaining) = self.cooldown_remaining(symbol, now) {
            let remaining_minutes =
                (Decimal::from(remaining.num_milliseconds()) / Decimal::from(60_000)).round_dp(1);
            return Err(Rejection::Cooldown {
                symbol: symbol.to_string(),
                remaining_minutes,
            });
        }

        if self.state.current_drawdown_pct > self.config.max_drawdown_pct {
            return Err(Rejection::MaxDrawdown(self.state.current_drawdown_pct));
        }

        let exposure = self.exposure();
        let limit = balance * self.config.max_total_exposure_pct;
        if exposure > limit {
            return Err(Rejection::MaxExposure { exposure, limit });
        }

        Ok(())
    }

    /// Time left on a symbol's cooldown, if any
    pub fn cooldown_remaining(&self, symbol: &str, now: DateTime<Utc>) -> Option<Duration> {
        let last = self.state.last_trade_time.get(symbol)?;
        let window = Duration::minutes(i64::from(self.config.cooldown_minutes));
        let elapsed = now.signed_duration_since(*last);
        (elapsed < window).then(|| window - elapsed)
    }

    /// Size a position under this controller's policy
    pub fn size_position(&self, req: &SizingRequest) -> Result<Sizing, Rejection> {
        sizing::size_position(&self.config, req)
    }

    /// Evaluate the trailing stop for a position
    pub fn trailing_stop(&self, entry: Decimal, current: Decimal, peak: Decimal, side: Side) -> TrailingStop {
        TrailingRule {
            activation_pct: self.config.trailing_activation_pct,
            distance_pct: self.config.trailing_distance_pct,
        }
        .evaluate(entry, current, peak, side)
    }

    /// Record a newly opened position
    pub fn register(&mut self, id: Uuid, symbol: &str, notional: Decimal, now: DateTime<Utc>) {
        self.open.insert(
            id,
            OpenExposure {
                symbol: symbol.to_string(),
                notional,
            },
        );
        self.state.last_trade_time.insert(symbol.to_string(), now);
        self.state.daily_trade_count += 1;

        tracing::debug!(%id, symbol, %notional, daily_trades = self.state.daily_trade_count, "Registered position");
    }

    /// Re-insert a position loaded from storage without counting it as a trade
    pub fn restore(&mut self, id: Uuid, symbol: &str, notional: Decimal) {
        self.open.insert(
            id,
            OpenExposure {
                symbol: symbol.to_string(),
                notional,
            },
        );
    }

    /// Restore a persisted cooldown stamp, keeping the newer one
    pub fn restore_cooldown(&mut self, symbol: &str, last_trade: DateTime<Utc>) {
        let entry = self
            .state
            .last_trade_time
            .entry(symbol.to_string())
            .or_insert(last_trade);
        if last_trade > *entry {
            *entry = last_trade;
        }
    }

    /// Restore today's realized P&L and trade count after a restart
    pub fn restore_daily(&mut self, pnl: Decimal, trades: u32) {
        self.state.daily_pnl = pnl;
        self.state.daily_trade_count = trades;
    }

    /// Remove a closed position and book its realized P&L
    ///
    /// Unknown ids are ignored with a warning.
    pub fn close(&mut self, id: Uuid, pnl: Decimal) -> bool {
        if self.open.remove(&id).is_none() {
            tracing::warn!(%id, "Close for unknown position ignored");
            return false;
        }

        self.state.daily_pnl += pnl;
        tracing::debug!(%id, %pnl, daily_pnl = %self.state.daily_pnl, "Closed position");
        true
    }

    /// Update peak balance and drawdown
    pub fn update_balance(&mut self, balance: Decimal) {
        self.state.update_balance(balance);
    }

    /// Reset daily counters on a new calendar day
    pub fn roll_day(&mut self, now: DateTime<Utc>) -> bool {
        self.state.roll_day(now)
    }

    /// Open notional across all positions
    pub fn exposure(&self) -> Decimal {
        self.open.values().map(|e| e.notional).sum()
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }
}
