//! Daily counters and drawdown tracking

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;

/// Mutable risk state, owned by one admission controller
#[derive(Debug, Clone)]
pub struct RiskState {
    /// Realized net P&L since the start of the trading day
    pub daily_pnl: Decimal,
    /// Positions opened today
    pub daily_trade_count: u32,
    /// Last entry per symbol, for cooldowns
    pub last_trade_time: HashMap<String, DateTime<Utc>>,
    /// Highest balance seen
    pub peak_balance: Decimal,
    /// `(peak - balance) / peak`
    pub current_drawdown_pct: Decimal,
    /// Calendar day the daily counters belong to
    pub trading_day: NaiveDate,
}

impl RiskState {
    /// Create state for a fresh account
    pub fn new(initial_balance: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            daily_pnl: dec!(0),
            daily_trade_count: 0,
            last_trade_time: HashMap::new(),
            peak_balance: initial_balance,
            current_drawdown_pct: dec!(0),
            trading_day: now.date_naive(),
        }
    }

    /// Ratchet the peak upward and recompute drawdown
    pub fn update_balance(&mut self, balance: Decimal) {
        if balance > self.peak_balance {
            self.peak_balance = balance;
        }

        self.current_drawdown_pct = if self.peak_balance > dec!(0) {
            (self.peak_balance - balance) / self.peak_balance
        } else {
            dec!(0)
        };
    }

    /// Reset daily counters when the calendar day advanced
    ///
    /// Returns true when a reset happened.
    pub fn roll_day(&mut self, now: DateTime<Utc>) -> bool {
        let today = now.date_naive();
        if today <= self.trading_day {
            return false;
        }

        tracing::info!(
            previous_day = %self.trading_day,
            daily_pnl = %self.daily_pnl,
            daily_trades = self.daily_trade_count,
            "Resetting daily risk stats"
        );
        self.daily_pnl = dec!(0);
        self.daily_trade_count = 0;
        self.trading_day = today;
        true
    }
}
