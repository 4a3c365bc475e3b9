//! Trading fee model
//!
//! Pure fee arithmetic for margin/spot trades:
//! - Entry: taker fee, margin opening fee and simulated slippage
//! - Exit: taker fee
//! - Holding: rollover fee charged once per elapsed rollover interval

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Fee schedule
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FeeConfig {
    /// Taker fee rate applied on entry and exit
    pub taker_rate: Decimal,
    /// Margin opening fee rate
    pub margin_open_rate: Decimal,
    /// Rollover fee rate per interval
    pub margin_rollover_rate: Decimal,
    /// Hours between rollover charges
    pub rollover_interval_hours: u32,
    /// Simulated slippage rate on entry
    pub slippage_rate: Decimal,
    /// Whether trades are opened on margin
    pub is_margin: bool,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            taker_rate: dec!(0.001),
            margin_open_rate: dec!(0.0002),
            margin_rollover_rate: dec!(0.0002),
            rollover_interval_hours: 4,
            slippage_rate: dec!(0.0005),
            is_margin: true,
        }
    }
}

/// Fees charged when opening a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryFees {
    pub trading_fee: Decimal,
    pub margin_fee: Decimal,
    pub slippage: Decimal,
    pub total: Decimal,
}

/// Fees over a full trade lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TradeFees {
    pub entry_fee: Decimal,
    pub exit_fee: Decimal,
    pub holding_fee: Decimal,
    pub total_fees: Decimal,
}

/// Stateless fee calculator
#[derive(Debug, Clone, Default)]
pub struct FeeModel {
    config: FeeConfig,
}

impl FeeModel {
    /// Create a fee model from a fee schedule
    pub fn new(config: FeeConfig) -> Self {
        Self { config }
    }

    /// Fee schedule in use
    pub fn config(&self) -> &FeeConfig {
        &self.config
    }

    /// Whether positions are opened on margin
    pub fn is_margin(&self) -> bool {
        self.config.is_margin
    }

    /// Fees for opening a position of the given notional
    pub fn entry_fees(&self, notional: Decimal, is_margin: bool) -> EntryFees {
        let trading_fee = notional * self.config.taker_rate;
        let margin_fee = if is_margin {
            notional * self.config.margin_open_rate
        } else {
            Decimal::ZERO
        };
        let slippage = notional * self.config.slippage_rate;

        EntryFees {
            trading_fee,
            margin_fee,
            slippage,
            total: trading_fee + margin_fee + slippage,
        }
    }

    /// Fee for closing a position of the given notional
    pub fn exit_fees(&self, notional: Decimal) -> Decimal {
        notional * self.config.taker_rate
    }

    /// Rollover fees accumulated between `opened_at` and `closed_at`
    ///
    /// One charge per fully elapsed interval; the first interval is free.
    pub fn holding_fees(
        &self,
        notional: Decimal,
        opened_at: DateTime<Utc>,
        closed_at: DateTime<Utc>,
    ) -> Decimal {
        if self.config.rollover_interval_hours == 0 || closed_at <= opened_at {
            return Decimal::ZERO;
        }

        let elapsed_secs = (closed_at - opened_at).num_seconds();
        let interval_secs = i64::from(self.config.rollover_interval_hours) * 3600;
        let periods = Decimal::from(elapsed_secs / interval_secs);

        notional * self.config.margin_rollover_rate * periods
    }

    /// Entry, exit and holding fees for a complete trade
    pub fn all_fees_for_trade(
        &self,
        entry_price: Decimal,
        exit_price: Decimal,
        amount: Decimal,
        opened_at: DateTime<Utc>,
        closed_at: DateTime<Utc>,
        is_margin: bool,
    ) -> TradeFees {
        let entry_value = entry_price * amount;
        let exit_value = exit_price * amount;

        let entry_fee = self.entry_fees(entry_value, is_margin).total;
        let exit_fee = self.exit_fees(exit_value);
        let holding_fee = self.holding_fees(entry_value, opened_at, closed_at);

        TradeFees {
            entry_fee,
            exit_fee,
            holding_fee,
            total_fees: entry_fee + exit_fee + holding_fee,
        }
    }
}
