//! Position tracking
//!
//! The ledger owns open positions and their exit rules. Each evaluation pass
//! updates the peak price first, then checks exits in precedence order:
//! trailing stop, hard stop-loss, take-profit.

use super::AdmissionController;
use crate::fees::{FeeModel, TradeFees};
use crate::signal::Side;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    TrailingStop,
    SignalReversal,
    ArbitrageSwap,
    EndOfSession,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::StopLoss => "STOP_LOSS",
            CloseReason::TakeProfit => "TAKE_PROFIT",
            CloseReason::TrailingStop => "TRAILING_STOP",
            CloseReason::SignalReversal => "SIGNAL_REVERSAL",
            CloseReason::ArbitrageSwap => "ARBITRAGE_SWAP",
            CloseReason::EndOfSession => "END_OF_SESSION",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An open position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Position identifier
    pub id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub entry_price: Decimal,
    /// Size in base units
    pub amount: Decimal,
    pub entry_time: DateTime<Utc>,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    /// Highest price seen for longs, lowest for shorts
    pub peak_price: Decimal,
    /// Total fee paid on entry
    pub entry_fee: Decimal,
}

impl Position {
    /// Capital committed at entry
    pub fn notional(&self) -> Decimal {
        self.entry_price * self.amount
    }

    /// P&L before fees if closed at `price`
    pub fn gross_pnl(&self, price: Decimal) -> Decimal {
        match self.side {
            Side::Long => (price - self.entry_price) * self.amount,
            Side::Short => (self.entry_price - price) * self.amount,
        }
    }

    /// Track the most favorable price seen
    pub fn update_peak(&mut self, price: Decimal) {
        match self.side {
            Side::Long if price > self.peak_price => self.peak_price = price,
            Side::Short if price < self.peak_price => self.peak_price = price,
            _ => {}
        }
    }

    fn stop_hit(&self, price: Decimal) -> bool {
        match self.side {
            Side::Long => price <= self.stop_loss,
            Side::Short => price >= self.stop_loss,
        }
    }

    fn target_hit(&self, price: Decimal) -> bool {
        match self.side {
            Side::Long => price >= self.take_profit,
            Side::Short => price <= self.take_profit,
        }
    }
}

/// A closed position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedPosition {
    /// Original position
    pub position: Position,
    pub exit_price: Decimal,
    pub exit_time: DateTime<Utc>,
    pub reason: CloseReason,
    pub fees: TradeFees,
    pub gross_pnl: Decimal,
    /// Gross P&L minus all fees
    pub net_pnl: Decimal,
}

impl ClosedPosition {
    /// Amount returned to free balance on top of the released notional
    pub fn settlement(&self) -> Decimal {
        self.gross_pnl - self.fees.exit_fee - self.fees.holding_fee
    }
}

/// A triggered exit found by [`PositionLedger::evaluate`]
#[derive(Debug, Clone, PartialEq)]
pub struct ExitDecision {
    pub id: Uuid,
    pub symbol: String,
    pub reason: CloseReason,
    pub price: Decimal,
}

/// A stop moved by the pyramiding ratchet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopRatchet {
    pub id: Uuid,
    pub old_stop: Decimal,
    pub new_stop: Decimal,
}

/// Closed positions kept per symbol unless configured otherwise
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Tracks all positions
///
/// Closed history is bounded per symbol; the oldest entries of a symbol are
/// dropped first.
#[derive(Debug)]
pub struct PositionLedger {
    open_positions: HashMap<Uuid, Position>,
    closed_positions: Vec<ClosedPosition>,
    history_limit: usize,
}

impl Default for PositionLedger {
    fn default() -> Self {
        Self {
            open_positions: HashMap::new(),
            closed_positions: vec![],
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `limit` closed positions per symbol (minimum 1)
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    /// Add a new position, ratcheting same-direction stops to break-even
    ///
    /// A stop only ever moves toward profit; stops already past break-even
    /// are left alone.
    pub fn open(&mut self, position: Position) -> Vec<StopRatchet> {
        let mut ratchets = vec![];

        for existing in self
            .open_positions
            .values_mut()
            .filter(|p| p.symbol == position.symbol && p.side == position.side)
        {
            let new_stop = match existing.side {
                Side::Long => existing.stop_loss.max(existing.entry_price),
                Side::Short => existing.stop_loss.min(existing.entry_price),
            };
            if new_stop != existing.stop_loss {
                ratchets.push(StopRatchet {
                    id: existing.id,
                    old_stop: existing.stop_loss,
                    new_stop,
                });
                existing.stop_loss = new_stop;
            }
        }

        for r in &ratchets {
            tracing::info!(id = %r.id, symbol = %position.symbol, old_stop = %r.old_stop, new_stop = %r.new_stop, "Stop ratcheted to break-even");
        }

        self.open_positions.insert(position.id, position);
        ratchets
    }

    /// Re-insert a position loaded from storage
    pub fn restore(&mut self, position: Position) {
        self.open_positions.insert(position.id, position);
    }

    /// Seed closed history loaded from storage, oldest first
    ///
    /// Only the newest `history_limit` entries of each symbol are kept.
    pub fn restore_history(&mut self, closed: Vec<ClosedPosition>) {
        let mut kept: HashMap<String, usize> = HashMap::new();
        let mut history: Vec<ClosedPosition> = closed
            .into_iter()
            .rev()
            .filter(|c| {
                let count = kept.entry(c.position.symbol.clone()).or_default();
                *count += 1;
                *count <= self.history_limit
            })
            .collect();
        history.reverse();
        self.closed_positions = history;
    }

    fn push_history(&mut self, closed: ClosedPosition) {
        let symbol = closed.position.symbol.clone();
        self.closed_positions.push(closed);

        let count = self.closed_positions.iter().filter(|c| c.position.symbol == symbol).count();
        if count > self.history_limit {
            if let Some(oldest) = self.closed_positions.iter().position(|c| c.position.symbol == symbol) {
                self.closed_positions.remove(oldest);
            }
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<&Position> {
        self.open_positions.get(id)
    }

    /// Open positions, oldest first
    pub fn positions(&self) -> Vec<&Position> {
        let mut positions: Vec<&Position> = self.open_positions.values().collect();
        positions.sort_by(|a, b| a.entry_time.cmp(&b.entry_time).then(a.id.cmp(&b.id)));
        positions
    }

    /// Symbols with at least one open position
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.open_positions.values().map(|p| p.symbol.clone()).collect();
        symbols.sort();
        symbols.dedup();
        symbols
    }

    pub fn open_count(&self) -> usize {
        self.open_positions.len()
    }

    /// Closed position history, oldest first
    pub fn history(&self) -> &[ClosedPosition] {
        &self.closed_positions
    }

    /// Update peaks and collect triggered exits
    ///
    /// Positions without a price in `prices` are skipped.
    pub fn evaluate(
        &mut self,
        prices: &HashMap<String, Decimal>,
        admission: &AdmissionController,
    ) -> Vec<ExitDecision> {
        let mut ids: Vec<(DateTime<Utc>, Uuid)> =
            self.open_positions.values().map(|p| (p.entry_time, p.id)).collect();
        ids.sort();

        let mut exits = vec![];
        for (_, id) in ids {
            let Some(position) = self.open_positions.get_mut(&id) else {
                continue;
            };
            let Some(&price) = prices.get(&position.symbol) else {
                continue;
            };

            position.update_peak(price);

            let trail = admission.trailing_stop(position.entry_price, price, position.peak_price, position.side);
            let reason = if trail.should_close {
                Some(CloseReason::TrailingStop)
            } else if position.stop_hit(price) {
                Some(CloseReason::StopLoss)
            } else if position.target_hit(price) {
                Some(CloseReason::TakeProfit)
            } else {
                None
            };

            if let Some(reason) = reason {
                tracing::debug!(%id, symbol = %position.symbol, %price, trail = ?trail.trail_price, %reason, "Exit triggered");
                exits.push(ExitDecision {
                    id,
                    symbol: position.symbol.clone(),
                    reason,
                    price,
                });
            }
        }

        exits
    }

    /// Close a position, applying the fee model
    pub fn close(
        &mut self,
        id: Uuid,
        exit_price: Decimal,
        exit_time: DateTime<Utc>,
        reason: CloseReason,
        fee_model: &FeeModel,
    ) -> Option<ClosedPosition> {
        let position = self.open_positions.remove(&id)?;

        let exit_fee = fee_model.exit_fees(exit_price * position.amount);
        let holding_fee = fee_model.holding_fees(position.notional(), position.entry_time, exit_time);
        let fees = TradeFees {
            entry_fee: position.entry_fee,
            exit_fee,
            holding_fee,
            total_fees: position.entry_fee + exit_fee + holding_fee,
        };
        let gross_pnl = position.gross_pnl(exit_price);

        let closed = ClosedPosition {
            exit_price,
            exit_time,
            reason,
            fees,
            gross_pnl,
            net_pnl: gross_pnl - fees.total_fees,
            position,
        };

        self.push_history(closed.clone());
        Some(closed)
    }
}
