//! Balance recovery on restart
//!
//! Snapshots are periodic, so trades written after the latest snapshot are
//! replayed on top of it. `used` always comes from the open trades.

use crate::persistence::{BalanceSnapshot, TradeRecord, TradeStatus};
use crate::risk::Balance;
use rust_decimal::Decimal;

/// Rebuild the balance from the latest snapshot and the stored trades
///
/// Without a snapshot every trade is replayed on top of `initial`.
pub fn reconcile_balance(snapshot: Option<&BalanceSnapshot>, initial: Decimal, trades: &[TradeRecord]) -> Balance {
    let since = snapshot.map(|s| s.timestamp);
    let after = |at| since.map_or(true, |since| at > since);

    let mut total = snapshot.map_or(initial, |s| s.total);
    let mut used = Decimal::ZERO;
    for trade in trades {
        if after(trade.entry_time) {
            total -= trade.entry_fee;
        }
        match trade.status {
            TradeStatus::Open => used += trade.notional(),
            TradeStatus::Closed => {
                if trade.exit_time.is_some_and(after) {
                    total += trade.settlement();
                }
            }
        }
    }

    Balance::from_parts(total - used, used)
}
