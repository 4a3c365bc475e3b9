//! Kelly criterion bet fraction from trade history

use super::ClosedPosition;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Half-Kelly estimator over realized trade outcomes
///
/// `f* = (p*W - (1-p)*L) / W` where p is the win rate, W the average win and
/// L the average loss (absolute). The result is halved and capped.
#[derive(Debug, Clone)]
pub struct KellyEstimator {
    /// Upper bound on the returned fraction
    pub cap: Decimal,
    /// Fewer trades than this yields no estimate
    pub min_trades: usize,
    /// Most recent trades considered
    pub lookback: usize,
}

impl KellyEstimator {
    /// Create an estimator with the given cap
    pub fn new(cap: Decimal) -> Self {
        Self {
            cap,
            min_trades: 10,
            lookback: 50,
        }
    }

    /// Bet fraction for a series of net P&Ls, most recent first
    ///
    /// `None` when there is too little history or no positive edge.
    pub fn fraction(&self, pnls: &[Decimal]) -> Option<Decimal> {
        let pnls = &pnls[..pnls.len().min(self.lookback)];
        if pnls.len() < self.min_trades {
            return None;
        }

        let (wins, losses): (Vec<Decimal>, Vec<Decimal>) = pnls.iter().partition(|p| **p > dec!(0));
        if wins.is_empty() || losses.is_empty() {
            return None;
        }

        let p = Decimal::from(wins.len()) / Decimal::from(pnls.len());
        let avg_win = wins.iter().copied().sum::<Decimal>() / Decimal::from(wins.len());
        let avg_loss = (losses.iter().copied().sum::<Decimal>() / Decimal::from(losses.len())).abs();
        if avg_win <= dec!(0) || avg_loss <= dec!(0) {
            return None;
        }

        let numerator = p * avg_win - (Decimal::ONE - p) * avg_loss;
        if numerator <= dec!(0) {
            return None;
        }

        let half = numerator / avg_win / dec!(2);
        Some(half.min(self.cap))
    }

    /// Bet fraction for `symbol` from closed positions, newest last in `history`
    pub fn from_history(&self, history: &[ClosedPosition], symbol: &str) -> Option<Decimal> {
        let pnls: Vec<Decimal> = history
            .iter()
            .rev()
            .filter(|c| c.position.symbol == symbol)
            .map(|c| c.net_pnl)
            .collect();

        let fraction = self.fraction(&pnls);
        if let Some(f) = fraction {
            tracing::debug!(symbol, trades = pnls.len(), fraction = %f, "Kelly estimate");
        }
        fraction
    }
}

impl Default for KellyEstimator {
    fn default() -> Self {
        Self::new(dec!(0.25))
    }
}
