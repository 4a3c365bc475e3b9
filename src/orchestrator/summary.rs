//! Per-cycle outcome report

use crate::risk::{Balance, CloseReason};
use crate::signal::Side;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ClosureReport {
    pub symbol: String,
    pub side: Side,
    pub reason: CloseReason,
    pub exit_price: Decimal,
    pub net_pnl: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpeningReport {
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    pub amount: Decimal,
    pub notional: Decimal,
    pub confidence: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct SwapReport {
    /// Holding closed to fund the opportunity
    pub closed: String,
    pub opened: Option<String>,
    pub score_gap: Decimal,
}

/// Opportunity not taken, with the reason
#[derive(Debug, Clone, Serialize)]
pub struct SkipReport {
    pub symbol: String,
    pub reason: String,
}

/// What one `run_cycle` did
#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub started_at: DateTime<Utc>,
    /// Set when the daily gate blocked trading
    pub halted: Option<String>,
    /// Whether exit checks ran
    pub exits_evaluated: bool,
    pub analyzed: Vec<String>,
    /// Symbols skipped this cycle, with the fetch error
    pub failures: Vec<(String, String)>,
    pub closed: Vec<ClosureReport>,
    pub opened: Vec<OpeningReport>,
    pub swaps: Vec<SwapReport>,
    pub skipped: Vec<SkipReport>,
    /// Execution and bookkeeping errors that did not stop the cycle
    pub errors: Vec<String>,
    pub balance: Balance,
}

impl CycleSummary {
    pub fn new(started_at: DateTime<Utc>, balance: Balance) -> Self {
        Self {
            started_at,
            halted: None,
            exits_evaluated: false,
            analyzed: vec![],
            failures: vec![],
            closed: vec![],
            opened: vec![],
            swaps: vec![],
            skipped: vec![],
            errors: vec![],
            balance,
        }
    }

    /// Closures with the given reason
    pub fn closed_with(&self, reason: CloseReason) -> impl Iterator<Item = &ClosureReport> {
        self.closed.iter().filter(move |c| c.reason == reason)
    }

    /// Net P&L realized this cycle
    pub fn realized_pnl(&self) -> Decimal {
        self.closed.iter().map(|c| c.net_pnl).sum()
    }
}
