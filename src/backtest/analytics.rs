//! Backtest analytics and reporting

use crate::persistence::TradeRecord;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

/// Annual risk-free rate subtracted in Sharpe and Sortino
const RISK_FREE_RATE: f64 = 0.02;

/// Downside deviation assumed when no return was negative
const DEFAULT_DOWNSIDE_STD: f64 = 0.01;

/// Summary statistics from a backtest
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BacktestSummary {
    pub initial_capital: Decimal,
    /// Initial capital plus realized net P&L
    pub final_equity: Decimal,
    /// Net P&L after fees
    pub total_return: Decimal,
    pub total_return_pct: Decimal,
    pub total_trades: usize,
    pub winning_trades: usize,
    /// Trades with net P&L at or below zero
    pub losing_trades: usize,
    /// Fraction of winning trades, 0 to 1
    pub win_rate: Decimal,
    /// Gross profit over gross loss; `None` when nothing was lost
    pub profit_factor: Option<Decimal>,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    /// Largest peak-to-trough fall of trade-by-trade equity, in percent
    pub max_drawdown_pct: Decimal,
    /// Same measure over the bar-by-bar marked equity curve
    pub curve_drawdown_pct: Decimal,
    pub avg_trade_pnl: Decimal,
    pub avg_win: Decimal,
    /// Mean loss as a positive amount
    pub avg_loss: Decimal,
    pub expectancy: Decimal,
    pub avg_duration_hours: f64,
    pub total_fees: Decimal,
}

/// Marked-to-market equity after one replayed cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: Decimal,
}

/// Complete backtest results
#[derive(Debug, Clone, Serialize)]
pub struct BacktestResult {
    pub summary: BacktestSummary,
    /// Closed trades ordered by exit time
    pub trades: Vec<TradeRecord>,
    pub equity_curve: Vec<EquityPoint>,
    /// Positions the final session could not close
    pub still_open: usize,
}

/// Trade statistics over closed trades
///
/// `periods_per_year` annualizes the per-trade returns for Sharpe and
/// Sortino.
pub fn calculate_metrics(trades: &[TradeRecord], initial_capital: Decimal, periods_per_year: f64) -> BacktestSummary {
    let mut summary = BacktestSummary {
        initial_capital,
        final_equity: initial_capital,
        ..Default::default()
    };
    if trades.is_empty() {
        return summary;
    }

    let count = Decimal::from(trades.len());
    let total: Decimal = trades.iter().map(|t| t.net_pnl).sum();
    let wins: Vec<Decimal> = trades.iter().map(|t| t.net_pnl).filter(|p| *p > Decimal::ZERO).collect();
    let losses: Vec<Decimal> = trades.iter().map(|t| t.net_pnl).filter(|p| *p <= Decimal::ZERO).collect();

    let win_rate = Decimal::from(wins.len()) / count;
    let gross_profit: Decimal = wins.iter().sum();
    let gross_loss: Decimal = losses.iter().sum::<Decimal>().abs();
    let avg_win = mean(&wins);
    let avg_loss = mean(&losses).abs();

    let mut equity = Vec::with_capacity(trades.len() + 1);
    equity.push(initial_capital);
    let mut running = initial_capital;
    for trade in trades {
        running += trade.net_pnl;
        equity.push(running);
    }
    let returns = pct_changes(&equity);

    let durations: Vec<f64> = trades
        .iter()
        .filter_map(|t| t.exit_time.map(|exit| (exit - t.entry_time).num_seconds() as f64 / 3600.0))
        .collect();

    summary.final_equity = running;
    summary.total_return = total;
    if !initial_capital.is_zero() {
        summary.total_return_pct = total / initial_capital * dec!(100);
    }
    summary.total_trades = trades.len();
    summary.winning_trades = wins.len();
    summary.losing_trades = losses.len();
    summary.win_rate = win_rate;
    summary.profit_factor = (!gross_loss.is_zero()).then(|| gross_profit / gross_loss);
    summary.sharpe_ratio = sharpe(&returns, periods_per_year);
    summary.sortino_ratio = sortino(&returns, periods_per_year);
    summary.max_drawdown_pct = max_drawdown_pct(&equity);
    summary.avg_trade_pnl = total / count;
    summary.avg_win = avg_win;
    summary.avg_loss = avg_loss;
    summary.expectancy = win_rate * avg_win - (Decimal::ONE - win_rate) * avg_loss;
    summary.avg_duration_hours = if durations.is_empty() {
        0.0
    } else {
        durations.iter().sum::<f64>() / durations.len() as f64
    };
    summary.total_fees = trades.iter().map(|t| t.total_fees).sum();
    summary
}

/// Largest fall from a running peak, in percent of that peak
pub fn max_drawdown_pct(equity: &[Decimal]) -> Decimal {
    let mut peak = Decimal::MIN;
    let mut worst = Decimal::ZERO;
    for value in equity {
        peak = peak.max(*value);
        if peak > Decimal::ZERO {
            worst = worst.max((peak - value) / peak);
        }
    }
    worst * dec!(100)
}

fn mean(values: &[Decimal]) -> Decimal {
    if values.is_empty() {
        return Decimal::ZERO;
    }
    values.iter().sum::<Decimal>() / Decimal::from(values.len())
}

fn pct_changes(equity: &[Decimal]) -> Vec<f64> {
    equity
        .windows(2)
        .filter(|w| !w[0].is_zero())
        .filter_map(|w| ((w[1] - w[0]) / w[0]).to_f64())
        .collect()
}

/// Sample standard deviation; needs two values
fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(variance.sqrt())
}

fn annualized_excess(returns: &[f64], periods_per_year: f64) -> f64 {
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    mean * periods_per_year - RISK_FREE_RATE
}

fn sharpe(returns: &[f64], periods_per_year: f64) -> f64 {
    match sample_std(returns) {
        Some(std) if std > 0.0 => annualized_excess(returns, periods_per_year) / (std * periods_per_year.sqrt()),
        _ => 0.0,
    }
}

fn sortino(returns: &[f64], periods_per_year: f64) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    let downside_std = if downside.is_empty() {
        Some(DEFAULT_DOWNSIDE_STD)
    } else {
        sample_std(&downside)
    };
    match downside_std {
        Some(std) if std > 0.0 => annualized_excess(returns, periods_per_year) / (std * periods_per_year.sqrt()),
        _ => 0.0,
    }
}

impl BacktestSummary {
    /// Format as table for CLI output
    pub fn format_table(&self) -> String {
        let profit_factor = match self.profit_factor {
            Some(pf) => format!("{pf:.2}"),
            None => "inf".to_string(),
        };
        format!(
            r#"
══════════════════════════════════════════════════════
               BACKTEST RESULTS
══════════════════════════════════════════════════════

PERFORMANCE
───────────────────────────────────────────────────────
Initial Capital:  {:.2}
Final Equity:     {:.2}
Net P&L:          {:+.2} ({:+.2}%)
Sharpe Ratio:     {:.2}
Sortino Ratio:    {:.2}
Max Drawdown:     {:.2}% (marked: {:.2}%)
Win Rate:         {:.1}%
Profit Factor:    {}
Expectancy:       {:+.2}

ACTIVITY
───────────────────────────────────────────────────────
Total Trades:     {} ({} won, {} lost)
Avg Trade:        {:+.2}
Avg Win / Loss:   {:.2} / {:.2}
Avg Duration:     {:.1}h
Total Fees:       {:.2}
══════════════════════════════════════════════════════
"#,
            self.initial_capital,
            self.final_equity,
            self.total_return,
            self.total_return_pct,
            self.sharpe_ratio,
            self.sortino_ratio,
            self.max_drawdown_pct,
            self.curve_drawdown_pct,
            self.win_rate * dec!(100),
            profit_factor,
            self.expectancy,
            self.total_trades,
            self.winning_trades,
            self.losing_trades,
            self.avg_trade_pnl,
            self.avg_win,
            self.avg_loss,
            self.avg_duration_hours,
            self.total_fees,
        )
    }
}
