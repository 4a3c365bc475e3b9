//! Backtest simulator engine
//!
//! Drives the live cycle over recorded candles: the clock jumps from one
//! candle close to the next and every jump is one `run_cycle`. Sizing, fees,
//! exits and the preemption auction are therefore exactly what a live run
//! would do. Open positions are closed at the end of the range.

use super::analytics::{calculate_metrics, max_drawdown_pct, BacktestResult, EquityPoint};
use super::replay::{periods_per_year, CandleReplay, Recording};
use super::BacktestConfig;
use crate::clock::ManualClock;
use crate::config::Config;
use crate::execution::PaperEngine;
use crate::orchestrator::CycleOrchestrator;
use crate::persistence::{MemoryStore, PersistenceClient, TradeStatus};
use crate::signal::Classifier;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

/// Runs backtest simulation
pub struct BacktestSimulator {
    config: Config,
    backtest: BacktestConfig,
    classifier: Arc<dyn Classifier>,
}

impl BacktestSimulator {
    /// Create a new simulator; `config` supplies policy, fees and capital
    pub fn new(config: Config, backtest: BacktestConfig, classifier: Arc<dyn Classifier>) -> Self {
        Self {
            config,
            backtest,
            classifier,
        }
    }

    /// Replay `recording` over the configured range
    pub async fn run(&self, recording: Recording) -> anyhow::Result<BacktestResult> {
        let symbols = recording.symbols();
        if symbols.is_empty() {
            anyhow::bail!("recording has no symbols");
        }

        let mut config = self.config.clone();
        config.orchestrator.watchlist = symbols.clone();
        config.feed.timeframe = recording.timeframe.clone();
        config.feed.candle_limit = config.feed.candle_limit.max(self.backtest.warmup);
        // Replayed data never needs a second attempt
        config.feed.retry_attempts = 1;
        let initial = config.orchestrator.initial_balance;

        let clock = Arc::new(ManualClock::new(self.backtest.start));
        let replay = Arc::new(CandleReplay::new(recording, self.backtest.warmup, clock.clone())?);
        let store = Arc::new(MemoryStore::new());
        let mut orchestrator = CycleOrchestrator::new(
            config,
            replay.clone(),
            self.classifier.clone(),
            store.clone(),
            Arc::new(PaperEngine::new()),
            clock.clone(),
        )?;

        let timeline = replay.timeline(self.backtest.start, self.backtest.end);
        tracing::info!(
            symbols = ?symbols,
            start = %self.backtest.start,
            end = %self.backtest.end,
            cycles = timeline.len(),
            "Backtest started"
        );

        let mut equity_curve = Vec::with_capacity(timeline.len() + 1);
        for at in &timeline {
            clock.set(*at);
            let summary = orchestrator.run_cycle().await;
            if !summary.opened.is_empty() || !summary.closed.is_empty() {
                tracing::debug!(at = %at, opened = summary.opened.len(), closed = summary.closed.len(), "Backtest cycle");
            }
            equity_curve.push(EquityPoint {
                timestamp: *at,
                equity: marked_equity(&orchestrator, &replay, *at),
            });
        }

        let last = timeline.last().copied().unwrap_or(self.backtest.start);
        let final_session = orchestrator.end_session().await;
        let still_open = orchestrator.ledger().open_count();
        if still_open > 0 {
            tracing::warn!(still_open, failures = ?final_session.failures, "Positions left open at end of backtest");
        }
        equity_curve.push(EquityPoint {
            timestamp: last,
            equity: marked_equity(&orchestrator, &replay, last),
        });

        let mut trades = store.get_trades(Some(TradeStatus::Closed)).await?;
        trades.sort_by_key(|t| (t.exit_time, t.entry_time));

        let mut summary = calculate_metrics(&trades, initial, periods_per_year(replay.step()));
        let curve: Vec<Decimal> = std::iter::once(initial)
            .chain(equity_curve.iter().map(|p| p.equity))
            .collect();
        summary.curve_drawdown_pct = max_drawdown_pct(&curve);

        tracing::info!(
            trades = summary.total_trades,
            net_pnl = %summary.total_return,
            win_rate = %summary.win_rate,
            sharpe = summary.sharpe_ratio,
            max_drawdown_pct = %summary.max_drawdown_pct,
            "Backtest finished"
        );

        Ok(BacktestResult {
            summary,
            trades,
            equity_curve,
            still_open,
        })
    }
}

/// Balance plus unrealized P&L of open positions at the last closes
fn marked_equity(orchestrator: &CycleOrchestrator, replay: &CandleReplay, at: DateTime<Utc>) -> Decimal {
    let unrealized: Decimal = orchestrator
        .ledger()
        .positions()
        .into_iter()
        .filter_map(|p| replay.price_at(&p.symbol, at).map(|price| p.gross_pnl(price)))
        .sum();
    orchestrator.balance().total + unrealized
}
