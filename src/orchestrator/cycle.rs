//! The trading cycle
//!
//! One `run_cycle` call is one tick:
//! 1. Daily rollover
//! 2. Global admission gate
//! 3. Concurrent fetch and score of watchlist and held symbols
//! 4. Hard exits (trailing, stop, target)
//! 5. Signal reversals
//! 6. Entry auction with preemption of the weakest holding
//! 7. Heartbeat, balance snapshot and metrics
//!
//! All state mutation happens on this single control path after the
//! fan-out has been joined.

use super::analysis::{analyze_batch, BatchAnalysis, SymbolAnalysis};
use super::recovery::reconcile_balance;
use super::summary::{ClosureReport, CycleSummary, OpeningReport, SkipReport, SwapReport};
use crate::clock::Clock;
use crate::config::{Config, ConfigError};
use crate::execution::{ExecutionEngine, Order};
use crate::feed::MarketDataClient;
use crate::fees::{EntryFees, FeeModel};
use crate::notify::{AutoLearner, Event, Notifier};
use crate::persistence::{PersistenceClient, TradeRecord, TradeStatus};
use crate::risk::{
    AdmissionController, Balance, CloseReason, KellyEstimator, Position, PositionLedger, Rejection, Sizing,
    SizingRequest,
};
use crate::signal::{Action, Classifier, Side};
use crate::telemetry::{increment, set_gauge, CounterMetric, GaugeMetric};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

/// A sized, affordable entry
struct Prepared {
    side: Side,
    sizing: Sizing,
    fees: EntryFees,
}

/// An open position with a fresh score, candidate for preemption
#[derive(Debug, Clone)]
struct Holding {
    id: Uuid,
    symbol: String,
    score: Decimal,
}

/// Cyclic capital allocator
pub struct CycleOrchestrator {
    config: Config,
    fee_model: FeeModel,
    admission: AdmissionController,
    ledger: PositionLedger,
    balance: Balance,
    kelly: KellyEstimator,
    market_data: Arc<dyn MarketDataClient>,
    classifier: Arc<dyn Classifier>,
    store: Arc<dyn PersistenceClient>,
    engine: Arc<dyn ExecutionEngine>,
    clock: Arc<dyn Clock>,
    notifier: Option<Arc<dyn Notifier>>,
    learner: Option<Arc<dyn AutoLearner>>,
    last_snapshot: Option<DateTime<Utc>>,
    halt_notified: Option<NaiveDate>,
}

impl CycleOrchestrator {
    /// Build an orchestrator; refuses invalid policy
    pub fn new(
        config: Config,
        market_data: Arc<dyn MarketDataClient>,
        classifier: Arc<dyn Classifier>,
        store: Arc<dyn PersistenceClient>,
        engine: Arc<dyn ExecutionEngine>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let now = clock.now();
        let initial = config.orchestrator.initial_balance;
        let kelly = KellyEstimator::new(config.risk.kelly_fraction_cap);
        Ok(Self {
            fee_model: FeeModel::new(config.fees.clone()),
            admission: AdmissionController::new(config.risk.clone(), initial, now),
            // Kelly never looks further back than this
            ledger: PositionLedger::new().with_history_limit(kelly.lookback),
            balance: Balance::new(initial),
            kelly,
            config,
            market_data,
            classifier,
            store,
            engine,
            clock,
            notifier: None,
            learner: None,
            last_snapshot: None,
            halt_notified: None,
        })
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_learner(mut self, learner: Arc<dyn AutoLearner>) -> Self {
        self.learner = Some(learner);
        self
    }

    pub fn balance(&self) -> Balance {
        self.balance
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    /// Restore balance, open positions, history and cooldowns from the store
    ///
    /// The balance is the latest snapshot with trades stored after it
    /// replayed on top, and `used` is always the sum of the restored open
    /// positions. Storage failures are logged; without a snapshot trades are
    /// replayed from the configured initial balance.
    pub async fn initialize(&mut self) {
        let now = self.clock.now();

        let snapshot = match self.store.get_latest_balance().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load balance snapshot, replaying trades from initial balance");
                None
            }
        };
        let trades = match self.store.get_trades(None).await {
            Ok(trades) => trades,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load trades");
                vec![]
            }
        };

        let initial = self.config.orchestrator.initial_balance;
        self.balance = reconcile_balance(snapshot.as_ref(), initial, &trades);
        if self.balance.free < Decimal::ZERO {
            tracing::warn!(free = %self.balance.free, used = %self.balance.used, "Restored open positions exceed total balance");
        }
        tracing::info!(
            total = %self.balance.total,
            free = %self.balance.free,
            used = %self.balance.used,
            snapshot_at = ?snapshot.map(|s| s.timestamp),
            "Balance restored"
        );
        self.admission = AdmissionController::new(self.config.risk.clone(), self.balance.total, now);

        let today = now.date_naive();
        let mut daily_pnl = Decimal::ZERO;
        let mut daily_trades = 0u32;
        let mut history = vec![];
        for record in &trades {
            if record.entry_time.date_naive() == today {
                daily_trades += 1;
            }

            match record.status {
                TradeStatus::Open => {
                    let position = record.to_position();
                    self.admission.restore(position.id, &position.symbol, position.notional());
                    self.ledger.restore(position);
                }
                TradeStatus::Closed => {
                    if let Some(closed) = record.to_closed() {
                        if closed.exit_time.date_naive() == today {
                            daily_pnl += closed.net_pnl;
                        }
                        history.push(closed);
                    }
                }
            }
        }
        history.sort_by_key(|c| c.exit_time);
        self.ledger.restore_history(history);
        self.admission.restore_daily(daily_pnl, daily_trades);

        let cooldown = self.config.risk.cooldown_minutes;
        if let Err(e) = self.store.clear_expired_cooldowns(cooldown, now).await {
            tracing::warn!(error = %e, "Failed to clear expired cooldowns");
        }
        match self.store.get_cooldowns().await {
            Ok(cooldowns) => {
                for (symbol, at) in &cooldowns {
                    self.admission.restore_cooldown(symbol, *at);
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to load cooldowns"),
        }

        tracing::info!(
            open_positions = self.ledger.open_count(),
            closed_history = self.ledger.history().len(),
            daily_pnl = %daily_pnl,
            daily_trades,
            "Orchestrator initialized"
        );
        self.publish_metrics();
    }

    /// Run one cycle; never fails, problems are reported in the summary
    pub async fn run_cycle(&mut self) -> CycleSummary {
        let now = self.clock.now();
        let mut summary = CycleSummary::new(now, self.balance);
        increment(CounterMetric::Cycles, 1);

        if self.admission.roll_day(now) {
            self.run_learner(now).await;
        }

        if let Some(halt) = self.admission.trading_halt(self.balance.total) {
            summary.halted = Some(halt.to_string());
            increment(CounterMetric::HaltedCycles, 1);
            if self.halt_notified != Some(now.date_naive()) {
                self.halt_notified = Some(now.date_naive());
                self.notify(Event::Halted {
                    reason: halt.to_string(),
                })
                .await;
            }

            if self.config.orchestrator.halt_also_freezes_exits {
                tracing::warn!(reason = %halt, "Trading halted, skipping cycle");
                self.bookkeeping(now, &mut summary).await;
                return summary;
            }
            tracing::warn!(reason = %halt, "Trading halted, managing exits only");
        }

        let symbols = self.symbols();
        let batch = analyze_batch(
            self.market_data.as_ref(),
            self.classifier.as_ref(),
            &symbols,
            &self.config.feed,
        )
        .await;
        summary.analyzed = batch.analyses.keys().cloned().collect();
        summary.failures = batch
            .failures
            .iter()
            .map(|f| (f.symbol.clone(), f.error.to_string()))
            .collect();
        increment(CounterMetric::SymbolFailures, batch.failures.len() as u64);

        self.hard_exits(&batch, now, &mut summary).await;
        self.signal_reversals(&batch, now, &mut summary).await;
        summary.exits_evaluated = true;

        if summary.halted.is_none() {
            self.auction(&batch, now, &mut summary).await;
        }

        self.bookkeeping(now, &mut summary).await;
        summary
    }

    /// Close every open position at a fresh quote
    ///
    /// Positions whose symbol cannot be priced or released stay open and are
    /// reported in the summary.
    pub async fn end_session(&mut self) -> CycleSummary {
        let now = self.clock.now();
        let mut summary = CycleSummary::new(now, self.balance);

        let held = self.ledger.symbols();
        let batch = analyze_batch(
            self.market_data.as_ref(),
            self.classifier.as_ref(),
            &held,
            &self.config.feed,
        )
        .await;
        summary.analyzed = batch.analyses.keys().cloned().collect();
        summary.failures = batch
            .failures
            .iter()
            .map(|f| (f.symbol.clone(), f.error.to_string()))
            .collect();
        summary.exits_evaluated = true;

        let exits: Vec<(Uuid, Decimal)> = self
            .ledger
            .positions()
            .into_iter()
            .filter_map(|p| batch.get(&p.symbol).map(|a| (p.id, a.price)))
            .collect();
        for (id, price) in exits {
            self.close_position(id, price, CloseReason::EndOfSession, now, &mut summary)
                .await;
        }

        self.bookkeeping(now, &mut summary).await;
        summary
    }

    /// Watchlist plus held symbols, sorted
    fn symbols(&self) -> Vec<String> {
        let mut symbols: BTreeSet<String> = self.config.orchestrator.watchlist.iter().cloned().collect();
        symbols.extend(self.ledger.symbols());
        symbols.into_iter().collect()
    }

    async fn hard_exits(&mut self, batch: &BatchAnalysis, now: DateTime<Utc>, summary: &mut CycleSummary) {
        let exits = self.ledger.evaluate(&batch.prices(), &self.admission);
        for exit in exits {
            self.close_position(exit.id, exit.price, exit.reason, now, summary).await;
        }
    }

    async fn signal_reversals(&mut self, batch: &BatchAnalysis, now: DateTime<Utc>, summary: &mut CycleSummary) {
        let reversals: Vec<(Uuid, Decimal)> = self
            .ledger
            .positions()
            .into_iter()
            .filter_map(|p| {
                let analysis = batch.get(&p.symbol)?;
                analysis
                    .signal
                    .action
                    .opposes(p.side)
                    .then_some((p.id, analysis.price))
            })
            .collect();

        for (id, price) in reversals {
            self.close_position(id, price, CloseReason::SignalReversal, now, summary).await;
        }
    }

    async fn auction(&mut self, batch: &BatchAnalysis, now: DateTime<Utc>, summary: &mut CycleSummary) {
        let mut opportunities: Vec<&SymbolAnalysis> = batch
            .analyses
            .values()
            .filter(|a| match a.signal.action {
                Action::Buy => true,
                Action::Sell => self.config.orchestrator.allow_short,
                Action::Hold => false,
            })
            .collect();
        opportunities.sort_by(|a, b| {
            b.signal
                .confidence
                .cmp(&a.signal.confidence)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });

        let mut holdings: Vec<Holding> = self
            .ledger
            .positions()
            .into_iter()
            .filter_map(|p| {
                batch.get(&p.symbol).map(|a| Holding {
                    id: p.id,
                    symbol: p.symbol.clone(),
                    score: a.signal.confidence,
                })
            })
            .collect();
        holdings.sort_by(|a, b| a.score.cmp(&b.score));

        for opportunity in opportunities {
            let symbol = opportunity.symbol.as_str();
            let rejection = match self.prepare_entry(opportunity, now) {
                Ok(prepared) => {
                    self.open_position(opportunity, prepared, now, summary).await;
                    continue;
                }
                Err(rejection) => rejection,
            };

            if !rejection.is_capacity() {
                tracing::debug!(symbol, reason = %rejection, "Opportunity skipped");
                summary.skipped.push(SkipReport {
                    symbol: symbol.to_string(),
                    reason: rejection.to_string(),
                });
                continue;
            }

            let Some(index) = holdings.iter().position(|h| h.symbol != symbol) else {
                summary.skipped.push(SkipReport {
                    symbol: symbol.to_string(),
                    reason: rejection.to_string(),
                });
                continue;
            };

            let gap = opportunity.signal.confidence - holdings[index].score;
            if gap <= self.config.orchestrator.swap_threshold {
                tracing::debug!(symbol, weakest = %holdings[index].symbol, %gap, "Score gap below swap threshold");
                summary.skipped.push(SkipReport {
                    symbol: symbol.to_string(),
                    reason: format!("{rejection}; swap gap {gap} below threshold"),
                });
                continue;
            }

            let weakest = holdings.remove(index);
            tracing::info!(
                opportunity = symbol,
                weakest = %weakest.symbol,
                %gap,
                "Preempting weakest holding"
            );

            let Some(price) = batch.get(&weakest.symbol).map(|a| a.price) else {
                continue;
            };
            if !self
                .close_position(weakest.id, price, CloseReason::ArbitrageSwap, now, summary)
                .await
            {
                continue;
            }
            increment(CounterMetric::Swaps, 1);

            let opened = match self.prepare_entry(opportunity, now) {
                Ok(prepared) => self.open_position(opportunity, prepared, now, summary).await,
                Err(rejection) => {
                    tracing::warn!(symbol, reason = %rejection, "Still unable to enter after swap");
                    summary.skipped.push(SkipReport {
                        symbol: symbol.to_string(),
                        reason: format!("after swap: {rejection}"),
                    });
                    false
                }
            };

            summary.swaps.push(SwapReport {
                closed: weakest.symbol.clone(),
                opened: opened.then(|| symbol.to_string()),
                score_gap: gap,
            });
            self.notify(Event::Swapped {
                closed: weakest.symbol,
                opened: symbol.to_string(),
                score_gap: gap,
            })
            .await;
        }
    }

    /// Admission, sizing and affordability against the current balance
    fn prepare_entry(&self, analysis: &SymbolAnalysis, now: DateTime<Utc>) -> Result<Prepared, Rejection> {
        let side = Side::from_action(analysis.signal.action)
            .ok_or_else(|| Rejection::LowConfidence(analysis.signal.confidence))?;

        self.admission.can_admit(&analysis.symbol, self.balance.total, now)?;

        let kelly = if self.config.orchestrator.use_kelly {
            self.kelly.from_history(self.ledger.history(), &analysis.symbol)
        } else {
            None
        };
        let request = SizingRequest::new(self.balance.free, analysis.price, analysis.signal.confidence, side)
            .with_atr(analysis.signal.atr)
            .with_kelly(kelly);
        let sizing = self.admission.size_position(&request)?;

        let fees = self.fee_model.entry_fees(sizing.notional, self.fee_model.is_margin());
        let required = sizing.notional + fees.total;
        if required > self.balance.free {
            return Err(Rejection::InsufficientFunds {
                required,
                free: self.balance.free,
            });
        }

        Ok(Prepared { side, sizing, fees })
    }

    async fn open_position(
        &mut self,
        analysis: &SymbolAnalysis,
        prepared: Prepared,
        now: DateTime<Utc>,
        summary: &mut CycleSummary,
    ) -> bool {
        let symbol = analysis.symbol.as_str();
        let order = Order::open(symbol, prepared.side, analysis.price, prepared.sizing.size, now);
        let fill = match self.engine.acquire(order).await {
            Ok(fill) => fill,
            Err(e) => {
                tracing::error!(symbol, error = %e, "Entry order failed");
                summary.errors.push(format!("open {symbol}: {e}"));
                return false;
            }
        };

        let notional = fill.price * fill.amount;
        let entry_fee = if notional == prepared.sizing.notional {
            prepared.fees.total
        } else {
            self.fee_model.entry_fees(notional, self.fee_model.is_margin()).total
        };
        if let Err(rejection) = self.balance.commit(notional, entry_fee) {
            tracing::error!(symbol, reason = %rejection, "Fill not affordable, releasing");
            summary.errors.push(format!("open {symbol}: {rejection}"));
            let unwind = Order::close(symbol, prepared.side, fill.price, fill.amount, now);
            if let Err(e) = self.engine.release(unwind).await {
                summary.errors.push(format!("unwind {symbol}: {e}"));
            }
            return false;
        }

        let position = Position {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            side: prepared.side,
            entry_price: fill.price,
            amount: fill.amount,
            entry_time: now,
            stop_loss: prepared.sizing.stop_loss,
            take_profit: prepared.sizing.take_profit,
            peak_price: fill.price,
            entry_fee,
        };
        let id = position.id;
        let record = TradeRecord::opened(&position);

        let ratchets = self.ledger.open(position);
        self.admission.register(id, symbol, notional, now);
        self.admission.update_balance(self.balance.total);

        self.persist(self.store.save_trade(&record).await, "save_trade");
        for ratchet in ratchets {
            if let Some(moved) = self.ledger.get(&ratchet.id) {
                let record = TradeRecord::opened(moved);
                self.persist(self.store.save_trade(&record).await, "save_trade");
            }
        }
        self.persist(self.store.save_cooldown(symbol, now).await, "save_cooldown");

        tracing::info!(
            %id,
            symbol,
            side = %prepared.side,
            price = %fill.price,
            amount = %fill.amount,
            %notional,
            %entry_fee,
            stop_loss = %prepared.sizing.stop_loss,
            take_profit = %prepared.sizing.take_profit,
            confidence = %analysis.signal.confidence,
            "Position opened"
        );
        increment(CounterMetric::PositionsOpened, 1);
        summary.opened.push(OpeningReport {
            symbol: symbol.to_string(),
            side: prepared.side,
            price: fill.price,
            amount: fill.amount,
            notional,
            confidence: analysis.signal.confidence,
        });
        self.notify(Event::TradeOpened {
            symbol: symbol.to_string(),
            side: prepared.side,
            price: fill.price,
            amount: fill.amount,
            confidence: analysis.signal.confidence,
        })
        .await;
        true
    }

    /// Release, realize and record one position; false when it stays open
    async fn close_position(
        &mut self,
        id: Uuid,
        price: Decimal,
        reason: CloseReason,
        now: DateTime<Utc>,
        summary: &mut CycleSummary,
    ) -> bool {
        let Some(position) = self.ledger.get(&id).cloned() else {
            tracing::warn!(%id, "Close requested for unknown position");
            return false;
        };

        let order = Order::close(position.symbol.as_str(), position.side, price, position.amount, now);
        if let Err(e) = self.engine.release(order).await {
            tracing::error!(%id, symbol = %position.symbol, %reason, error = %e, "Exit order failed, position stays open");
            summary.errors.push(format!("close {}: {e}", position.symbol));
            return false;
        }

        let Some(closed) = self.ledger.close(id, price, now, reason, &self.fee_model) else {
            return false;
        };
        self.balance.settle(position.notional(), closed.settlement());
        self.admission.close(id, closed.net_pnl);
        self.admission.update_balance(self.balance.total);
        debug_assert!(self.balance.is_consistent());

        self.persist(self.store.save_trade(&TradeRecord::closed(&closed)).await, "save_trade");

        tracing::info!(
            %id,
            symbol = %position.symbol,
            side = %position.side,
            %reason,
            entry = %position.entry_price,
            exit = %price,
            gross_pnl = %closed.gross_pnl,
            fees = %closed.fees.total_fees,
            net_pnl = %closed.net_pnl,
            "Position closed"
        );
        increment(CounterMetric::PositionsClosed, 1);
        summary.closed.push(ClosureReport {
            symbol: position.symbol.clone(),
            side: position.side,
            reason,
            exit_price: price,
            net_pnl: closed.net_pnl,
        });
        self.notify(Event::TradeClosed {
            symbol: position.symbol,
            side: position.side,
            reason,
            exit_price: price,
            net_pnl: closed.net_pnl,
        })
        .await;
        true
    }

    async fn bookkeeping(&mut self, now: DateTime<Utc>, summary: &mut CycleSummary) {
        let status = if summary.halted.is_some() { "halted" } else { "running" };
        let heartbeat = self
            .store
            .update_heartbeat(
                status,
                self.ledger.open_count(),
                self.config.orchestrator.mode.as_str(),
                now,
            )
            .await;
        self.persist(heartbeat, "update_heartbeat");

        let interval = Duration::minutes(i64::from(self.config.orchestrator.balance_snapshot_minutes));
        let due = self.last_snapshot.map_or(true, |last| now - last >= interval);
        if due {
            match self.store.update_balance(&self.balance, now).await {
                Ok(()) => self.last_snapshot = Some(now),
                Err(e) => tracing::warn!(error = %e, "Balance snapshot dropped"),
            }
        }

        let cleared = self
            .store
            .clear_expired_cooldowns(self.config.risk.cooldown_minutes, now)
            .await;
        self.persist(cleared.map(|_| ()), "clear_expired_cooldowns");

        summary.balance = self.balance;
        self.publish_metrics();

        tracing::info!(
            status,
            analyzed = summary.analyzed.len(),
            failed = summary.failures.len(),
            opened = summary.opened.len(),
            closed = summary.closed.len(),
            swaps = summary.swaps.len(),
            errors = summary.errors.len(),
            realized_pnl = %summary.realized_pnl(),
            total = %self.balance.total,
            free = %self.balance.free,
            "Cycle complete"
        );
    }

    async fn run_learner(&self, now: DateTime<Utc>) {
        let Some(learner) = &self.learner else {
            return;
        };
        if let Err(e) = learner.periodic_adjustment(self.ledger.history(), now).await {
            tracing::warn!(error = %e, "Periodic adjustment failed");
        }
    }

    async fn notify(&self, event: Event) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        if let Err(e) = notifier.emit(&event).await {
            tracing::warn!(error = %e, %event, "Notification failed");
        }
    }

    /// Storage writes are best effort; in-memory state stays authoritative
    fn persist(&self, result: Result<(), crate::persistence::PersistenceError>, op: &'static str) {
        if let Err(e) = result {
            tracing::error!(op, error = %e, "Store write dropped");
        }
    }

    fn publish_metrics(&self) {
        let gauge = |metric, value: Decimal| set_gauge(metric, value.to_f64().unwrap_or_default());
        gauge(GaugeMetric::Equity, self.balance.total);
        gauge(GaugeMetric::FreeBalance, self.balance.free);
        gauge(GaugeMetric::UsedBalance, self.balance.used);
        gauge(GaugeMetric::TotalExposure, self.admission.exposure());
        gauge(GaugeMetric::DrawdownPct, self.admission.state().current_drawdown_pct);
        gauge(GaugeMetric::DailyPnl, self.admission.state().daily_pnl);
        set_gauge(GaugeMetric::OpenPositions, self.ledger.open_count() as f64);
    }
}
