//! Cycle orchestration tests

mod common;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{config, t0, Harness};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use swing_alloc::config::Config;
use swing_alloc::feed::FeedError;
use swing_alloc::notify::{AutoLearner, Event, Notifier};
use swing_alloc::persistence::{PersistenceClient, TradeStatus};
use swing_alloc::risk::{Balance, CloseReason, ClosedPosition};
use swing_alloc::signal::Action;

fn scenario_a_config(watchlist: &[&str]) -> Config {
    let mut config = config(watchlist);
    config.risk.risk_per_trade_pct = dec!(0.015);
    config.risk.max_position_pct = dec!(0.10);
    config
}

#[tokio::test]
async fn test_scenario_a_entry_sizing_and_balance() {
    let h = Harness::new();
    let mut orchestrator = h.orchestrator(scenario_a_config(&["BTC/USDT"]));
    h.quote("BTC/USDT", dec!(50000), Action::Buy, dec!(0.90));

    let summary = orchestrator.run_cycle().await;

    assert_eq!(summary.opened.len(), 1);
    let opened = &summary.opened[0];
    assert_eq!(opened.notional, dec!(100));
    assert_eq!(opened.amount, dec!(0.002));

    // Entry fee: 100 * (0.001 taker + 0.0002 margin + 0.0005 slippage)
    let balance = orchestrator.balance();
    assert_eq!(balance.free, dec!(899.83));
    assert_eq!(balance.used, dec!(100));
    assert_eq!(balance.total, dec!(999.83));
    assert!(balance.is_consistent());

    let position = orchestrator.ledger().positions()[0].clone();
    assert_eq!(position.stop_loss, dec!(48750));
    assert_eq!(position.take_profit, dec!(52250));

    let stored = h.store.get_trades(Some(TradeStatus::Open)).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].entry_fee, dec!(0.17));
}

#[tokio::test]
async fn test_scenario_b_trailing_stop() {
    let h = Harness::new();
    let mut orchestrator = h.orchestrator(scenario_a_config(&["BTC/USDT"]));
    h.quote("BTC/USDT", dec!(50000), Action::Buy, dec!(0.90));
    orchestrator.run_cycle().await;

    // +4%: trailing active at 51480, below the 52250 target
    h.advance(Duration::hours(1));
    h.quote("BTC/USDT", dec!(52000), Action::Hold, dec!(0));
    let summary = orchestrator.run_cycle().await;
    assert!(summary.closed.is_empty());
    assert_eq!(orchestrator.ledger().positions()[0].peak_price, dec!(52000));

    h.advance(Duration::hours(1));
    h.market.price("BTC/USDT", dec!(51400));
    let summary = orchestrator.run_cycle().await;

    assert_eq!(summary.closed.len(), 1);
    let closed = &summary.closed[0];
    assert_eq!(closed.reason, CloseReason::TrailingStop);
    // gross 2.8 - entry 0.17 - exit 0.1028, no rollover within 4h
    assert_eq!(closed.net_pnl, dec!(2.5272));

    let balance = orchestrator.balance();
    assert_eq!(balance, Balance::from_parts(dec!(1002.5272), dec!(0)));
    assert_eq!(orchestrator.admission().state().daily_pnl, dec!(2.5272));
}

#[tokio::test]
async fn test_trailing_stop_wins_over_signal_reversal() {
    let h = Harness::new();
    let mut orchestrator = h.orchestrator(scenario_a_config(&["BTC/USDT"]));
    h.quote("BTC/USDT", dec!(50000), Action::Buy, dec!(0.90));
    orchestrator.run_cycle().await;

    h.advance(Duration::hours(1));
    h.quote("BTC/USDT", dec!(52000), Action::Hold, dec!(0));
    orchestrator.run_cycle().await;

    h.advance(Duration::hours(1));
    h.quote("BTC/USDT", dec!(51400), Action::Sell, dec!(0.90));
    let summary = orchestrator.run_cycle().await;

    assert_eq!(summary.closed.len(), 1);
    assert_eq!(summary.closed[0].reason, CloseReason::TrailingStop);
    assert_eq!(summary.closed_with(CloseReason::SignalReversal).count(), 0);
}

#[tokio::test]
async fn test_signal_reversal_closes_regardless_of_pnl() {
    let h = Harness::new();
    let mut orchestrator = h.orchestrator(scenario_a_config(&["BTC/USDT"]));
    h.quote("BTC/USDT", dec!(50000), Action::Buy, dec!(0.90));
    orchestrator.run_cycle().await;

    h.advance(Duration::hours(1));
    h.quote("BTC/USDT", dec!(50100), Action::Sell, dec!(0.65));
    let summary = orchestrator.run_cycle().await;

    assert_eq!(summary.closed.len(), 1);
    assert_eq!(summary.closed[0].reason, CloseReason::SignalReversal);
    // Shorts are disabled, so the SELL opens nothing
    assert!(summary.opened.is_empty());
    assert_eq!(orchestrator.ledger().open_count(), 0);
}

#[tokio::test]
async fn test_scenario_e_holding_fee_on_close() {
    let h = Harness::new();
    let mut orchestrator = h.orchestrator(scenario_a_config(&["BTC/USDT"]));
    h.quote("BTC/USDT", dec!(50000), Action::Buy, dec!(0.90));
    orchestrator.run_cycle().await;

    h.advance(Duration::hours(9));
    h.quote("BTC/USDT", dec!(48000), Action::Hold, dec!(0));
    let summary = orchestrator.run_cycle().await;
    assert_eq!(summary.closed[0].reason, CloseReason::StopLoss);

    let closed = h.store.get_trades(Some(TradeStatus::Closed)).await.unwrap();
    assert_eq!(closed.len(), 1);
    let record = &closed[0];
    // Two full 4h intervals in 9h: 100 * 0.0002 * 2
    assert_eq!(record.holding_fee, dec!(0.04));
    assert_eq!(record.exit_fee, dec!(0.096));
    assert_eq!(record.net_pnl, dec!(-4.306));
    assert!(orchestrator.balance().is_consistent());
}

#[tokio::test]
async fn test_pyramiding_ratchets_stop_to_break_even() {
    let h = Harness::new();
    let mut config = config(&["BTC/USDT"]);
    config.risk.cooldown_minutes = 0;
    let mut orchestrator = h.orchestrator(config);

    h.quote("BTC/USDT", dec!(50000), Action::Buy, dec!(0.90));
    orchestrator.run_cycle().await;
    let first = orchestrator.ledger().positions()[0].id;
    assert_eq!(orchestrator.ledger().get(&first).unwrap().stop_loss, dec!(48750));

    h.advance(Duration::hours(1));
    h.quote("BTC/USDT", dec!(50500), Action::Buy, dec!(0.90));
    let summary = orchestrator.run_cycle().await;
    assert_eq!(summary.opened.len(), 1);

    let positions = orchestrator.ledger().positions();
    assert_eq!(positions.len(), 2);
    assert_eq!(positions[0].stop_loss, dec!(50000));
    assert_eq!(positions[1].stop_loss, dec!(49237.5));

    let stored = h.store.get_trades(Some(TradeStatus::Open)).await.unwrap();
    let first_record = stored.iter().find(|t| t.id == first).unwrap();
    assert_eq!(first_record.stop_loss, dec!(50000));

    // The ratcheted stop now protects the first entry at break-even
    h.advance(Duration::hours(1));
    h.quote("BTC/USDT", dec!(49900), Action::Hold, dec!(0));
    let summary = orchestrator.run_cycle().await;
    assert_eq!(summary.closed.len(), 1);
    assert_eq!(summary.closed[0].reason, CloseReason::StopLoss);
    assert_eq!(orchestrator.ledger().open_count(), 1);
}

#[tokio::test]
async fn test_degraded_cycle_still_manages_healthy_symbols() {
    let h = Harness::new();
    let mut orchestrator = h.orchestrator(config(&["BTC/USDT", "ETH/USDT", "SOL/USDT"]));
    h.quote("BTC/USDT", dec!(50000), Action::Buy, dec!(0.90));
    h.quote("ETH/USDT", dec!(3000), Action::Hold, dec!(0));
    h.quote("SOL/USDT", dec!(150), Action::Hold, dec!(0));
    orchestrator.run_cycle().await;
    assert_eq!(orchestrator.ledger().open_count(), 1);

    h.advance(Duration::hours(1));
    h.market.fail("ETH/USDT", FeedError::Transient("connection reset".into()));
    h.market.fail("SOL/USDT", FeedError::DataQuality("no candles".into()));
    h.quote("BTC/USDT", dec!(48000), Action::Hold, dec!(0));
    let summary = orchestrator.run_cycle().await;

    assert_eq!(summary.analyzed, vec!["BTC/USDT".to_string()]);
    assert_eq!(summary.failures.len(), 2);
    assert!(summary.failures.iter().any(|(s, _)| s == "ETH/USDT"));
    assert_eq!(summary.closed.len(), 1);
    assert_eq!(summary.closed[0].reason, CloseReason::StopLoss);
    assert!(summary.errors.is_empty());
}

#[tokio::test]
async fn test_failed_release_keeps_position_open() {
    let h = Harness::new();
    let mut orchestrator = h.orchestrator(config(&["BTC/USDT"]));
    h.quote("BTC/USDT", dec!(50000), Action::Buy, dec!(0.90));
    orchestrator.run_cycle().await;
    let before = orchestrator.balance();

    h.advance(Duration::hours(1));
    h.engine.fail_releases("BTC/USDT");
    h.quote("BTC/USDT", dec!(48000), Action::Hold, dec!(0));
    let summary = orchestrator.run_cycle().await;

    assert!(summary.closed.is_empty());
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(orchestrator.ledger().open_count(), 1);
    assert_eq!(orchestrator.balance(), before);

    h.engine.heal();
    h.advance(Duration::hours(1));
    let summary = orchestrator.run_cycle().await;
    assert_eq!(summary.closed.len(), 1);
}

#[tokio::test]
async fn test_entries_never_exceed_free_balance() {
    let h = Harness::new();
    let symbols = ["ADA/USDT", "BNB/USDT", "BTC/USDT", "ETH/USDT", "SOL/USDT", "XRP/USDT"];
    let mut orchestrator = h.orchestrator(config(&symbols));
    for (i, symbol) in symbols.iter().enumerate() {
        h.quote(symbol, Decimal::from(100 * (i + 1)), Action::Buy, dec!(0.90) - Decimal::from(i) / dec!(100));
    }

    let summary = orchestrator.run_cycle().await;
    assert!(!summary.opened.is_empty());
    assert!(summary.opened.len() <= 5);

    // Replay the auction: each entry fits the free balance left by the ones before it
    let mut free = dec!(1000);
    for opened in &summary.opened {
        let required = opened.notional * dec!(1.0017);
        assert!(required <= free, "{} needs {required}, free {free}", opened.symbol);
        free -= required;
    }
    assert!((orchestrator.balance().free - free).abs() < dec!(0.000001));
    assert!(orchestrator.balance().is_consistent());

    // Best confidence first
    let confidences: Vec<Decimal> = summary.opened.iter().map(|o| o.confidence).collect();
    let mut sorted = confidences.clone();
    sorted.sort_by(|a, b| b.cmp(a));
    assert_eq!(confidences, sorted);
}

#[tokio::test]
async fn test_low_confidence_is_skipped_without_swap() {
    let h = Harness::new();
    let mut orchestrator = h.orchestrator(config(&["BTC/USDT", "ETH/USDT"]));
    h.quote("ETH/USDT", dec!(3000), Action::Buy, dec!(0.95));
    h.quote("BTC/USDT", dec!(50000), Action::Buy, dec!(0.50));

    let summary = orchestrator.run_cycle().await;

    assert_eq!(summary.opened.len(), 1);
    assert_eq!(summary.opened[0].symbol, "ETH/USDT");
    assert!(summary.swaps.is_empty());
    let skip = summary.skipped.iter().find(|s| s.symbol == "BTC/USDT").unwrap();
    assert!(skip.reason.contains("below minimum"));
}

#[tokio::test]
async fn test_short_entries_when_enabled() {
    let h = Harness::new();
    let mut config = scenario_a_config(&["BTC/USDT"]);
    config.orchestrator.allow_short = true;
    let mut orchestrator = h.orchestrator(config);
    h.quote("BTC/USDT", dec!(50000), Action::Sell, dec!(0.90));

    let summary = orchestrator.run_cycle().await;

    assert_eq!(summary.opened.len(), 1);
    let position = orchestrator.ledger().positions()[0].clone();
    assert_eq!(position.stop_loss, dec!(51250));
    assert_eq!(position.take_profit, dec!(47750));

    h.advance(Duration::hours(1));
    h.quote("BTC/USDT", dec!(51300), Action::Hold, dec!(0));
    let summary = orchestrator.run_cycle().await;
    assert_eq!(summary.closed[0].reason, CloseReason::StopLoss);
}

struct FailingNotifier {
    calls: AtomicUsize,
}

#[async_trait]
impl Notifier for FailingNotifier {
    async fn emit(&self, _event: &Event) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("push service down")
    }
}

struct CountingLearner {
    runs: AtomicUsize,
}

#[async_trait]
impl AutoLearner for CountingLearner {
    async fn periodic_adjustment(&self, _history: &[ClosedPosition], _now: DateTime<Utc>) -> anyhow::Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("model registry unreachable")
    }
}

#[tokio::test]
async fn test_advisory_failures_never_block_a_cycle() {
    let h = Harness::new();
    let notifier = Arc::new(FailingNotifier {
        calls: AtomicUsize::new(0),
    });
    let learner = Arc::new(CountingLearner {
        runs: AtomicUsize::new(0),
    });
    let mut orchestrator = h
        .orchestrator(config(&["BTC/USDT"]))
        .with_notifier(notifier.clone())
        .with_learner(learner.clone());

    h.quote("BTC/USDT", dec!(50000), Action::Buy, dec!(0.90));
    let summary = orchestrator.run_cycle().await;
    assert_eq!(summary.opened.len(), 1);
    assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
    assert_eq!(learner.runs.load(Ordering::SeqCst), 0);

    // First cycle of a new day runs the learner once
    h.clock.set(t0() + Duration::days(1));
    h.quote("BTC/USDT", dec!(50100), Action::Hold, dec!(0));
    orchestrator.run_cycle().await;
    orchestrator.run_cycle().await;
    assert_eq!(learner.runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_store_outage_does_not_stop_trading() {
    let h = Harness::new();
    let mut orchestrator = h.orchestrator(config(&["BTC/USDT"]));
    h.store.set_available(false);
    orchestrator.initialize().await;
    assert_eq!(orchestrator.balance(), Balance::new(dec!(1000)));

    h.quote("BTC/USDT", dec!(50000), Action::Buy, dec!(0.90));
    let summary = orchestrator.run_cycle().await;
    assert_eq!(summary.opened.len(), 1);
    assert_eq!(orchestrator.ledger().open_count(), 1);

    h.store.set_available(true);
    h.advance(Duration::minutes(1));
    orchestrator.run_cycle().await;
    let status = h.store.get_bot_status().await.unwrap().unwrap();
    assert_eq!(status.status, "running");
    assert_eq!(status.open_positions, 1);
    assert_eq!(status.mode, "paper");
}

#[tokio::test]
async fn test_balance_snapshot_at_most_hourly() {
    let h = Harness::new();
    let mut orchestrator = h.orchestrator(config(&["BTC/USDT"]));
    h.quote("BTC/USDT", dec!(50000), Action::Hold, dec!(0));

    orchestrator.run_cycle().await;
    let first = h.store.get_latest_balance().await.unwrap().unwrap();
    assert_eq!(first.timestamp, t0());

    h.advance(Duration::minutes(30));
    orchestrator.run_cycle().await;
    assert_eq!(h.store.get_latest_balance().await.unwrap().unwrap().timestamp, t0());

    h.advance(Duration::minutes(30));
    orchestrator.run_cycle().await;
    assert_eq!(
        h.store.get_latest_balance().await.unwrap().unwrap().timestamp,
        t0() + Duration::hours(1)
    );
}

#[tokio::test]
async fn test_end_session_closes_what_it_can() {
    let h = Harness::new();
    let mut orchestrator = h.orchestrator(config(&["BTC/USDT", "ETH/USDT", "SOL/USDT"]));
    h.quote("BTC/USDT", dec!(50000), Action::Buy, dec!(0.90));
    h.quote("ETH/USDT", dec!(3000), Action::Buy, dec!(0.80));
    h.quote("SOL/USDT", dec!(150), Action::Buy, dec!(0.75));
    assert_eq!(orchestrator.run_cycle().await.opened.len(), 3);

    h.advance(Duration::minutes(5));
    h.market.fail("SOL/USDT", FeedError::Transient("timeout".into()));
    h.engine.fail_releases("ETH/USDT");
    let summary = orchestrator.end_session().await;

    assert_eq!(summary.closed.len(), 1);
    assert_eq!(summary.closed[0].symbol, "BTC/USDT");
    assert_eq!(summary.closed[0].reason, CloseReason::EndOfSession);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.errors.len(), 1);
    assert!(summary.opened.is_empty());
    assert_eq!(orchestrator.ledger().symbols(), vec!["ETH/USDT".to_string(), "SOL/USDT".to_string()]);
    assert!(orchestrator.balance().is_consistent());
}
