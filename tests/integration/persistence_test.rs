//! Storage backends, failover and restart recovery

mod common;

use chrono::Duration;
use common::{config, t0, Harness};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use swing_alloc::persistence::{
    FailoverStore, JsonFileStore, MemoryStore, PersistenceClient, SqliteStore, TradeRecord, TradeStatus,
};
use swing_alloc::orchestrator::CycleOrchestrator;
use swing_alloc::risk::{Balance, CloseReason, Position};
use swing_alloc::signal::{Action, Side};
use uuid::Uuid;

fn open_record(symbol: &str, entry: Decimal, amount: Decimal, hours_ago: i64) -> TradeRecord {
    TradeRecord::opened(&Position {
        id: Uuid::new_v4(),
        symbol: symbol.to_string(),
        side: Side::Long,
        entry_price: entry,
        amount,
        entry_time: t0() - Duration::hours(hours_ago),
        stop_loss: entry * dec!(0.975),
        take_profit: entry * dec!(1.045),
        peak_price: entry,
        entry_fee: Decimal::ZERO,
    })
}

fn closed_record(symbol: &str, net_pnl: Decimal) -> TradeRecord {
    let open = open_record(symbol, dec!(100), dec!(10), 3);
    TradeRecord {
        status: TradeStatus::Closed,
        exit_price: Some(dec!(94)),
        exit_time: Some(t0() - Duration::hours(2)),
        gross_pnl: net_pnl,
        net_pnl,
        close_reason: Some(CloseReason::StopLoss),
        ..open
    }
}

async fn sqlite_store(dir: &tempfile::TempDir) -> SqliteStore {
    let url = format!("sqlite://{}", dir.path().join("swing.db").display());
    SqliteStore::connect(&url).await.unwrap()
}

#[tokio::test]
async fn test_sqlite_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = sqlite_store(&dir).await;

    let record = open_record("BTC/USDT", dec!(50000), dec!(0.002), 1);
    store.save_trade(&record).await.unwrap();
    let loaded = store.get_trades(Some(TradeStatus::Open)).await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].id, record.id);
    assert_eq!(loaded[0].stop_loss, dec!(48750));
    assert_eq!(loaded[0].entry_time, record.entry_time);

    // Upsert by id moves the trade to closed
    let closed = TradeRecord {
        status: TradeStatus::Closed,
        exit_price: Some(dec!(51000)),
        exit_time: Some(t0()),
        net_pnl: dec!(1.75),
        close_reason: Some(CloseReason::TakeProfit),
        ..record.clone()
    };
    store.save_trade(&closed).await.unwrap();
    assert!(store.get_trades(Some(TradeStatus::Open)).await.unwrap().is_empty());
    let all = store.get_trades(None).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].net_pnl, dec!(1.75));
    assert_eq!(all[0].close_reason, Some(CloseReason::TakeProfit));

    store.update_balance(&Balance::new(dec!(1000)), t0() - Duration::hours(1)).await.unwrap();
    store.update_balance(&Balance::from_parts(dec!(900.5), dec!(100)), t0()).await.unwrap();
    let latest = store.get_latest_balance().await.unwrap().unwrap();
    assert_eq!(latest.total, dec!(1000.5));
    assert_eq!(latest.timestamp, t0());

    store.update_heartbeat("running", 1, "paper", t0()).await.unwrap();
    store.update_heartbeat("halted", 2, "paper", t0()).await.unwrap();
    let status = store.get_bot_status().await.unwrap().unwrap();
    assert_eq!(status.status, "halted");
    assert_eq!(status.open_positions, 2);

    store.save_cooldown("BTC/USDT", t0() - Duration::minutes(45)).await.unwrap();
    store.save_cooldown("ETH/USDT", t0() - Duration::minutes(5)).await.unwrap();
    assert_eq!(store.clear_expired_cooldowns(30, t0()).await.unwrap(), 1);
    let cooldowns = store.get_cooldowns().await.unwrap();
    assert_eq!(cooldowns.len(), 1);
    assert_eq!(cooldowns["ETH/USDT"], t0() - Duration::minutes(5));
}

#[tokio::test]
async fn test_failover_to_json_during_outage() {
    let dir = tempfile::tempdir().unwrap();
    let primary = Arc::new(MemoryStore::new());
    let local = Arc::new(JsonFileStore::open(dir.path().join("state.json")).await.unwrap());
    let store = Arc::new(FailoverStore::new(
        primary.clone(),
        local.clone(),
        std::time::Duration::from_secs(300),
    ));

    let h = Harness::new();
    let mut orchestrator = CycleOrchestrator::new(
        config(&["BTC/USDT"]),
        h.market.clone(),
        h.classifier.clone(),
        store.clone(),
        h.engine.clone(),
        h.clock.clone(),
    )
    .unwrap();

    primary.set_available(false);
    h.quote("BTC/USDT", dec!(50000), Action::Buy, dec!(0.90));
    let summary = orchestrator.run_cycle().await;
    assert_eq!(summary.opened.len(), 1);
    assert!(store.is_tripped());

    let trades = local.get_trades(Some(TradeStatus::Open)).await.unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(local.get_bot_status().await.unwrap().unwrap().open_positions, 1);
    assert!(local.get_cooldowns().await.unwrap().contains_key("BTC/USDT"));
}

#[tokio::test]
async fn test_restart_restores_positions_and_cooldowns() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let h = Harness::new();
    h.quote("BTC/USDT", dec!(50000), Action::Buy, dec!(0.90));

    let opened_id = {
        let store = Arc::new(JsonFileStore::open(&path).await.unwrap());
        let mut orchestrator = CycleOrchestrator::new(
            config(&["BTC/USDT"]),
            h.market.clone(),
            h.classifier.clone(),
            store,
            h.engine.clone(),
            h.clock.clone(),
        )
        .unwrap();
        orchestrator.initialize().await;
        orchestrator.run_cycle().await;
        let id = orchestrator.ledger().positions()[0].id;
        id
    };

    h.advance(Duration::minutes(10));
    let store = Arc::new(JsonFileStore::open(&path).await.unwrap());
    let mut orchestrator = CycleOrchestrator::new(
        config(&["BTC/USDT"]),
        h.market.clone(),
        h.classifier.clone(),
        store,
        h.engine.clone(),
        h.clock.clone(),
    )
    .unwrap();
    orchestrator.initialize().await;

    let restored = orchestrator.ledger().get(&opened_id).unwrap();
    assert_eq!(restored.stop_loss, dec!(48750));
    assert_eq!(orchestrator.admission().open_count(), 1);
    assert_eq!(orchestrator.admission().state().daily_trade_count, 1);
    assert!(orchestrator.balance().is_consistent());
    assert_eq!(orchestrator.balance().used, dec!(150));

    // Same BUY again: the restored cooldown blocks a second entry
    let summary = orchestrator.run_cycle().await;
    assert!(summary.opened.is_empty());
    assert!(summary.skipped[0].reason.contains("cooldown"));
}

#[tokio::test]
async fn test_held_symbols_outside_watchlist_are_managed() {
    let h = Harness::new();
    h.store.save_trade(&open_record("DOGE/USDT", dec!(0.1), dec!(1000), 2)).await.unwrap();
    h.store
        .update_balance(&Balance::from_parts(dec!(900), dec!(100)), t0() - Duration::hours(2))
        .await
        .unwrap();

    let mut orchestrator = h.orchestrator(config(&["BTC/USDT"]));
    orchestrator.initialize().await;
    h.quote("BTC/USDT", dec!(50000), Action::Hold, dec!(0));
    h.quote("DOGE/USDT", dec!(0.09), Action::Hold, dec!(0));

    let summary = orchestrator.run_cycle().await;

    assert!(summary.analyzed.contains(&"DOGE/USDT".to_string()));
    assert_eq!(summary.closed.len(), 1);
    assert_eq!(summary.closed[0].symbol, "DOGE/USDT");
    assert_eq!(summary.closed[0].reason, CloseReason::StopLoss);
    assert_eq!(orchestrator.balance().used, dec!(0));
}

/// Weak ETH holding uses most of the capital when a strong BTC signal arrives
async fn swap_setup(holding_confidence: Decimal) -> (Harness, CycleOrchestrator) {
    let h = Harness::new();
    h.store.save_trade(&open_record("ETH/USDT", dec!(100), dec!(9), 1)).await.unwrap();
    h.store
        .update_balance(&Balance::from_parts(dec!(60), dec!(900)), t0() - Duration::hours(1))
        .await
        .unwrap();

    let mut orchestrator = h.orchestrator(config(&["BTC/USDT", "ETH/USDT"]));
    orchestrator.initialize().await;
    h.quote("BTC/USDT", dec!(50000), Action::Buy, dec!(0.80));
    h.quote("ETH/USDT", dec!(100), Action::Hold, holding_confidence);
    (h, orchestrator)
}

#[tokio::test]
async fn test_scenario_c_swap_frees_capital_for_stronger_signal() {
    let (_h, mut orchestrator) = swap_setup(dec!(0.50)).await;

    let summary = orchestrator.run_cycle().await;

    assert_eq!(summary.swaps.len(), 1);
    let swap = &summary.swaps[0];
    assert_eq!(swap.closed, "ETH/USDT");
    assert_eq!(swap.opened.as_deref(), Some("BTC/USDT"));
    assert_eq!(swap.score_gap, dec!(0.30));

    assert_eq!(summary.closed_with(CloseReason::ArbitrageSwap).count(), 1);
    assert_eq!(summary.opened.len(), 1);
    // Freed: 60 + 900 - 0.9 exit fee = 959.1; capped at 15%
    assert_eq!(summary.opened[0].notional, dec!(143.865));

    let ledger = orchestrator.ledger();
    assert_eq!(ledger.open_count(), 1);
    assert_eq!(ledger.positions()[0].symbol, "BTC/USDT");
    assert!(orchestrator.balance().is_consistent());
}

#[tokio::test]
async fn test_no_swap_below_threshold() {
    let (_h, mut orchestrator) = swap_setup(dec!(0.60)).await;

    let summary = orchestrator.run_cycle().await;

    assert!(summary.swaps.is_empty());
    assert!(summary.opened.is_empty());
    assert!(summary.closed.is_empty());
    assert_eq!(summary.skipped.len(), 1);
    assert!(summary.skipped[0].reason.contains("swap gap"));
    assert_eq!(orchestrator.ledger().positions()[0].symbol, "ETH/USDT");
}

#[tokio::test]
async fn test_cooldown_rejection_never_swaps() {
    let h = Harness::new();
    h.store.save_trade(&open_record("ETH/USDT", dec!(100), dec!(9), 1)).await.unwrap();
    h.store
        .update_balance(&Balance::from_parts(dec!(60), dec!(900)), t0() - Duration::hours(1))
        .await
        .unwrap();
    h.store.save_cooldown("BTC/USDT", t0() - Duration::minutes(10)).await.unwrap();

    let mut orchestrator = h.orchestrator(config(&["BTC/USDT", "ETH/USDT"]));
    orchestrator.initialize().await;
    h.quote("BTC/USDT", dec!(50000), Action::Buy, dec!(0.95));
    h.quote("ETH/USDT", dec!(100), Action::Hold, dec!(0.10));

    let summary = orchestrator.run_cycle().await;

    assert!(summary.swaps.is_empty());
    assert!(summary.closed.is_empty());
    assert!(summary.skipped[0].reason.contains("20.0min remaining"));
}

async fn halted_setup(freeze_exits: bool) -> (Harness, CycleOrchestrator) {
    let h = Harness::new();
    h.store.save_trade(&closed_record("SOL/USDT", dec!(-60))).await.unwrap();
    h.store
        .save_trade(&open_record("BTC/USDT", dec!(50000), dec!(0.002), 1))
        .await
        .unwrap();
    h.store
        .update_balance(&Balance::from_parts(dec!(900), dec!(100)), t0() - Duration::hours(1))
        .await
        .unwrap();

    let mut config = config(&["BTC/USDT", "ETH/USDT"]);
    config.orchestrator.halt_also_freezes_exits = freeze_exits;
    let mut orchestrator = h.orchestrator(config);
    orchestrator.initialize().await;

    h.quote("BTC/USDT", dec!(48000), Action::Hold, dec!(0));
    h.quote("ETH/USDT", dec!(3000), Action::Buy, dec!(0.95));
    (h, orchestrator)
}

#[tokio::test]
async fn test_scenario_d_daily_loss_halts_everything() {
    let (h, mut orchestrator) = halted_setup(true).await;
    assert_eq!(orchestrator.admission().state().daily_pnl, dec!(-60));

    let rejection = orchestrator
        .admission()
        .can_admit("ETH/USDT", orchestrator.balance().total, t0())
        .unwrap_err();
    assert!(rejection.to_string().starts_with("daily loss limit"));

    let summary = orchestrator.run_cycle().await;

    assert!(summary.halted.as_deref().unwrap().contains("daily loss limit"));
    assert!(!summary.exits_evaluated);
    assert!(summary.analyzed.is_empty());
    assert!(summary.opened.is_empty());
    // Stop is breached but exits are frozen
    assert!(summary.closed.is_empty());
    assert_eq!(orchestrator.ledger().open_count(), 1);
    assert_eq!(h.store.get_bot_status().await.unwrap().unwrap().status, "halted");
}

#[tokio::test]
async fn test_halt_can_keep_managing_exits() {
    let (_h, mut orchestrator) = halted_setup(false).await;

    let summary = orchestrator.run_cycle().await;

    assert!(summary.halted.is_some());
    assert!(summary.exits_evaluated);
    assert_eq!(summary.closed.len(), 1);
    assert_eq!(summary.closed[0].reason, CloseReason::StopLoss);
    assert!(summary.opened.is_empty());
}

#[tokio::test]
async fn test_halt_lifts_on_next_day() {
    let (h, mut orchestrator) = halted_setup(true).await;
    assert!(orchestrator.run_cycle().await.halted.is_some());

    h.clock.set(t0() + Duration::days(1));
    let summary = orchestrator.run_cycle().await;

    assert!(summary.halted.is_none());
    assert_eq!(summary.closed_with(CloseReason::StopLoss).count(), 1);
    assert_eq!(summary.opened.len(), 1);
    assert_eq!(summary.opened[0].symbol, "ETH/USDT");
}

#[tokio::test]
async fn test_restart_between_snapshots_reconciles_balance() {
    let h = Harness::new();
    let mut orchestrator = h.orchestrator(config(&["BTC/USDT"]));
    orchestrator.initialize().await;

    // Quiet first cycle writes the hourly snapshot
    h.quote("BTC/USDT", dec!(50000), Action::Hold, dec!(0));
    orchestrator.run_cycle().await;
    assert_eq!(h.store.get_latest_balance().await.unwrap().unwrap().timestamp, t0());

    // Entry ten minutes later, before the next snapshot is due
    h.advance(Duration::minutes(10));
    h.quote("BTC/USDT", dec!(50000), Action::Buy, dec!(0.90));
    assert_eq!(orchestrator.run_cycle().await.opened.len(), 1);
    assert_eq!(h.store.get_latest_balance().await.unwrap().unwrap().used, dec!(0));
    drop(orchestrator);

    h.advance(Duration::minutes(5));
    let mut restarted = h.orchestrator(config(&["BTC/USDT"]));
    restarted.initialize().await;

    let balance = restarted.balance();
    assert_eq!(balance.total, dec!(999.745));
    assert_eq!(balance.free, dec!(849.745));
    assert_eq!(balance.used, dec!(150));

    // Stop out: used returns to zero instead of going negative
    h.quote("BTC/USDT", dec!(48000), Action::Hold, dec!(0));
    let summary = restarted.run_cycle().await;
    assert_eq!(summary.closed_with(CloseReason::StopLoss).count(), 1);

    let balance = restarted.balance();
    assert_eq!(balance.used, dec!(0));
    assert!(balance.is_consistent());
    let closed = h.store.get_trades(Some(TradeStatus::Closed)).await.unwrap();
    assert!((balance.total - (dec!(1000) + closed[0].net_pnl)).abs() < dec!(0.000001));
}

fn failover_orchestrator(h: &Harness, store: Arc<FailoverStore>) -> CycleOrchestrator {
    CycleOrchestrator::new(
        config(&["BTC/USDT"]),
        h.market.clone(),
        h.classifier.clone(),
        store,
        h.engine.clone(),
        h.clock.clone(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_outage_entries_survive_restart_after_recovery() {
    let h = Harness::new();
    let primary = Arc::new(MemoryStore::new());
    let local = Arc::new(MemoryStore::new());
    let store = Arc::new(FailoverStore::new(
        primary.clone(),
        local.clone(),
        std::time::Duration::ZERO,
    ));
    let mut orchestrator = failover_orchestrator(&h, store.clone());
    orchestrator.initialize().await;

    primary.set_available(false);
    h.quote("BTC/USDT", dec!(50000), Action::Buy, dec!(0.90));
    assert_eq!(orchestrator.run_cycle().await.opened.len(), 1);
    assert!(primary.get_trades(None).await.is_err());

    // Primary back: the next write closes the breaker and copies the outage writes
    primary.set_available(true);
    h.advance(Duration::minutes(5));
    h.quote("BTC/USDT", dec!(50000), Action::Hold, dec!(0));
    orchestrator.run_cycle().await;
    assert!(!store.is_tripped());
    assert_eq!(primary.get_trades(Some(TradeStatus::Open)).await.unwrap().len(), 1);
    assert!(primary.get_cooldowns().await.unwrap().contains_key("BTC/USDT"));
    drop(orchestrator);

    // Restart against the primary alone
    h.advance(Duration::minutes(5));
    let mut restarted = CycleOrchestrator::new(
        config(&["BTC/USDT"]),
        h.market.clone(),
        h.classifier.clone(),
        primary.clone(),
        h.engine.clone(),
        h.clock.clone(),
    )
    .unwrap();
    restarted.initialize().await;
    assert_eq!(restarted.ledger().open_count(), 1);
    assert_eq!(restarted.balance().used, dec!(150));
    assert!(restarted
        .admission()
        .cooldown_remaining("BTC/USDT", t0() + Duration::minutes(10))
        .is_some());
}

#[tokio::test]
async fn test_restart_merges_local_writes_without_resync() {
    let h = Harness::new();
    let primary = Arc::new(MemoryStore::new());
    let local = Arc::new(MemoryStore::new());
    let store = Arc::new(FailoverStore::new(
        primary.clone(),
        local.clone(),
        std::time::Duration::from_secs(300),
    ));

    let mut orchestrator = failover_orchestrator(&h, store);
    orchestrator.initialize().await;
    primary.set_available(false);
    h.quote("BTC/USDT", dec!(50000), Action::Buy, dec!(0.90));
    assert_eq!(orchestrator.run_cycle().await.opened.len(), 1);
    drop(orchestrator);

    // Process exits before the breaker closes; a fresh store starts untripped
    primary.set_available(true);
    h.advance(Duration::minutes(5));
    let fresh = Arc::new(FailoverStore::new(
        primary.clone(),
        local.clone(),
        std::time::Duration::from_secs(300),
    ));
    let mut restarted = failover_orchestrator(&h, fresh);
    restarted.initialize().await;

    assert_eq!(restarted.ledger().open_count(), 1);
    assert_eq!(restarted.balance().used, dec!(150));
    assert!(primary.get_trades(None).await.unwrap().is_empty());
}
