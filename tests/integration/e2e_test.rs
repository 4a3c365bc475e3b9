//! End-to-end integration tests

mod common;

use chrono::Duration;
use common::{config, Harness};
use rust_decimal_macros::dec;
use swing_alloc::config::{Config, ConfigError, ExecutionMode, PersistenceConfig};
use swing_alloc::orchestrator::CycleOrchestrator;
use swing_alloc::persistence::{open_store, PersistenceClient, TradeStatus};
use swing_alloc::risk::CloseReason;
use swing_alloc::signal::Action;

const EXAMPLE: &str = include_str!("../../config.toml.example");

#[test]
fn test_config_example_matches_defaults() {
    let config: Config = toml::from_str(EXAMPLE).unwrap();
    config.validate().unwrap();

    let defaults = Config::default();
    assert_eq!(config.orchestrator.mode, ExecutionMode::Paper);
    assert_eq!(config.orchestrator.watchlist, defaults.orchestrator.watchlist);
    assert_eq!(config.orchestrator.swap_threshold, dec!(0.25));
    assert_eq!(config.risk.confidence_tiers.len(), 4);
    assert_eq!(config.risk.take_profit_bands.len(), 3);
    assert!(config.risk.take_profit_bands[2].max_atr_ratio.is_none());
    assert_eq!(config.fees.taker_rate, defaults.fees.taker_rate);
    assert!(config.persistence.database_url.is_none());
    assert!(config.telemetry.metrics_port.is_none());
}

#[test]
fn test_config_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[orchestrator]\nwatchlist = [\"SOL/USDT\"]\n\n[risk]\nmax_open_positions = 2\n").unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.orchestrator.watchlist, vec!["SOL/USDT".to_string()]);
    assert_eq!(config.risk.max_open_positions, 2);
    // Untouched sections keep their defaults
    assert_eq!(config.risk.cooldown_minutes, 30);
    assert_eq!(config.feed.timeframe, "1h");
}

#[test]
fn test_invalid_policy_refused_at_construction() {
    let h = Harness::new();
    let mut bad = config(&["BTC/USDT"]);
    bad.risk.max_daily_loss_pct = dec!(1.5);

    let error = CycleOrchestrator::new(
        bad,
        h.market.clone(),
        h.classifier.clone(),
        h.store.clone(),
        h.engine.clone(),
        h.clock.clone(),
    )
    .err()
    .unwrap();

    assert!(matches!(
        error,
        ConfigError::OutOfRange {
            field: "risk.max_daily_loss_pct",
            ..
        }
    ));
}

#[tokio::test]
async fn test_open_store_without_database_uses_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = PersistenceConfig {
        database_url: None,
        fallback_path: dir.path().join("nested").join("state.json"),
        reprobe_interval_secs: 60,
    };

    let store = open_store(&config).await.unwrap();
    store.save_cooldown("BTC/USDT", common::t0()).await.unwrap();
    assert!(store.get_cooldowns().await.unwrap().contains_key("BTC/USDT"));
}

#[tokio::test]
async fn test_open_store_with_sqlite_primary() {
    let dir = tempfile::tempdir().unwrap();
    let config = PersistenceConfig {
        database_url: Some(format!("sqlite://{}", dir.path().join("swing.db").display())),
        fallback_path: dir.path().join("state.json"),
        reprobe_interval_secs: 60,
    };

    let store = open_store(&config).await.unwrap();
    store.update_heartbeat("running", 0, "paper", common::t0()).await.unwrap();
    assert_eq!(store.get_bot_status().await.unwrap().unwrap().status, "running");
    assert!(dir.path().join("swing.db").exists());
}

#[tokio::test]
async fn test_multi_cycle_session() {
    let h = Harness::new();
    let mut orchestrator = h.orchestrator(config(&["BTC/USDT", "ETH/USDT", "SOL/USDT"]));
    orchestrator.initialize().await;

    // Cycle 1: two entries, one symbol unreachable
    h.quote("BTC/USDT", dec!(50000), Action::Buy, dec!(0.90));
    h.quote("ETH/USDT", dec!(3000), Action::Buy, dec!(0.75));
    h.market.fail(
        "SOL/USDT",
        swing_alloc::feed::FeedError::Rejected("symbol suspended".into()),
    );
    let summary = orchestrator.run_cycle().await;
    assert_eq!(summary.opened.len(), 2);
    assert_eq!(summary.opened[0].symbol, "BTC/USDT");
    assert_eq!(summary.failures.len(), 1);

    // Cycle 2: ETH hits take profit, BTC holds
    h.advance(Duration::minutes(5));
    h.quote("BTC/USDT", dec!(50100), Action::Hold, dec!(0.40));
    h.quote("ETH/USDT", dec!(3200), Action::Hold, dec!(0.40));
    let summary = orchestrator.run_cycle().await;
    assert_eq!(summary.closed.len(), 1);
    assert_eq!(summary.closed[0].symbol, "ETH/USDT");
    assert_eq!(summary.closed[0].reason, CloseReason::TakeProfit);
    assert!(summary.closed[0].net_pnl > dec!(0));

    // Cycle 3: BTC reverses to SELL
    h.advance(Duration::minutes(5));
    h.quote("BTC/USDT", dec!(49800), Action::Sell, dec!(0.70));
    let summary = orchestrator.run_cycle().await;
    assert_eq!(summary.closed_with(CloseReason::SignalReversal).count(), 1);
    assert!(summary.opened.is_empty());

    assert_eq!(orchestrator.ledger().open_count(), 0);
    let balance = orchestrator.balance();
    assert_eq!(balance.used, dec!(0));
    assert!(balance.is_consistent());

    let trades = h.store.get_trades(Some(TradeStatus::Closed)).await.unwrap();
    assert_eq!(trades.len(), 2);
    let realized: rust_decimal::Decimal = trades.iter().map(|t| t.net_pnl).sum();
    assert!((balance.total - (dec!(1000) + realized)).abs() < dec!(0.000001));
    assert_eq!(orchestrator.admission().state().daily_pnl, realized);
}
