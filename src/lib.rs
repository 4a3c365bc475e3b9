//! swing-alloc: cyclic capital allocator for swing trading
//!
//! This library provides the core components for:
//! - Admission control, position sizing and daily/portfolio limits
//! - Position lifecycle with stop, target and trailing exits
//! - A cycle orchestrator with concurrent analysis and a preemption auction
//! - Fee modelling for entry, exit and rollover costs
//! - Candle feeds from Binance with retry
//! - Failover persistence (SQLite primary, local JSON secondary)
//! - Paper execution
//! - Backtests replaying recorded candles through the same cycle
//! - Structured logging and Prometheus metrics

pub mod backtest;
pub mod cli;
pub mod clock;
pub mod config;
pub mod execution;
pub mod feed;
pub mod fees;
pub mod notify;
pub mod orchestrator;
pub mod persistence;
pub mod risk;
pub mod signal;
pub mod telemetry;
