//! CLI interface for swing-alloc
//!
//! Provides subcommands for:
//! - `run`: Drive the trading cycle on a timer
//! - `backtest`: Replay historical candles or a stress scenario
//! - `status`: Show the persisted heartbeat and balance
//! - `config`: Validate and show the effective policy

mod backtest;
mod run;
mod status;

pub use backtest::BacktestArgs;
pub use run::RunArgs;
pub use status::show_status;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "swing-alloc")]
#[command(about = "Cyclic capital allocator for swing trading")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run trading cycles until interrupted
    Run(RunArgs),
    /// Replay historical candles through the trading cycle
    Backtest(BacktestArgs),
    /// Show persisted bot status
    Status,
    /// Validate and show configuration
    Config,
}
