use clap::Parser;
use rust_decimal_macros::dec;
use swing_alloc::cli::{show_status, Cli, Commands};
use swing_alloc::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = if std::path::Path::new(&cli.config).exists() {
        Config::load(&cli.config)?
    } else {
        eprintln!("Warning: {} not found, using default configuration", cli.config);
        Config::default()
    };

    // Initialize telemetry
    swing_alloc::telemetry::init_telemetry(&config.telemetry)?;

    match cli.command {
        Commands::Run(args) => {
            config.validate()?;
            tracing::info!(mode = config.orchestrator.mode.as_str(), "Starting trading");
            args.execute(config).await?;
        }
        Commands::Backtest(args) => {
            tracing::info!("Starting backtest");
            args.execute(config).await?;
        }
        Commands::Status => show_status(&config).await?,
        Commands::Config => {
            config.validate()?;
            println!("Current configuration (valid):");
            println!("  Mode: {}", config.orchestrator.mode.as_str());
            println!("  Watchlist: {}", config.orchestrator.watchlist.join(", "));
            println!("  Cycle: every {}s", config.orchestrator.cycle_interval_secs);
            println!(
                "  Risk: {}%/trade, stop {}%, max position {}%, max open {}",
                config.risk.risk_per_trade_pct * dec!(100),
                config.risk.default_stop_loss_pct * dec!(100),
                config.risk.max_position_pct * dec!(100),
                config.risk.max_open_positions
            );
            println!(
                "  Limits: daily loss {}%, drawdown {}%, exposure {}%",
                config.risk.max_daily_loss_pct * dec!(100),
                config.risk.max_drawdown_pct * dec!(100),
                config.risk.max_total_exposure_pct * dec!(100)
            );
            println!(
                "  Swap threshold: {}, halt freezes exits: {}",
                config.orchestrator.swap_threshold, config.orchestrator.halt_also_freezes_exits
            );
            println!(
                "  Store: {}",
                config
                    .persistence
                    .database_url
                    .as_deref()
                    .unwrap_or("local file only")
            );
        }
    }

    Ok(())
}
