//! Run command implementation

use crate::clock::SystemClock;
use crate::config::{Config, ExecutionMode};
use crate::execution::PaperEngine;
use crate::feed::{BinanceClient, BinanceConfig};
use crate::notify::TracingNotifier;
use crate::orchestrator::CycleOrchestrator;
use crate::persistence::open_store;
use crate::signal::TrendClassifier;
use clap::Args;
use std::sync::Arc;
use std::time::Duration;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Run a single cycle and exit
    #[arg(long)]
    pub once: bool,

    /// Seconds between cycles, overriding the config
    #[arg(short, long)]
    pub interval: Option<u64>,
}

impl RunArgs {
    pub async fn execute(&self, config: Config) -> anyhow::Result<()> {
        if config.orchestrator.mode == ExecutionMode::Live {
            anyhow::bail!("live execution is not supported, set [orchestrator] mode = \"paper\"");
        }

        let market_data = BinanceClient::with_config(BinanceConfig {
            base_url: config.feed.base_url.clone(),
            timeout: Duration::from_secs(config.feed.fetch_timeout_secs),
        })?;
        let store = open_store(&config.persistence).await?;
        let interval_secs = self.interval.unwrap_or(config.orchestrator.cycle_interval_secs).max(1);
        let close_on_shutdown = config.orchestrator.close_on_shutdown;

        let mut orchestrator = CycleOrchestrator::new(
            config,
            Arc::new(market_data),
            Arc::new(TrendClassifier::default()),
            store,
            Arc::new(PaperEngine::new()),
            Arc::new(SystemClock),
        )?
        .with_notifier(Arc::new(TracingNotifier));

        orchestrator.initialize().await;

        if self.once {
            let summary = orchestrator.run_cycle().await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            return Ok(());
        }

        tracing::info!(interval_secs, "Starting trading loop");
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    orchestrator.run_cycle().await;
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutdown requested");
                    break;
                }
            }
        }

        if close_on_shutdown {
            let summary = orchestrator.end_session().await;
            tracing::info!(
                closed = summary.closed.len(),
                still_open = orchestrator.ledger().open_count(),
                "Session ended"
            );
        }

        Ok(())
    }
}
