//! Status command implementation

use crate::config::Config;
use crate::persistence::{open_store, TradeStatus};

/// Print the last heartbeat, latest balance and open trades
pub async fn show_status(config: &Config) -> anyhow::Result<()> {
    let store = open_store(&config.persistence).await?;

    println!("swing-alloc status");
    match store.get_bot_status().await? {
        Some(status) => {
            println!("  Status: {}", status.status);
            println!("  Mode: {}", status.mode);
            println!("  Last heartbeat: {}", status.last_heartbeat);
            println!("  Open positions: {}", status.open_positions);
        }
        None => println!("  Status: never run"),
    }

    if let Some(balance) = store.get_latest_balance().await? {
        println!(
            "  Balance: total {} / free {} / used {} (at {})",
            balance.total.round_dp(2),
            balance.free.round_dp(2),
            balance.used.round_dp(2),
            balance.timestamp
        );
    }

    for trade in store.get_trades(Some(TradeStatus::Open)).await? {
        println!(
            "  {} {} {} @ {} (stop {}, target {})",
            trade.symbol, trade.side, trade.amount, trade.entry_price, trade.stop_loss, trade.take_profit
        );
    }

    Ok(())
}
