//! Durable state
//!
//! Trades, balance snapshots, cooldowns and the bot heartbeat behind one
//! async trait. The in-memory state of the allocator stays authoritative;
//! stores only mirror it.

mod failover;
mod json_file;
mod memory;
mod sqlite;
mod state;
mod types;

pub use failover::FailoverStore;
pub use json_file::JsonFileStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use types::{BalanceSnapshot, BotStatus, PersistenceError, TradeRecord, TradeStatus};

use crate::config::PersistenceConfig;
use crate::risk::Balance;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Read/write contract for storage backends
#[async_trait]
pub trait PersistenceClient: Send + Sync {
    /// Insert or replace a trade by id
    async fn save_trade(&self, record: &TradeRecord) -> Result<(), PersistenceError>;
    /// Trades ordered by entry time, optionally filtered by status
    async fn get_trades(&self, status: Option<TradeStatus>) -> Result<Vec<TradeRecord>, PersistenceError>;
    /// Append a balance snapshot
    async fn update_balance(&self, balance: &Balance, at: DateTime<Utc>) -> Result<(), PersistenceError>;
    async fn get_latest_balance(&self) -> Result<Option<BalanceSnapshot>, PersistenceError>;
    async fn update_heartbeat(
        &self,
        status: &str,
        open_positions: usize,
        mode: &str,
        at: DateTime<Utc>,
    ) -> Result<(), PersistenceError>;
    async fn get_bot_status(&self) -> Result<Option<BotStatus>, PersistenceError>;
    async fn save_cooldown(&self, symbol: &str, last_trade: DateTime<Utc>) -> Result<(), PersistenceError>;
    async fn get_cooldowns(&self) -> Result<HashMap<String, DateTime<Utc>>, PersistenceError>;
    /// Drop cooldowns older than `minutes`; returns how many were removed
    async fn clear_expired_cooldowns(&self, minutes: u32, now: DateTime<Utc>) -> Result<usize, PersistenceError>;
}

/// Build the configured store
///
/// With a `database_url` the SQLite store is primary and the JSON file is the
/// fallback behind a circuit breaker; otherwise the JSON file is used alone.
pub async fn open_store(config: &PersistenceConfig) -> anyhow::Result<Arc<dyn PersistenceClient>> {
    let local: Arc<dyn PersistenceClient> = Arc::new(JsonFileStore::open(&config.fallback_path).await?);

    let Some(url) = &config.database_url else {
        tracing::info!(path = %config.fallback_path.display(), "Using local file store");
        return Ok(local);
    };

    let primary: Arc<dyn PersistenceClient> = match SqliteStore::connect(url).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::warn!(error = %e, "Primary store unreachable at startup, using local file store");
            return Ok(local);
        }
    };

    Ok(Arc::new(FailoverStore::new(
        primary,
        local,
        Duration::from_secs(config.reprobe_interval_secs),
    )))
}
