//! Local JSON file store
//!
//! Whole-document store used as the secondary backend. Every write rewrites
//! the file through a temp file and rename, so a crash never leaves a
//! half-written document behind.

use super::state::StoreState;
use super::{BalanceSnapshot, BotStatus, PersistenceClient, PersistenceError, TradeRecord, TradeStatus};
use crate::risk::Balance;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// JSON document store
pub struct JsonFileStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

impl JsonFileStore {
    /// Open the store, loading existing state when the file exists
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let path = path.as_ref().to_path_buf();

        let state = match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => StoreState::default(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(path = %path.display(), "Opened JSON store");
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `update` and flush the document
    async fn write<T>(&self, update: impl FnOnce(&mut StoreState) -> T) -> Result<T, PersistenceError> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let out = update(&mut next);

        self.flush(&next).await?;
        *state = next;
        Ok(out)
    }

    async fn flush(&self, state: &StoreState) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let body = serde_json::to_vec_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl PersistenceClient for JsonFileStore {
    async fn save_trade(&self, record: &TradeRecord) -> Result<(), PersistenceError> {
        self.write(|s| s.save_trade(record)).await
    }

    async fn get_trades(&self, status: Option<TradeStatus>) -> Result<Vec<TradeRecord>, PersistenceError> {
        Ok(self.state.lock().await.trades(status))
    }

    async fn update_balance(&self, balance: &Balance, at: DateTime<Utc>) -> Result<(), PersistenceError> {
        let snapshot = BalanceSnapshot::new(balance, at);
        self.write(|s| s.push_balance(snapshot)).await
    }

    async fn get_latest_balance(&self) -> Result<Option<BalanceSnapshot>, PersistenceError> {
        Ok(self.state.lock().await.latest_balance())
    }

    async fn update_heartbeat(
        &self,
        status: &str,
        open_positions: usize,
        mode: &str,
        at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        let status = BotStatus {
            status: status.to_string(),
            last_heartbeat: at,
            open_positions,
            mode: mode.to_string(),
        };
        self.write(|s| s.set_bot_status(status)).await
    }

    async fn get_bot_status(&self) -> Result<Option<BotStatus>, PersistenceError> {
        Ok(self.state.lock().await.bot_status())
    }

    async fn save_cooldown(&self, symbol: &str, last_trade: DateTime<Utc>) -> Result<(), PersistenceError> {
        self.write(|s| s.save_cooldown(symbol, last_trade)).await
    }

    async fn get_cooldowns(&self) -> Result<HashMap<String, DateTime<Utc>>, PersistenceError> {
        Ok(self.state.lock().await.cooldowns())
    }

    async fn clear_expired_cooldowns(&self, minutes: u32, now: DateTime<Utc>) -> Result<usize, PersistenceError> {
        self.write(|s| s.clear_expired_cooldowns(minutes, now)).await
    }
}
