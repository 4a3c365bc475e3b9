//! In-memory store

use super::state::StoreState;
use super::{BalanceSnapshot, BotStatus, PersistenceClient, PersistenceError, TradeRecord, TradeStatus};
use crate::risk::Balance;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Volatile store for paper runs and tests
///
/// Can be switched unavailable to simulate a backend outage.
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            available: AtomicBool::new(true),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call succeed or fail with `Unavailable`
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn state(&self) -> Result<MutexGuard<'_, StoreState>, PersistenceError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable("memory store switched off".into()));
        }
        Ok(self.state.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

#[async_trait]
impl PersistenceClient for MemoryStore {
    async fn save_trade(&self, record: &TradeRecord) -> Result<(), PersistenceError> {
        self.state()?.save_trade(record);
        Ok(())
    }

    async fn get_trades(&self, status: Option<TradeStatus>) -> Result<Vec<TradeRecord>, PersistenceError> {
        Ok(self.state()?.trades(status))
    }

    async fn update_balance(&self, balance: &Balance, at: DateTime<Utc>) -> Result<(), PersistenceError> {
        self.state()?.push_balance(BalanceSnapshot::new(balance, at));
        Ok(())
    }

    async fn get_latest_balance(&self) -> Result<Option<BalanceSnapshot>, PersistenceError> {
        Ok(self.state()?.latest_balance())
    }

    async fn update_heartbeat(
        &self,
        status: &str,
        open_positions: usize,
        mode: &str,
        at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        self.state()?.set_bot_status(BotStatus {
            status: status.to_string(),
            last_heartbeat: at,
            open_positions,
            mode: mode.to_string(),
        });
        Ok(())
    }

    async fn get_bot_status(&self) -> Result<Option<BotStatus>, PersistenceError> {
        Ok(self.state()?.bot_status())
    }

    async fn save_cooldown(&self, symbol: &str, last_trade: DateTime<Utc>) -> Result<(), PersistenceError> {
        self.state()?.save_cooldown(symbol, last_trade);
        Ok(())
    }

    async fn get_cooldowns(&self) -> Result<HashMap<String, DateTime<Utc>>, PersistenceError> {
        Ok(self.state()?.cooldowns())
    }

    async fn clear_expired_cooldowns(&self, minutes: u32, now: DateTime<Utc>) -> Result<usize, PersistenceError> {
        Ok(self.state()?.clear_expired_cooldowns(minutes, now))
    }
}
