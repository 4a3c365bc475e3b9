//! Document state shared by the memory and JSON file stores

use super::types::{BalanceSnapshot, BotStatus, TradeRecord, TradeStatus};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Hourly snapshots for 30 days
const MAX_BALANCE_HISTORY: usize = 720;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct StoreState {
    trades: Vec<TradeRecord>,
    balances: Vec<BalanceSnapshot>,
    cooldowns: BTreeMap<String, DateTime<Utc>>,
    bot_status: Option<BotStatus>,
}

impl StoreState {
    pub fn save_trade(&mut self, record: &TradeRecord) {
        match self.trades.iter_mut().find(|t| t.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => self.trades.push(record.clone()),
        }
    }

    pub fn trades(&self, status: Option<TradeStatus>) -> Vec<TradeRecord> {
        let mut trades: Vec<TradeRecord> = self
            .trades
            .iter()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        trades.sort_by_key(|t| t.entry_time);
        trades
    }

    pub fn push_balance(&mut self, snapshot: BalanceSnapshot) {
        self.balances.retain(|b| b.timestamp != snapshot.timestamp);
        self.balances.push(snapshot);
        self.balances.sort_by_key(|b| b.timestamp);
        if self.balances.len() > MAX_BALANCE_HISTORY {
            let excess = self.balances.len() - MAX_BALANCE_HISTORY;
            self.balances.drain(..excess);
        }
    }

    pub fn latest_balance(&self) -> Option<BalanceSnapshot> {
        self.balances.last().copied()
    }

    pub fn set_bot_status(&mut self, status: BotStatus) {
        self.bot_status = Some(status);
    }

    pub fn bot_status(&self) -> Option<BotStatus> {
        self.bot_status.clone()
    }

    pub fn save_cooldown(&mut self, symbol: &str, last_trade: DateTime<Utc>) {
        self.cooldowns.insert(symbol.to_string(), last_trade);
    }

    pub fn cooldowns(&self) -> HashMap<String, DateTime<Utc>> {
        self.cooldowns.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }

    pub fn clear_expired_cooldowns(&mut self, minutes: u32, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::minutes(i64::from(minutes));
        let before = self.cooldowns.len();
        self.cooldowns.retain(|_, last| *last >= cutoff);
        before - self.cooldowns.len()
    }
}
