//! Primary/secondary store with a circuit breaker
//!
//! Calls go to the primary until it fails. The breaker then trips and calls
//! go to the secondary; once `reprobe_interval` has elapsed the next call
//! tries the primary again and a success closes the breaker.
//!
//! Closing the breaker copies what the secondary received during the outage
//! back into the primary. Reads served by the primary are also merged with
//! the secondary, so outage writes survive a restart even when that copy
//! never ran.

use super::{BalanceSnapshot, BotStatus, PersistenceClient, PersistenceError, TradeRecord, TradeStatus};
use crate::risk::Balance;
use crate::signal::Side;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Which backend answered a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Served {
    Primary,
    Secondary,
}

pub struct FailoverStore {
    primary: Arc<dyn PersistenceClient>,
    secondary: Arc<dyn PersistenceClient>,
    reprobe_interval: Duration,
    tripped_at: Mutex<Option<Instant>>,
}

impl FailoverStore {
    pub fn new(
        primary: Arc<dyn PersistenceClient>,
        secondary: Arc<dyn PersistenceClient>,
        reprobe_interval: Duration,
    ) -> Self {
        Self {
            primary,
            secondary,
            reprobe_interval,
            tripped_at: Mutex::new(None),
        }
    }

    /// True while calls bypass the primary
    pub fn is_tripped(&self) -> bool {
        self.tripped_at.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    fn should_try_primary(&self) -> bool {
        match *self.tripped_at.lock().unwrap_or_else(|e| e.into_inner()) {
            None => true,
            Some(at) => at.elapsed() >= self.reprobe_interval,
        }
    }

    fn trip(&self) {
        *self.tripped_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
    }

    /// Close the breaker; true if it was open
    fn close(&self) -> bool {
        self.tripped_at.lock().unwrap_or_else(|e| e.into_inner()).take().is_some()
    }

    /// Copy trades, cooldowns and a newer balance snapshot from the
    /// secondary into the primary; returns how many trades were written
    pub async fn resync(&self) -> Result<usize, PersistenceError> {
        let primary_trades: HashMap<Uuid, TradeRecord> = self
            .primary
            .get_trades(None)
            .await?
            .into_iter()
            .map(|t| (t.id, t))
            .collect();

        let mut copied = 0;
        for trade in self.secondary.get_trades(None).await? {
            let merged = match primary_trades.get(&trade.id) {
                Some(existing) => newest_trade(existing.clone(), trade),
                None => trade,
            };
            if primary_trades.get(&merged.id) != Some(&merged) {
                self.primary.save_trade(&merged).await?;
                copied += 1;
            }
        }

        let primary_cooldowns = self.primary.get_cooldowns().await?;
        for (symbol, at) in self.secondary.get_cooldowns().await? {
            if primary_cooldowns.get(&symbol).map_or(true, |existing| *existing < at) {
                self.primary.save_cooldown(&symbol, at).await?;
            }
        }

        if let Some(snapshot) = self.secondary.get_latest_balance().await? {
            let stale = self
                .primary
                .get_latest_balance()
                .await?
                .map_or(true, |existing| existing.timestamp < snapshot.timestamp);
            if stale {
                self.primary.update_balance(&snapshot.balance(), snapshot.timestamp).await?;
            }
        }

        Ok(copied)
    }

    async fn route<T, F, Fut>(&self, op: &'static str, call: F) -> Result<T, PersistenceError>
    where
        F: Fn(Arc<dyn PersistenceClient>) -> Fut,
        Fut: Future<Output = Result<T, PersistenceError>>,
    {
        self.route_served(op, call).await.map(|(value, _)| value)
    }

    async fn route_served<T, F, Fut>(&self, op: &'static str, call: F) -> Result<(T, Served), PersistenceError>
    where
        F: Fn(Arc<dyn PersistenceClient>) -> Fut,
        Fut: Future<Output = Result<T, PersistenceError>>,
    {
        if self.should_try_primary() {
            match call(Arc::clone(&self.primary)).await {
                Ok(value) => {
                    if self.close() {
                        tracing::info!("Primary store recovered");
                        match self.resync().await {
                            Ok(copied) => tracing::info!(trades = copied, "Local store writes copied to primary"),
                            Err(e) => tracing::warn!(error = %e, "Failed to copy local store writes to primary"),
                        }
                    }
                    return Ok((value, Served::Primary));
                }
                Err(e) => {
                    tracing::warn!(op, error = %e, "Primary store failed, falling back to local store");
                    metrics::counter!("swing_store_failovers_total").increment(1);
                    self.trip();
                }
            }
        }

        call(Arc::clone(&self.secondary))
            .await
            .map(|value| (value, Served::Secondary))
            .inspect_err(|e| {
                tracing::error!(op, error = %e, "Local store failed");
            })
    }

    /// Read through the breaker; a primary answer is merged with a best
    /// effort read of the secondary
    async fn read_merged<T, F, Fut, M>(&self, op: &'static str, call: F, merge: M) -> Result<T, PersistenceError>
    where
        F: Fn(Arc<dyn PersistenceClient>) -> Fut,
        Fut: Future<Output = Result<T, PersistenceError>>,
        M: FnOnce(T, T) -> T,
    {
        let (value, served) = self.route_served(op, &call).await?;
        if served == Served::Secondary {
            return Ok(value);
        }

        match call(Arc::clone(&self.secondary)).await {
            Ok(local) => Ok(merge(value, local)),
            Err(e) => {
                tracing::debug!(op, error = %e, "Local store unreadable, using primary only");
                Ok(value)
            }
        }
    }
}

/// Pick the more advanced of two copies of the same trade
///
/// A close beats an open; between two opens the tighter stop wins since
/// stops only ever ratchet toward profit.
fn newest_trade(a: TradeRecord, b: TradeRecord) -> TradeRecord {
    match (a.status, b.status) {
        (TradeStatus::Closed, _) => a,
        (_, TradeStatus::Closed) => b,
        _ => {
            let tighter = match a.side {
                Side::Long => b.stop_loss > a.stop_loss,
                Side::Short => b.stop_loss < a.stop_loss,
            };
            if tighter {
                b
            } else {
                a
            }
        }
    }
}

fn merge_trades(primary: Vec<TradeRecord>, local: Vec<TradeRecord>) -> Vec<TradeRecord> {
    let mut by_id: HashMap<Uuid, TradeRecord> = HashMap::with_capacity(primary.len());
    for trade in primary.into_iter().chain(local) {
        let merged = match by_id.remove(&trade.id) {
            Some(existing) => newest_trade(existing, trade),
            None => trade,
        };
        by_id.insert(merged.id, merged);
    }

    let mut trades: Vec<TradeRecord> = by_id.into_values().collect();
    trades.sort_by_key(|t| (t.entry_time, t.id));
    trades
}

fn merge_cooldowns(
    mut primary: HashMap<String, DateTime<Utc>>,
    local: HashMap<String, DateTime<Utc>>,
) -> HashMap<String, DateTime<Utc>> {
    for (symbol, at) in local {
        let entry = primary.entry(symbol).or_insert(at);
        *entry = (*entry).max(at);
    }
    primary
}

#[async_trait]
impl PersistenceClient for FailoverStore {
    async fn save_trade(&self, record: &TradeRecord) -> Result<(), PersistenceError> {
        self.route("save_trade", |s| async move { s.save_trade(record).await })
            .await
    }

    async fn get_trades(&self, status: Option<TradeStatus>) -> Result<Vec<TradeRecord>, PersistenceError> {
        // Status is filtered after the merge: a trade may be closed in only one store
        let trades = self
            .read_merged("get_trades", |s| async move { s.get_trades(None).await }, merge_trades)
            .await?;
        Ok(trades
            .into_iter()
            .filter(|t| status.map_or(true, |status| t.status == status))
            .collect())
    }

    async fn update_balance(&self, balance: &Balance, at: DateTime<Utc>) -> Result<(), PersistenceError> {
        self.route("update_balance", |s| async move { s.update_balance(balance, at).await })
            .await
    }

    async fn get_latest_balance(&self) -> Result<Option<BalanceSnapshot>, PersistenceError> {
        self.read_merged(
            "get_latest_balance",
            |s| async move { s.get_latest_balance().await },
            |primary, local| match (primary, local) {
                (Some(p), Some(l)) => Some(if l.timestamp > p.timestamp { l } else { p }),
                (p, l) => p.or(l),
            },
        )
        .await
    }

    async fn update_heartbeat(
        &self,
        status: &str,
        open_positions: usize,
        mode: &str,
        at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        self.route("update_heartbeat", |s| async move {
            s.update_heartbeat(status, open_positions, mode, at).await
        })
        .await
    }

    async fn get_bot_status(&self) -> Result<Option<BotStatus>, PersistenceError> {
        self.read_merged(
            "get_bot_status",
            |s| async move { s.get_bot_status().await },
            |primary, local| match (primary, local) {
                (Some(p), Some(l)) => Some(if l.last_heartbeat > p.last_heartbeat { l } else { p }),
                (p, l) => p.or(l),
            },
        )
        .await
    }

    async fn save_cooldown(&self, symbol: &str, last_trade: DateTime<Utc>) -> Result<(), PersistenceError> {
        self.route("save_cooldown", |s| async move { s.save_cooldown(symbol, last_trade).await })
            .await
    }

    async fn get_cooldowns(&self) -> Result<HashMap<String, DateTime<Utc>>, PersistenceError> {
        self.read_merged("get_cooldowns", |s| async move { s.get_cooldowns().await }, merge_cooldowns)
            .await
    }

    async fn clear_expired_cooldowns(&self, minutes: u32, now: DateTime<Utc>) -> Result<usize, PersistenceError> {
        let (removed, served) = self
            .route_served("clear_expired_cooldowns", |s| async move {
                s.clear_expired_cooldowns(minutes, now).await
            })
            .await?;
        // Keep the local copy from resurrecting expired entries on merge
        if served == Served::Primary {
            if let Err(e) = self.secondary.clear_expired_cooldowns(minutes, now).await {
                tracing::debug!(error = %e, "Failed to clear local cooldowns");
            }
        }
        Ok(removed)
    }
}
