//! Advisory side channels
//!
//! Notifications and periodic learning hooks. Both are best effort: the
//! orchestrator logs their failures and carries on.

use crate::risk::{CloseReason, ClosedPosition};
use crate::signal::Side;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;

/// Something worth telling an operator about
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    TradeOpened {
        symbol: String,
        side: Side,
        price: Decimal,
        amount: Decimal,
        confidence: Decimal,
    },
    TradeClosed {
        symbol: String,
        side: Side,
        reason: CloseReason,
        exit_price: Decimal,
        net_pnl: Decimal,
    },
    /// A weaker holding was closed to fund a stronger opportunity
    Swapped {
        closed: String,
        opened: String,
        score_gap: Decimal,
    },
    /// Trading halted for the day
    Halted { reason: String },
    Critical(String),
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::TradeOpened {
                symbol,
                side,
                price,
                amount,
                confidence,
            } => write!(f, "opened {side} {symbol}: {amount} @ {price} (confidence {confidence})"),
            Event::TradeClosed {
                symbol,
                side,
                reason,
                exit_price,
                net_pnl,
            } => write!(f, "closed {side} {symbol} @ {exit_price} [{reason}] net {net_pnl:.2}"),
            Event::Swapped {
                closed,
                opened,
                score_gap,
            } => write!(f, "swapped {closed} for {opened} (gap {score_gap})"),
            Event::Halted { reason } => write!(f, "trading halted: {reason}"),
            Event::Critical(message) => write!(f, "critical: {message}"),
        }
    }
}

/// Outbound notification channel
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn emit(&self, event: &Event) -> anyhow::Result<()>;
}

/// Periodic self-tuning hook, run once per trading day
#[async_trait]
pub trait AutoLearner: Send + Sync {
    async fn periodic_adjustment(&self, history: &[ClosedPosition], now: DateTime<Utc>) -> anyhow::Result<()>;
}

/// Writes events to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn emit(&self, event: &Event) -> anyhow::Result<()> {
        match event {
            Event::Critical(_) | Event::Halted { .. } => tracing::warn!(event = %event, "Notification"),
            _ => tracing::info!(event = %event, "Notification"),
        }
        Ok(())
    }
}
