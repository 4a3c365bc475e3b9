//! Execution engine module
//!
//! Acquires and releases capital at a quoted price. Only paper fills exist;
//! exchange-side matching is outside this crate.

mod paper;
mod types;

pub use paper::PaperEngine;
pub use types::{Fill, Order, OrderId, OrderIntent};

use async_trait::async_trait;

/// Trait for execution engine implementations
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Open exposure: buy for longs, sell for shorts
    async fn acquire(&self, order: Order) -> anyhow::Result<Fill>;
    /// Close exposure previously acquired
    async fn release(&self, order: Order) -> anyhow::Result<Fill>;
    /// All fills so far
    async fn fills(&self) -> anyhow::Result<Vec<Fill>>;
}
