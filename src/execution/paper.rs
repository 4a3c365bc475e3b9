//! Paper trading execution engine

use super::{ExecutionEngine, Fill, Order, OrderId};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Paper trading engine: fills immediately at the quoted price
#[derive(Default)]
pub struct PaperEngine {
    fills: Arc<RwLock<Vec<Fill>>>,
}

impl PaperEngine {
    /// Create a new paper trading engine
    pub fn new() -> Self {
        Self::default()
    }

    async fn fill(&self, order: Order) -> anyhow::Result<Fill> {
        if order.price <= Decimal::ZERO || order.amount <= Decimal::ZERO {
            anyhow::bail!("invalid order for {}: {} @ {}", order.symbol, order.amount, order.price);
        }

        let fill = Fill {
            order_id: OrderId::new_v4(),
            symbol: order.symbol,
            side: order.side,
            intent: order.intent,
            price: order.price,
            amount: order.amount,
            timestamp: order.timestamp,
        };

        self.fills.write().await.push(fill.clone());

        tracing::info!(
            order_id = %fill.order_id,
            symbol = %fill.symbol,
            side = %fill.side,
            intent = ?fill.intent,
            price = %fill.price,
            amount = %fill.amount,
            "Paper order filled"
        );
        Ok(fill)
    }
}

#[async_trait]
impl ExecutionEngine for PaperEngine {
    async fn acquire(&self, order: Order) -> anyhow::Result<Fill> {
        self.fill(order).await
    }

    async fn release(&self, order: Order) -> anyhow::Result<Fill> {
        self.fill(order).await
    }

    async fn fills(&self) -> anyhow::Result<Vec<Fill>> {
        Ok(self.fills.read().await.clone())
    }
}
