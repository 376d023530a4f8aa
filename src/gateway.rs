//! Broker and market-data seams.
//!
//! The controller talks to the outside world only through these traits.
//! Fills arrive asynchronously on the channel handed to the gateway; a
//! submission acknowledges receipt, it never implies execution. The
//! bundled paper gateway fills orders instantly for dry runs and tests.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::{Fill, OrderRequest, OrderStatus};
use crate::error::{Result, WardenError};

#[async_trait]
pub trait BrokerGateway: Send + Sync {
    /// Gateway identifier for logs and telemetry
    fn name(&self) -> &str;

    /// Submit an order. Success means the broker accepted the request;
    /// position state only changes when a fill arrives on the fill
    /// channel. The caller bounds this with its own timeout.
    async fn submit_order(&self, order: &OrderRequest) -> Result<()>;

    /// Best-effort cancel of a resting order
    async fn cancel_order(&self, order_id: Uuid) -> Result<()>;
}

#[async_trait]
pub trait MarketData: Send + Sync {
    /// Last traded price; None when the symbol has no quote this tick
    async fn last_price(&self, symbol: &str) -> Option<Decimal>;

    /// Average true range, when the feed computes one
    async fn atr(&self, symbol: &str) -> Option<Decimal>;
}

// ==================== Paper gateway ====================

/// Fills every order instantly at the requested price. Dry runs and
/// integration tests only.
pub struct PaperGateway {
    fill_tx: mpsc::Sender<Fill>,
}

impl PaperGateway {
    pub fn new(fill_tx: mpsc::Sender<Fill>) -> Self {
        Self { fill_tx }
    }
}

#[async_trait]
impl BrokerGateway for PaperGateway {
    fn name(&self) -> &str {
        "paper"
    }

    async fn submit_order(&self, order: &OrderRequest) -> Result<()> {
        let fill = Fill {
            order_id: order.order_id,
            symbol: order.symbol.clone(),
            side: order.side,
            filled_qty: order.qty,
            fill_price: order.price,
            status: OrderStatus::Filled,
            strategy: order.strategy.clone(),
            timestamp: Utc::now(),
        };
        info!(
            symbol = %order.symbol,
            side = %order.side,
            qty = %order.qty,
            price = %order.price,
            "paper fill"
        );
        self.fill_tx
            .send(fill)
            .await
            .map_err(|e| WardenError::OrderSubmission(format!("fill channel closed: {e}")))?;
        Ok(())
    }

    async fn cancel_order(&self, order_id: Uuid) -> Result<()> {
        debug!(%order_id, "paper cancel is a no-op");
        Ok(())
    }
}

/// Static price table, for tests and offline rebuilds.
#[derive(Default)]
pub struct StaticMarketData {
    prices: std::collections::HashMap<String, Decimal>,
    atrs: std::collections::HashMap<String, Decimal>,
}

impl StaticMarketData {
    pub fn set_price(&mut self, symbol: &str, price: Decimal) {
        self.prices.insert(symbol.to_string(), price);
    }

    pub fn set_atr(&mut self, symbol: &str, atr: Decimal) {
        self.atrs.insert(symbol.to_string(), atr);
    }
}

#[async_trait]
impl MarketData for StaticMarketData {
    async fn last_price(&self, symbol: &str) -> Option<Decimal> {
        self.prices.get(symbol).copied()
    }

    async fn atr(&self, symbol: &str) -> Option<Decimal> {
        self.atrs.get(symbol).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Side;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_paper_gateway_fills_instantly() {
        let (tx, mut rx) = mpsc::channel(8);
        let gateway = PaperGateway::new(tx);

        let order = OrderRequest {
            order_id: Uuid::new_v4(),
            symbol: "NIFTY".to_string(),
            side: Side::Long,
            qty: dec!(10),
            price: dec!(100),
            strategy: "ema".to_string(),
            created_at: Utc::now(),
        };
        gateway.submit_order(&order).await.unwrap();

        let fill = rx.recv().await.unwrap();
        assert_eq!(fill.order_id, order.order_id);
        assert_eq!(fill.filled_qty, dec!(10));
        assert_eq!(fill.status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn test_submit_fails_when_channel_closed() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let gateway = PaperGateway::new(tx);

        let order = OrderRequest {
            order_id: Uuid::new_v4(),
            symbol: "NIFTY".to_string(),
            side: Side::Short,
            qty: dec!(5),
            price: dec!(200),
            strategy: "ema".to_string(),
            created_at: Utc::now(),
        };
        assert!(gateway.submit_order(&order).await.is_err());
    }
}
