//! Test double for the order gateway.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{OrderError, OrderGateway, Result};

/// Record of one created order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedOrder {
    pub order_id: Uuid,
    pub auction_id: Uuid,
    pub winner_id: Uuid,
    pub amount: i64,
}

/// Gateway that fabricates order ids and remembers every call.
#[derive(Default)]
pub struct MockOrderGateway {
    created: RwLock<Vec<CreatedOrder>>,
    fail: AtomicBool,
}

impl MockOrderGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub async fn created(&self) -> Vec<CreatedOrder> {
        self.created.read().await.clone()
    }
}

#[async_trait]
impl OrderGateway for MockOrderGateway {
    async fn create_order(&self, auction_id: Uuid, winner_id: Uuid, amount: i64) -> Result<Uuid> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(OrderError::Failed("injected failure".into()));
        }
        let order = CreatedOrder {
            order_id: Uuid::new_v4(),
            auction_id,
            winner_id,
            amount,
        };
        let order_id = order.order_id;
        self.created.write().await.push(order);
        Ok(order_id)
    }
}
