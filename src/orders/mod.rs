//! Order creation seam.
//!
//! Completing a purchase hands off to the marketplace's order system
//! through [`OrderGateway`]. The engine only needs the resulting order
//! id; fulfillment, shipping, and invoicing live elsewhere.

use async_trait::async_trait;
use uuid::Uuid;

pub mod mock;

pub type Result<T> = std::result::Result<T, OrderError>;

/// Errors from order creation.
#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("Order creation failed: {0}")]
    Failed(String),

    #[error("No order gateway configured")]
    Unconfigured,
}

#[async_trait]
pub trait OrderGateway: Send + Sync {
    /// Create the order the winner pays against; returns its id.
    async fn create_order(&self, auction_id: Uuid, winner_id: Uuid, amount: i64) -> Result<Uuid>;
}

/// Gateway for deployments that never complete purchases, such as the
/// timer worker. Always errors.
pub struct UnconfiguredGateway;

#[async_trait]
impl OrderGateway for UnconfiguredGateway {
    async fn create_order(&self, _auction_id: Uuid, _winner_id: Uuid, _amount: i64) -> Result<Uuid> {
        Err(OrderError::Unconfigured)
    }
}
