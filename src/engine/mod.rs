//! Auction transaction engine.
//!
//! One [`AuctionEngine`] owns every state-changing auction operation.
//! Each operation takes the auction's in-process lock, then runs its
//! validations, ledger movements, and task-queue changes inside a
//! single immediate transaction. Only after commit does it touch the
//! non-durable surfaces: the event hub and the notification queue.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;
use uuid::Uuid;

use crate::config::BusinessConfig;
use crate::hub::EventHub;
use crate::ledger::LedgerError;
use crate::model::{Auction, AuctionBid, AuctionParticipant};
use crate::notify::QueuedNotifier;
use crate::orders::{OrderError, OrderGateway};
use crate::scheduler::{Scheduler, SchedulerError, TaskError, TaskHandler, TaskKind, TaskPayload};
use crate::storage::{self, StorageError, Store};

mod bidding;
mod lifecycle;
mod locks;
mod participation;

pub use bidding::BidOutcome;
pub use lifecycle::CreateAuction;
pub use locks::KeyedLocks;
pub use participation::JoinOutcome;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors from engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Auction is not open for bidding")]
    AuctionEnded,

    #[error("Bid must be at least {minimum}")]
    BidTooLow { minimum: i64 },

    #[error("User has not joined this auction")]
    NotParticipant,

    #[error("User already joined this auction")]
    DuplicateParticipation,

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: i64, available: i64 },

    #[error("Seller cannot join their own auction")]
    SellerCannotJoin,

    #[error("Auction has no winner")]
    NoWinner,

    #[error("Only the winner can complete this purchase")]
    NotWinner,

    #[error("Auction is not awaiting payment")]
    NotAwaitingPayment,

    #[error("Order already created for this auction")]
    AlreadyOrdered,

    #[error("Auction can no longer be canceled")]
    CannotCancel,

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Order(#[from] OrderError),
}

impl EngineError {
    /// Whether this is a missing-row error, as opposed to a rule
    /// rejection or an infrastructure failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::Storage(e) if e.is_not_found())
    }
}

impl From<LedgerError> for EngineError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientFunds {
                required,
                available,
            } => EngineError::InsufficientBalance {
                required,
                available,
            },
            LedgerError::NonPositiveAmount(n) => {
                EngineError::Validation(format!("amount must be positive, got {n}"))
            }
            LedgerError::Storage(e) => EngineError::Storage(e),
        }
    }
}

/// Coordinates bids, participation, lifecycle, money movement, and
/// event fan-out for all auctions.
pub struct AuctionEngine {
    store: Arc<Store>,
    hub: Arc<EventHub>,
    notifier: Arc<QueuedNotifier>,
    orders: Arc<dyn OrderGateway>,
    scheduler: Arc<Scheduler>,
    locks: KeyedLocks,
    business: BusinessConfig,
}

impl AuctionEngine {
    pub fn new(
        store: Arc<Store>,
        hub: Arc<EventHub>,
        notifier: Arc<QueuedNotifier>,
        orders: Arc<dyn OrderGateway>,
        scheduler: Arc<Scheduler>,
        business: BusinessConfig,
    ) -> Self {
        Self {
            store,
            hub,
            notifier,
            orders,
            scheduler,
            locks: KeyedLocks::new(),
            business,
        }
    }

    /// Event hub carrying this engine's auction events.
    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Current auction state.
    pub async fn auction(&self, auction_id: Uuid) -> Result<Auction> {
        Ok(storage::auctions::get(self.store.pool(), auction_id).await?)
    }

    /// Accepted bids for an auction, oldest first.
    pub async fn bids(&self, auction_id: Uuid) -> Result<Vec<AuctionBid>> {
        Ok(storage::bids::list_for_auction(self.store.pool(), auction_id).await?)
    }

    /// Participants of an auction in join order.
    pub async fn participants(&self, auction_id: Uuid) -> Result<Vec<AuctionParticipant>> {
        Ok(storage::participants::list_for_auction(self.store.pool(), auction_id).await?)
    }
}

#[async_trait]
impl TaskHandler for AuctionEngine {
    async fn handle(
        &self,
        kind: TaskKind,
        payload: &TaskPayload,
    ) -> std::result::Result<(), TaskError> {
        let auction_id = payload.auction_id;
        let result = match kind {
            TaskKind::StartAuction => self.start_auction(auction_id).await.map(|_| ()),
            TaskKind::EndAuction => self.end_auction(auction_id).await.map(|_| ()),
            TaskKind::CheckWinnerPayment => {
                self.check_winner_payment(auction_id).await.map(|_| ())
            }
            TaskKind::PaymentReminder => {
                self.send_payment_reminder(auction_id, payload.reminder_sequence)
                    .await
            }
        };

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                // The auction is gone; a retry cannot bring it back.
                warn!(auction = %auction_id, kind = kind.as_str(), "Task target missing, skipping");
                Ok(())
            }
            Err(EngineError::Storage(e)) => Err(TaskError::Transient(e.to_string())),
            Err(EngineError::Scheduler(e)) => Err(TaskError::Transient(e.to_string())),
            Err(e) => Err(TaskError::Permanent(e.to_string())),
        }
    }
}
