//! Joining an auction.

use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::info;
use uuid::Uuid;

use super::{AuctionEngine, EngineError, Result};
use crate::hub::AuctionEvent;
use crate::ledger;
use crate::model::{AffectedField, Auction, AuctionParticipant, AuctionStatus, EntryType};
use crate::storage;

/// What a successful join produced.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub participant: AuctionParticipant,
    /// Auction state after the join.
    pub auction: Auction,
}

impl AuctionEngine {
    /// Join a user into an auction, debiting the deposit.
    ///
    /// Joining is open while the auction is scheduled or active. The
    /// deposit debit, the participant row, and the counter update
    /// commit atomically; any rejection leaves the wallet untouched.
    #[tracing::instrument(name = "engine.join_auction", skip(self), fields(%user_id, %auction_id))]
    pub async fn join_auction(&self, user_id: Uuid, auction_id: Uuid) -> Result<JoinOutcome> {
        if user_id.is_nil() || auction_id.is_nil() {
            return Err(EngineError::Validation(
                "user and auction ids are required".into(),
            ));
        }

        let _guard = self.locks.acquire(auction_id).await;

        let mut conn = self
            .store
            .pool()
            .acquire()
            .await
            .map_err(storage::StorageError::from)?;
        storage::begin_immediate(&mut conn).await?;
        let outcome = match join_in_txn(&mut conn, user_id, auction_id).await {
            Ok(outcome) => {
                storage::commit(&mut conn).await?;
                outcome
            }
            Err(e) => {
                storage::rollback(&mut conn).await;
                return Err(e);
            }
        };
        drop(conn);

        info!(
            deposit = outcome.participant.deposit_amount,
            participants = outcome.auction.total_participants,
            "User joined auction"
        );

        self.hub
            .publish(AuctionEvent::NewParticipant {
                auction_id,
                user_id,
                total_participants: outcome.auction.total_participants,
            })
            .await;

        Ok(outcome)
    }
}

async fn join_in_txn(
    conn: &mut SqliteConnection,
    user_id: Uuid,
    auction_id: Uuid,
) -> Result<JoinOutcome> {
    let mut auction = storage::auctions::get_tx(conn, auction_id).await?;

    match auction.status {
        AuctionStatus::Scheduled | AuctionStatus::Active => {}
        _ => return Err(EngineError::AuctionEnded),
    }
    if auction.seller_id == user_id {
        return Err(EngineError::SellerCannotJoin);
    }
    if storage::participants::find_for_user(conn, auction_id, user_id)
        .await?
        .is_some()
    {
        return Err(EngineError::DuplicateParticipation);
    }

    let entry = ledger::apply(
        conn,
        user_id,
        -auction.deposit_amount,
        EntryType::Deposit,
        AffectedField::Balance,
        Some(auction.id),
        Some("auction"),
    )
    .await?;

    let participant = AuctionParticipant {
        id: Uuid::new_v4(),
        auction_id,
        user_id,
        deposit_amount: auction.deposit_amount,
        deposit_entry_id: entry.id,
        is_refunded: false,
        created_at: Utc::now(),
    };
    if let Err(e) = storage::participants::insert(conn, &participant).await {
        // Backstop for a race the pre-check cannot see.
        if e.is_unique_violation() {
            return Err(EngineError::DuplicateParticipation);
        }
        return Err(e.into());
    }

    auction.total_participants += 1;
    storage::auctions::update(conn, &auction).await?;

    Ok(JoinOutcome {
        participant,
        auction,
    })
}
