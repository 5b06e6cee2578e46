//! Bid placement, the hot path of the engine.

use chrono::{Duration, Utc};
use sqlx::SqliteConnection;
use tracing::info;
use uuid::Uuid;

use super::lifecycle::{refund_participants, schedule_payment_tasks};
use super::{AuctionEngine, EngineError, Result};
use crate::config::BusinessConfig;
use crate::hub::AuctionEvent;
use crate::model::{Auction, AuctionBid, AuctionStatus};
use crate::notify::{Notification, NotificationKind};
use crate::scheduler::{cancel_in, end_key};
use crate::storage;

/// What an accepted bid produced.
#[derive(Debug, Clone)]
pub struct BidOutcome {
    pub bid: AuctionBid,
    /// Auction state after the bid.
    pub auction: Auction,
    /// Holder of the lead before this bid, if any.
    pub previous_bidder: Option<Uuid>,
    /// Whether this bid reached the buy-now price and closed the
    /// auction.
    pub buy_now: bool,
    /// Participants refunded by a buy-now close.
    pub refunded_user_ids: Vec<Uuid>,
}

impl AuctionEngine {
    /// Place a bid.
    ///
    /// The auction must be active and inside its time window, the
    /// amount must clear `current_price + bid_increment`, and the
    /// bidder must have joined. A bid at or above the buy-now price
    /// closes the auction in the same transaction and refunds every
    /// other participant.
    #[tracing::instrument(name = "engine.place_bid", skip(self), fields(%user_id, %auction_id, amount))]
    pub async fn place_bid(
        &self,
        user_id: Uuid,
        auction_id: Uuid,
        amount: i64,
    ) -> Result<BidOutcome> {
        if user_id.is_nil() || auction_id.is_nil() {
            return Err(EngineError::Validation(
                "user and auction ids are required".into(),
            ));
        }
        if amount <= 0 {
            return Err(EngineError::Validation("bid amount must be positive".into()));
        }

        let _guard = self.locks.acquire(auction_id).await;

        let mut conn = self
            .store
            .pool()
            .acquire()
            .await
            .map_err(storage::StorageError::from)?;
        storage::begin_immediate(&mut conn).await?;
        let outcome =
            match bid_in_txn(&mut conn, user_id, auction_id, amount, &self.business).await {
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
            buy_now = outcome.buy_now,
            total_bids = outcome.auction.total_bids,
            "Bid accepted"
        );

        self.hub
            .publish(AuctionEvent::NewBid {
                auction_id,
                bid_id: outcome.bid.id,
                bidder_id: user_id,
                amount,
                total_bids: outcome.auction.total_bids,
            })
            .await;

        if outcome.buy_now {
            self.announce_buy_now(&outcome).await;
        } else if let Some(previous) = outcome.previous_bidder {
            if previous != user_id {
                self.notifier.dispatch(Notification {
                    recipient_id: previous,
                    kind: NotificationKind::Outbid,
                    title: "You have been outbid".into(),
                    message: format!(
                        "A bid of {} now leads the auction for {}.",
                        amount, outcome.auction.item.name
                    ),
                    reference_id: Some(auction_id),
                });
            }
        }

        Ok(outcome)
    }

    /// Post-commit fan-out for a buy-now close.
    async fn announce_buy_now(&self, outcome: &BidOutcome) {
        let auction = &outcome.auction;

        self.hub
            .publish(AuctionEvent::AuctionEnded {
                auction_id: auction.id,
                has_winner: true,
                final_price: auction.current_price,
                total_bids: auction.total_bids,
            })
            .await;

        self.notify_auction_won(auction, outcome.bid.bidder_id);
        self.notify_deposit_refunds(auction, &outcome.refunded_user_ids);
    }
}

async fn bid_in_txn(
    conn: &mut SqliteConnection,
    user_id: Uuid,
    auction_id: Uuid,
    amount: i64,
    business: &BusinessConfig,
) -> Result<BidOutcome> {
    let mut auction = storage::auctions::get_tx(conn, auction_id).await?;

    if auction.status != AuctionStatus::Active {
        return Err(EngineError::AuctionEnded);
    }
    let now = Utc::now();
    if now > auction.end_time {
        return Err(EngineError::AuctionEnded);
    }

    let minimum = auction.current_price + auction.bid_increment;
    if amount < minimum {
        return Err(EngineError::BidTooLow { minimum });
    }

    let participant = storage::participants::find_for_user(conn, auction_id, user_id)
        .await?
        .ok_or(EngineError::NotParticipant)?;

    let previous_bidder = match auction.winning_bid_id {
        Some(previous) => Some(storage::bids::get_tx(conn, previous).await?.bidder_id),
        None => None,
    };

    let bid = AuctionBid {
        id: Uuid::new_v4(),
        auction_id,
        bidder_id: user_id,
        participant_id: participant.id,
        amount,
        created_at: now,
    };
    storage::bids::insert(conn, &bid).await?;

    auction.current_price = amount;
    auction.winning_bid_id = Some(bid.id);
    auction.total_bids += 1;

    let mut buy_now = false;
    let mut refunded_user_ids = Vec::new();
    if auction.buy_now_price.is_some_and(|price| amount >= price) {
        buy_now = true;
        auction.status = AuctionStatus::Ended;
        auction.actual_end_time = Some(now);
        auction.winner_payment_deadline =
            Some(now + Duration::hours(business.payment_window_hours));

        refunded_user_ids = refund_participants(conn, &auction, Some(user_id)).await?;
        cancel_in(conn, &end_key(auction.id)).await?;
        schedule_payment_tasks(conn, &auction, business).await?;
    }

    storage::auctions::update(conn, &auction).await?;

    Ok(BidOutcome {
        bid,
        auction,
        previous_bidder,
        buy_now,
        refunded_user_ids,
    })
}
