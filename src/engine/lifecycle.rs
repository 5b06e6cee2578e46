//! Auction lifecycle: creation, timed transitions, and settlement.

use chrono::{DateTime, Duration, Utc};
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{AuctionEngine, EngineError, Result};
use crate::config::BusinessConfig;
use crate::hub::AuctionEvent;
use crate::ledger;
use crate::model::{
    AffectedField, Auction, AuctionStatus, EntryType, ItemSnapshot,
};
use crate::notify::{Notification, NotificationKind};
use crate::scheduler::{
    cancel_in, end_key, payment_key, reminder_key, schedule_in, start_key, TaskKind, TaskPayload,
};
use crate::storage;

/// Parameters for listing a new auction.
#[derive(Debug, Clone)]
pub struct CreateAuction {
    pub seller_id: Uuid,
    pub item: ItemSnapshot,
    pub starting_price: i64,
    pub bid_increment: i64,
    pub buy_now_price: Option<i64>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Settlement work done by a natural end.
struct EndSettlement {
    winner: Option<Uuid>,
    refunded: Vec<Uuid>,
}

/// Money moved by a missed payment deadline.
struct Forfeiture {
    winner: Uuid,
    forfeited: i64,
    returned: i64,
}

impl AuctionEngine {
    /// List a new auction and queue its start and end transitions.
    ///
    /// The auction row and both task rows commit in one transaction,
    /// so a listed auction always has its transitions queued.
    #[tracing::instrument(name = "engine.create_auction", skip(self, params), fields(seller = %params.seller_id))]
    pub async fn create_auction(&self, params: CreateAuction) -> Result<Auction> {
        validate_create(&params)?;

        let now = Utc::now();
        let auction = Auction {
            id: Uuid::new_v4(),
            seller_id: params.seller_id,
            item: params.item,
            starting_price: params.starting_price,
            bid_increment: params.bid_increment,
            buy_now_price: params.buy_now_price,
            deposit_amount: params.starting_price * self.business.deposit_percent / 100,
            current_price: params.starting_price,
            winning_bid_id: None,
            status: AuctionStatus::Scheduled,
            start_time: params.start_time,
            end_time: params.end_time,
            actual_end_time: None,
            winner_payment_deadline: None,
            total_bids: 0,
            total_participants: 0,
            order_id: None,
            created_at: now,
        };

        let mut conn = self
            .store
            .pool()
            .acquire()
            .await
            .map_err(storage::StorageError::from)?;
        storage::begin_immediate(&mut conn).await?;
        let result = async {
            storage::auctions::insert(&mut conn, &auction).await?;
            let payload = TaskPayload::for_auction(auction.id);
            schedule_in(
                &mut conn,
                &start_key(auction.id),
                TaskKind::StartAuction,
                auction.start_time,
                &payload,
            )
            .await?;
            schedule_in(
                &mut conn,
                &end_key(auction.id),
                TaskKind::EndAuction,
                auction.end_time,
                &payload,
            )
            .await?;
            Ok::<(), EngineError>(())
        }
        .await;
        match result {
            Ok(()) => storage::commit(&mut conn).await?,
            Err(e) => {
                storage::rollback(&mut conn).await;
                return Err(e);
            }
        }
        drop(conn);

        info!(
            auction = %auction.id,
            deposit = auction.deposit_amount,
            start = %auction.start_time,
            end = %auction.end_time,
            "Auction created"
        );
        Ok(auction)
    }

    /// Flip a scheduled auction to active. Stale calls are no-ops.
    #[tracing::instrument(name = "engine.start_auction", skip(self), fields(%auction_id))]
    pub async fn start_auction(&self, auction_id: Uuid) -> Result<Auction> {
        let _guard = self.locks.acquire(auction_id).await;

        let mut conn = self
            .store
            .pool()
            .acquire()
            .await
            .map_err(storage::StorageError::from)?;
        storage::begin_immediate(&mut conn).await?;
        let (auction, changed) = match start_in_txn(&mut conn, auction_id).await {
            Ok(done) => {
                storage::commit(&mut conn).await?;
                done
            }
            Err(e) => {
                storage::rollback(&mut conn).await;
                return Err(e);
            }
        };
        drop(conn);

        if changed {
            info!("Auction started");
        }
        Ok(auction)
    }

    /// Close an active auction at its scheduled end.
    ///
    /// With a winner: every other deposit is refunded, the payment
    /// deadline opens, and the deadline check plus reminders are
    /// queued. Without one: all deposits come back and the auction is
    /// simply over. Stale calls are no-ops.
    #[tracing::instrument(name = "engine.end_auction", skip(self), fields(%auction_id))]
    pub async fn end_auction(&self, auction_id: Uuid) -> Result<Auction> {
        let _guard = self.locks.acquire(auction_id).await;

        let mut conn = self
            .store
            .pool()
            .acquire()
            .await
            .map_err(storage::StorageError::from)?;
        storage::begin_immediate(&mut conn).await?;
        let (auction, settlement) =
            match end_in_txn(&mut conn, auction_id, &self.business).await {
                Ok(done) => {
                    storage::commit(&mut conn).await?;
                    done
                }
                Err(e) => {
                    storage::rollback(&mut conn).await;
                    return Err(e);
                }
            };
        drop(conn);

        let Some(settlement) = settlement else {
            return Ok(auction);
        };

        info!(
            winner = ?settlement.winner,
            final_price = auction.current_price,
            total_bids = auction.total_bids,
            "Auction ended"
        );

        self.hub
            .publish(AuctionEvent::AuctionEnded {
                auction_id,
                has_winner: settlement.winner.is_some(),
                final_price: auction.current_price,
                total_bids: auction.total_bids,
            })
            .await;

        match settlement.winner {
            Some(winner_id) => self.notify_auction_won(&auction, winner_id),
            None => self.notifier.dispatch(Notification {
                recipient_id: auction.seller_id,
                kind: NotificationKind::AuctionExpired,
                title: "Your auction ended without bids".into(),
                message: format!("{} closed with no bids.", auction.item.name),
                reference_id: Some(auction_id),
            }),
        }
        self.notify_deposit_refunds(&auction, &settlement.refunded);

        Ok(auction)
    }

    /// Settle a missed payment deadline.
    ///
    /// Part of the winner's deposit moves to the seller as
    /// compensation, the rest returns to the winner, and the auction
    /// is marked failed. Runs from the deadline task; calls before the
    /// deadline or after payment are no-ops.
    #[tracing::instrument(name = "engine.check_winner_payment", skip(self), fields(%auction_id))]
    pub async fn check_winner_payment(&self, auction_id: Uuid) -> Result<Auction> {
        let _guard = self.locks.acquire(auction_id).await;

        let mut conn = self
            .store
            .pool()
            .acquire()
            .await
            .map_err(storage::StorageError::from)?;
        storage::begin_immediate(&mut conn).await?;
        let (auction, forfeiture) =
            match forfeit_in_txn(&mut conn, auction_id, &self.business).await {
                Ok(done) => {
                    storage::commit(&mut conn).await?;
                    done
                }
                Err(e) => {
                    storage::rollback(&mut conn).await;
                    return Err(e);
                }
            };
        drop(conn);

        let Some(forfeiture) = forfeiture else {
            return Ok(auction);
        };

        info!(
            winner = %forfeiture.winner,
            forfeited = forfeiture.forfeited,
            returned = forfeiture.returned,
            "Payment deadline missed, deposit forfeited"
        );

        self.notifier.dispatch(Notification {
            recipient_id: forfeiture.winner,
            kind: NotificationKind::DepositForfeited,
            title: "Payment deadline missed".into(),
            message: format!(
                "The payment window for {} has closed. {} of your deposit was forfeited.",
                auction.item.name, forfeiture.forfeited
            ),
            reference_id: Some(auction_id),
        });
        self.notifier.dispatch(Notification {
            recipient_id: auction.seller_id,
            kind: NotificationKind::CompensationPaid,
            title: "Compensation received".into(),
            message: format!(
                "The winner of {} did not pay in time. You received {} in compensation.",
                auction.item.name, forfeiture.forfeited
            ),
            reference_id: Some(auction_id),
        });

        Ok(auction)
    }

    /// Remind the winner that payment is still outstanding.
    ///
    /// Fires from reminder tasks; stale ones (already paid, failed, or
    /// canceled) are silently skipped.
    #[tracing::instrument(name = "engine.payment_reminder", skip(self), fields(%auction_id, sequence))]
    pub async fn send_payment_reminder(&self, auction_id: Uuid, sequence: u32) -> Result<()> {
        let auction = storage::auctions::get(self.store.pool(), auction_id).await?;
        if auction.status != AuctionStatus::Ended || auction.order_id.is_some() {
            debug!("Reminder skipped, no payment outstanding");
            return Ok(());
        }
        let (Some(bid_id), Some(deadline)) =
            (auction.winning_bid_id, auction.winner_payment_deadline)
        else {
            return Ok(());
        };
        let winner_id = storage::bids::get(self.store.pool(), bid_id).await?.bidder_id;

        let minutes_left = (deadline - Utc::now()).num_minutes().max(0);
        let hours_left = (minutes_left + 30) / 60;

        self.notifier.dispatch(Notification {
            recipient_id: winner_id,
            kind: NotificationKind::PaymentReminder,
            title: "Payment reminder".into(),
            message: format!(
                "{} is waiting for payment. About {} hours remain before your deposit is forfeited.",
                auction.item.name, hours_left
            ),
            reference_id: Some(auction_id),
        });
        debug!(hours_left, "Payment reminder dispatched");
        Ok(())
    }

    /// Complete the purchase as the winning bidder.
    ///
    /// Creates the order through the gateway, then in one transaction
    /// debits the winner by the final price, credits the seller,
    /// refunds the winner's deposit, and retires the payment tasks.
    #[tracing::instrument(name = "engine.complete_purchase", skip(self), fields(%user_id, %auction_id))]
    pub async fn complete_purchase(&self, user_id: Uuid, auction_id: Uuid) -> Result<Auction> {
        if user_id.is_nil() || auction_id.is_nil() {
            return Err(EngineError::Validation(
                "user and auction ids are required".into(),
            ));
        }

        let _guard = self.locks.acquire(auction_id).await;

        // Checks ahead of the gateway call, so orders are only created
        // for requests that can settle.
        let auction = storage::auctions::get(self.store.pool(), auction_id).await?;
        if auction.order_id.is_some() || auction.status == AuctionStatus::Completed {
            return Err(EngineError::AlreadyOrdered);
        }
        if auction.status != AuctionStatus::Ended {
            return Err(EngineError::NotAwaitingPayment);
        }
        let bid_id = auction.winning_bid_id.ok_or(EngineError::NoWinner)?;
        let winning_bid = storage::bids::get(self.store.pool(), bid_id).await?;
        if winning_bid.bidder_id != user_id {
            return Err(EngineError::NotWinner);
        }
        let amount = auction.current_price;
        let wallet = storage::wallets::get(self.store.pool(), user_id).await?;
        if wallet.balance < amount {
            return Err(EngineError::InsufficientBalance {
                required: amount,
                available: wallet.balance,
            });
        }

        let order_id = self.orders.create_order(auction_id, user_id, amount).await?;

        let mut conn = self
            .store
            .pool()
            .acquire()
            .await
            .map_err(storage::StorageError::from)?;
        storage::begin_immediate(&mut conn).await?;
        let auction = match complete_in_txn(&mut conn, auction_id, user_id, order_id, &self.business)
            .await
        {
            Ok(auction) => {
                storage::commit(&mut conn).await?;
                auction
            }
            Err(e) => {
                storage::rollback(&mut conn).await;
                warn!(order = %order_id, error = %e, "Purchase settlement failed after order creation");
                return Err(e);
            }
        };
        drop(conn);

        info!(order = %order_id, amount, "Purchase completed");

        self.notifier.dispatch(Notification {
            recipient_id: user_id,
            kind: NotificationKind::OrderCreated,
            title: "Order created".into(),
            message: format!(
                "Your order for {} is ready. Your deposit has been returned.",
                auction.item.name
            ),
            reference_id: Some(order_id),
        });
        self.notifier.dispatch(Notification {
            recipient_id: auction.seller_id,
            kind: NotificationKind::PaymentReceived,
            title: "Payment received".into(),
            message: format!("{} sold and paid: {}.", auction.item.name, amount),
            reference_id: Some(order_id),
        });

        Ok(auction)
    }

    /// Cancel an auction that has seen no bidding.
    ///
    /// Allowed while scheduled, or while active with zero bids. All
    /// deposits are refunded and the queued transitions are dropped.
    #[tracing::instrument(name = "engine.cancel_auction", skip(self), fields(%auction_id))]
    pub async fn cancel_auction(&self, auction_id: Uuid) -> Result<Auction> {
        let _guard = self.locks.acquire(auction_id).await;

        let mut conn = self
            .store
            .pool()
            .acquire()
            .await
            .map_err(storage::StorageError::from)?;
        storage::begin_immediate(&mut conn).await?;
        let (auction, refunded) = match cancel_in_txn(&mut conn, auction_id).await {
            Ok(done) => {
                storage::commit(&mut conn).await?;
                done
            }
            Err(e) => {
                storage::rollback(&mut conn).await;
                return Err(e);
            }
        };
        drop(conn);

        info!(refunds = refunded.len(), "Auction canceled");

        for user_id in &refunded {
            self.notifier.dispatch(Notification {
                recipient_id: *user_id,
                kind: NotificationKind::AuctionCanceled,
                title: "Auction canceled".into(),
                message: format!(
                    "{} was canceled. Your deposit of {} has been returned.",
                    auction.item.name, auction.deposit_amount
                ),
                reference_id: Some(auction_id),
            });
        }

        Ok(auction)
    }

    pub(super) fn notify_auction_won(&self, auction: &Auction, winner_id: Uuid) {
        self.notifier.dispatch(Notification {
            recipient_id: winner_id,
            kind: NotificationKind::AuctionWon,
            title: "You won the auction".into(),
            message: format!(
                "You won {} at {}. Complete the purchase before the payment deadline.",
                auction.item.name, auction.current_price
            ),
            reference_id: Some(auction.id),
        });
        self.notifier.dispatch(Notification {
            recipient_id: auction.seller_id,
            kind: NotificationKind::AuctionSold,
            title: "Your auction has a winner".into(),
            message: format!("{} sold at {}.", auction.item.name, auction.current_price),
            reference_id: Some(auction.id),
        });
    }

    pub(super) fn notify_deposit_refunds(&self, auction: &Auction, user_ids: &[Uuid]) {
        for user_id in user_ids {
            self.notifier.dispatch(Notification {
                recipient_id: *user_id,
                kind: NotificationKind::DepositRefunded,
                title: "Deposit refunded".into(),
                message: format!(
                    "Your deposit of {} for {} has been returned.",
                    auction.deposit_amount, auction.item.name
                ),
                reference_id: Some(auction.id),
            });
        }
    }
}

fn validate_create(params: &CreateAuction) -> Result<()> {
    if params.seller_id.is_nil() {
        return Err(EngineError::Validation("seller id is required".into()));
    }
    if params.item.name.trim().is_empty() {
        return Err(EngineError::Validation("item name is required".into()));
    }
    if params.starting_price <= 0 {
        return Err(EngineError::Validation(
            "starting price must be positive".into(),
        ));
    }
    if params.bid_increment <= 0 {
        return Err(EngineError::Validation(
            "bid increment must be positive".into(),
        ));
    }
    if let Some(buy_now) = params.buy_now_price {
        if buy_now <= params.starting_price {
            return Err(EngineError::Validation(
                "buy-now price must exceed the starting price".into(),
            ));
        }
    }
    if params.end_time <= params.start_time {
        return Err(EngineError::Validation(
            "end time must be after start time".into(),
        ));
    }
    Ok(())
}

async fn start_in_txn(conn: &mut SqliteConnection, auction_id: Uuid) -> Result<(Auction, bool)> {
    let mut auction = storage::auctions::get_tx(conn, auction_id).await?;
    if auction.status != AuctionStatus::Scheduled {
        debug!(status = %auction.status, "Start skipped");
        return Ok((auction, false));
    }
    auction.status = AuctionStatus::Active;
    storage::auctions::update(conn, &auction).await?;
    Ok((auction, true))
}

async fn end_in_txn(
    conn: &mut SqliteConnection,
    auction_id: Uuid,
    business: &BusinessConfig,
) -> Result<(Auction, Option<EndSettlement>)> {
    let mut auction = storage::auctions::get_tx(conn, auction_id).await?;
    if auction.status != AuctionStatus::Active {
        debug!(status = %auction.status, "End skipped");
        return Ok((auction, None));
    }

    let now = Utc::now();
    auction.status = AuctionStatus::Ended;
    auction.actual_end_time = Some(now);

    let winner = match auction.winning_bid_id {
        Some(bid_id) => Some(storage::bids::get_tx(conn, bid_id).await?.bidder_id),
        None => None,
    };

    if winner.is_some() {
        auction.winner_payment_deadline =
            Some(now + Duration::hours(business.payment_window_hours));
    }
    let refunded = refund_participants(conn, &auction, winner).await?;

    storage::auctions::update(conn, &auction).await?;
    if winner.is_some() {
        schedule_payment_tasks(conn, &auction, business).await?;
    }

    Ok((auction, Some(EndSettlement { winner, refunded })))
}

async fn forfeit_in_txn(
    conn: &mut SqliteConnection,
    auction_id: Uuid,
    business: &BusinessConfig,
) -> Result<(Auction, Option<Forfeiture>)> {
    let mut auction = storage::auctions::get_tx(conn, auction_id).await?;

    if auction.status != AuctionStatus::Ended || auction.order_id.is_some() {
        debug!(status = %auction.status, "Payment check skipped");
        return Ok((auction, None));
    }
    let (Some(bid_id), Some(deadline)) =
        (auction.winning_bid_id, auction.winner_payment_deadline)
    else {
        return Ok((auction, None));
    };
    if Utc::now() < deadline {
        debug!(deadline = %deadline, "Payment deadline not reached");
        return Ok((auction, None));
    }

    let winner_id = storage::bids::get_tx(conn, bid_id).await?.bidder_id;
    let participant = storage::participants::find_for_user(conn, auction_id, winner_id)
        .await?
        .ok_or(EngineError::NotParticipant)?;

    let forfeited = participant.deposit_amount * business.forfeit_percent / 100;
    let returned = participant.deposit_amount - forfeited;
    if forfeited > 0 {
        ledger::apply(
            conn,
            auction.seller_id,
            forfeited,
            EntryType::Compensation,
            AffectedField::NonWithdrawable,
            Some(auction.id),
            Some("auction"),
        )
        .await?;
    }
    if returned > 0 {
        // A partial return; the participant row keeps its deposit
        // marked unrefunded because the full amount never came back.
        ledger::apply(
            conn,
            winner_id,
            returned,
            EntryType::DepositRefund,
            AffectedField::Balance,
            Some(auction.id),
            Some("auction"),
        )
        .await?;
    }

    auction.status = AuctionStatus::Failed;
    storage::auctions::update(conn, &auction).await?;

    Ok((
        auction,
        Some(Forfeiture {
            winner: winner_id,
            forfeited,
            returned,
        }),
    ))
}

async fn complete_in_txn(
    conn: &mut SqliteConnection,
    auction_id: Uuid,
    winner_id: Uuid,
    order_id: Uuid,
    business: &BusinessConfig,
) -> Result<Auction> {
    let mut auction = storage::auctions::get_tx(conn, auction_id).await?;

    // Re-checked under the write transaction.
    if auction.order_id.is_some() || auction.status == AuctionStatus::Completed {
        return Err(EngineError::AlreadyOrdered);
    }
    if auction.status != AuctionStatus::Ended {
        return Err(EngineError::NotAwaitingPayment);
    }

    let amount = auction.current_price;
    ledger::apply(
        conn,
        winner_id,
        -amount,
        EntryType::Payment,
        AffectedField::Balance,
        Some(order_id),
        Some("order"),
    )
    .await?;
    ledger::apply(
        conn,
        auction.seller_id,
        amount,
        EntryType::PaymentReceived,
        AffectedField::NonWithdrawable,
        Some(order_id),
        Some("order"),
    )
    .await?;

    if let Some(participant) =
        storage::participants::find_for_user(conn, auction_id, winner_id).await?
    {
        if !participant.is_refunded {
            ledger::apply(
                conn,
                winner_id,
                participant.deposit_amount,
                EntryType::DepositRefund,
                AffectedField::Balance,
                Some(auction.id),
                Some("auction"),
            )
            .await?;
            storage::participants::mark_refunded(conn, participant.id).await?;
        }
    }

    auction.order_id = Some(order_id);
    auction.status = AuctionStatus::Completed;
    storage::auctions::update(conn, &auction).await?;

    cancel_in(conn, &payment_key(auction_id)).await?;
    for sequence in 1..=business.reminder_offsets_hours.len() {
        cancel_in(conn, &reminder_key(auction_id, sequence as u32)).await?;
    }

    Ok(auction)
}

async fn cancel_in_txn(
    conn: &mut SqliteConnection,
    auction_id: Uuid,
) -> Result<(Auction, Vec<Uuid>)> {
    let mut auction = storage::auctions::get_tx(conn, auction_id).await?;

    let cancelable = auction.status == AuctionStatus::Scheduled
        || (auction.status == AuctionStatus::Active && auction.total_bids == 0);
    if !cancelable {
        return Err(EngineError::CannotCancel);
    }

    let refunded = refund_participants(conn, &auction, None).await?;
    auction.status = AuctionStatus::Canceled;
    storage::auctions::update(conn, &auction).await?;

    cancel_in(conn, &start_key(auction_id)).await?;
    cancel_in(conn, &end_key(auction_id)).await?;

    Ok((auction, refunded))
}

/// Refund every unrefunded deposit, optionally keeping one user's on
/// hold. Returns who was refunded.
pub(super) async fn refund_participants(
    conn: &mut SqliteConnection,
    auction: &Auction,
    keep_user: Option<Uuid>,
) -> Result<Vec<Uuid>> {
    let participants = storage::participants::list_for_auction_tx(conn, auction.id).await?;
    let mut refunded = Vec::new();
    for participant in participants {
        if participant.is_refunded || Some(participant.user_id) == keep_user {
            continue;
        }
        ledger::apply(
            conn,
            participant.user_id,
            participant.deposit_amount,
            EntryType::DepositRefund,
            AffectedField::Balance,
            Some(auction.id),
            Some("auction"),
        )
        .await?;
        storage::participants::mark_refunded(conn, participant.id).await?;
        refunded.push(participant.user_id);
    }
    Ok(refunded)
}

/// Queue the payment-deadline check and the reminder ladder for an
/// auction that just ended with a winner.
pub(super) async fn schedule_payment_tasks(
    conn: &mut SqliteConnection,
    auction: &Auction,
    business: &BusinessConfig,
) -> Result<()> {
    let (Some(deadline), Some(ended_at)) =
        (auction.winner_payment_deadline, auction.actual_end_time)
    else {
        return Ok(());
    };

    schedule_in(
        conn,
        &payment_key(auction.id),
        TaskKind::CheckWinnerPayment,
        deadline,
        &TaskPayload::for_auction(auction.id),
    )
    .await?;

    for (index, offset_hours) in business.reminder_offsets_hours.iter().enumerate() {
        let sequence = (index + 1) as u32;
        schedule_in(
            conn,
            &reminder_key(auction.id, sequence),
            TaskKind::PaymentReminder,
            ended_at + Duration::hours(*offset_hours),
            &TaskPayload::reminder(auction.id, sequence),
        )
        .await?;
    }
    Ok(())
}
