//! End-to-end auction flows against a file-backed store.
//!
//! Unlike the unit tests these run the real scheduler loop and real
//! concurrent writers, so the database lives in a temp directory where
//! the pool hands out more than one connection.
//!
//! Run with: cargo test --test auction_flow

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use tempfile::TempDir;
use tokio::sync::Barrier;
use uuid::Uuid;

use gavel::config::BusinessConfig;
use gavel::engine::{AuctionEngine, CreateAuction, EngineError};
use gavel::hub::EventHub;
use gavel::ledger;
use gavel::model::{AuctionStatus, ItemSnapshot};
use gavel::notify::mock::RecordingSender;
use gavel::notify::{NotificationKind, NotifyConfig, QueuedNotifier};
use gavel::orders::mock::MockOrderGateway;
use gavel::scheduler::{payment_key, reminder_key, Scheduler, SchedulerConfig, TaskStatus};
use gavel::storage::Store;

struct Harness {
    engine: Arc<AuctionEngine>,
    store: Arc<Store>,
    scheduler: Arc<Scheduler>,
    orders: Arc<MockOrderGateway>,
    sender: Arc<RecordingSender>,
    // Removing the directory deletes the database out from under the pool.
    _dir: TempDir,
}

async fn harness(business: BusinessConfig) -> Harness {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("gavel.db");
    let store = Arc::new(
        Store::connect(path.to_str().expect("utf-8 temp path"))
            .await
            .unwrap(),
    );
    store.init().await.unwrap();

    let scheduler_config = SchedulerConfig {
        poll_interval_ms: 25,
        ..SchedulerConfig::default()
    };
    let hub = Arc::new(EventHub::default());
    let sender = Arc::new(RecordingSender::new());
    let notifier = Arc::new(QueuedNotifier::new(sender.clone(), NotifyConfig::default()));
    let orders = Arc::new(MockOrderGateway::new());
    let scheduler = Arc::new(Scheduler::new(store.clone(), scheduler_config));
    let engine = Arc::new(AuctionEngine::new(
        store.clone(),
        hub,
        notifier,
        orders.clone(),
        scheduler.clone(),
        business,
    ));
    Harness {
        engine,
        store,
        scheduler,
        orders,
        sender,
        _dir: dir,
    }
}

/// Run the scheduler loop in the background for the rest of the test.
fn spawn_worker(h: &Harness) {
    let scheduler = h.scheduler.clone();
    let engine = h.engine.clone();
    tokio::spawn(async move {
        scheduler.run(engine).await;
    });
}

async fn funded_user(h: &Harness, amount: i64) -> Uuid {
    let user = Uuid::new_v4();
    ledger::top_up(&h.store, user, amount).await.unwrap();
    user
}

fn item(name: &str) -> ItemSnapshot {
    ItemSnapshot {
        name: name.into(),
        description: None,
        category: Some("collectibles".into()),
        image_url: None,
    }
}

async fn balance_of(h: &Harness, user: Uuid) -> i64 {
    ledger::wallet(&h.store, user).await.unwrap().balance
}

async fn assert_consistent(h: &Harness, user: Uuid) {
    let audit = ledger::verify_wallet(&h.store, user).await.unwrap();
    assert!(
        audit.is_consistent(),
        "wallet {} drifted: stored ({}, {}) entries ({}, {})",
        user,
        audit.wallet.balance,
        audit.wallet.non_withdrawable,
        audit.entry_balance,
        audit.entry_non_withdrawable
    );
}

/// Poll until the auction reaches `status` or the timeout elapses.
async fn wait_for_status(
    engine: &AuctionEngine,
    auction_id: Uuid,
    status: AuctionStatus,
    timeout: StdDuration,
) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let auction = engine.auction(auction_id).await.unwrap();
        if auction.status == status {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "auction {} stuck in {} while waiting for {}",
            auction_id,
            auction.status,
            status
        );
        tokio::time::sleep(StdDuration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_timed_lifecycle_end_to_end() {
    let h = harness(BusinessConfig::default()).await;
    spawn_worker(&h);

    let seller = Uuid::new_v4();
    let alice = funded_user(&h, 500_000).await;
    let bob = funded_user(&h, 500_000).await;

    // Short fuse so the background worker drives both transitions.
    let auction = h
        .engine
        .create_auction(CreateAuction {
            seller_id: seller,
            item: item("signed first pressing"),
            starting_price: 100_000,
            bid_increment: 10_000,
            buy_now_price: None,
            start_time: Utc::now() + Duration::milliseconds(250),
            end_time: Utc::now() + Duration::milliseconds(1800),
        })
        .await
        .unwrap();

    // Joining is allowed while the auction is still scheduled.
    h.engine.join_auction(alice, auction.id).await.unwrap();
    h.engine.join_auction(bob, auction.id).await.unwrap();

    wait_for_status(
        h.engine.as_ref(),
        auction.id,
        AuctionStatus::Active,
        StdDuration::from_secs(5),
    )
    .await;

    h.engine.place_bid(alice, auction.id, 110_000).await.unwrap();
    let outcome = h.engine.place_bid(bob, auction.id, 120_000).await.unwrap();
    assert_eq!(outcome.previous_bidder, Some(alice));

    wait_for_status(
        h.engine.as_ref(),
        auction.id,
        AuctionStatus::Ended,
        StdDuration::from_secs(5),
    )
    .await;

    let ended = h.engine.auction(auction.id).await.unwrap();
    assert_eq!(ended.current_price, 120_000);
    assert!(ended.winner_payment_deadline.is_some(), "winner must get a deadline");

    // The losing bidder's deposit came back at settlement.
    assert_eq!(balance_of(&h, alice).await, 500_000);
    assert_eq!(balance_of(&h, bob).await, 490_000);

    let completed = h.engine.complete_purchase(bob, auction.id).await.unwrap();
    assert_eq!(completed.status, AuctionStatus::Completed);
    assert!(completed.order_id.is_some());

    let created = h.orders.created().await;
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].winner_id, bob);
    assert_eq!(created[0].amount, 120_000);

    // 500_000 - 10_000 deposit - 120_000 payment + 10_000 refund.
    assert_eq!(balance_of(&h, bob).await, 380_000);
    let seller_wallet = ledger::wallet(&h.store, seller).await.unwrap();
    assert_eq!(seller_wallet.non_withdrawable, 120_000);

    for user in [seller, alice, bob] {
        assert_consistent(&h, user).await;
    }
}

#[tokio::test]
async fn test_concurrent_bidders_one_winner_per_round() {
    let h = harness(BusinessConfig::default()).await;

    let seller = Uuid::new_v4();
    let auction = h
        .engine
        .create_auction(CreateAuction {
            seller_id: seller,
            item: item("meteorite slice"),
            starting_price: 100_000,
            bid_increment: 10_000,
            buy_now_price: None,
            start_time: Utc::now(),
            end_time: Utc::now() + Duration::hours(2),
        })
        .await
        .unwrap();
    h.engine.start_auction(auction.id).await.unwrap();

    let mut bidders = Vec::new();
    for _ in 0..8 {
        let user = funded_user(&h, 1_000_000).await;
        h.engine.join_auction(user, auction.id).await.unwrap();
        bidders.push(user);
    }

    // Everyone fires the same amount at once; exactly one can clear.
    let barrier = Arc::new(Barrier::new(bidders.len()));
    let mut handles = Vec::new();
    for user in &bidders {
        let engine = h.engine.clone();
        let barrier = barrier.clone();
        let user = *user;
        let auction_id = auction.id;
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            engine.place_bid(user, auction_id, 110_000).await
        }));
    }

    let mut accepted = 0;
    let mut too_low = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(outcome) => {
                accepted += 1;
                assert_eq!(outcome.auction.current_price, 110_000);
            }
            Err(EngineError::BidTooLow { minimum }) => {
                too_low += 1;
                assert_eq!(minimum, 120_000, "losers must see the raised minimum");
            }
            Err(other) => panic!("unexpected bid failure: {other}"),
        }
    }
    assert_eq!(accepted, 1, "exactly one same-amount bid can win the race");
    assert_eq!(too_low, 7);

    // A second round at the new minimum behaves the same way.
    let barrier = Arc::new(Barrier::new(bidders.len()));
    let mut handles = Vec::new();
    for user in &bidders {
        let engine = h.engine.clone();
        let barrier = barrier.clone();
        let user = *user;
        let auction_id = auction.id;
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            engine.place_bid(user, auction_id, 120_000).await
        }));
    }
    let mut accepted = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 1);

    let state = h.engine.auction(auction.id).await.unwrap();
    assert_eq!(state.total_bids, 2);
    assert_eq!(state.current_price, 120_000);
    assert_eq!(h.engine.bids(auction.id).await.unwrap().len(), 2);

    // Bids move no money, so every bidder still holds funds minus deposit.
    for user in &bidders {
        assert_eq!(balance_of(&h, *user).await, 990_000);
        assert_consistent(&h, *user).await;
    }
}

#[tokio::test]
async fn test_buy_now_race_selects_single_winner() {
    let h = harness(BusinessConfig::default()).await;

    let seller = Uuid::new_v4();
    let auction = h
        .engine
        .create_auction(CreateAuction {
            seller_id: seller,
            item: item("prototype console"),
            starting_price: 100_000,
            bid_increment: 10_000,
            buy_now_price: Some(200_000),
            start_time: Utc::now(),
            end_time: Utc::now() + Duration::hours(2),
        })
        .await
        .unwrap();
    h.engine.start_auction(auction.id).await.unwrap();

    let mut buyers = Vec::new();
    for _ in 0..4 {
        let user = funded_user(&h, 1_000_000).await;
        h.engine.join_auction(user, auction.id).await.unwrap();
        buyers.push(user);
    }

    let barrier = Arc::new(Barrier::new(buyers.len()));
    let mut handles = Vec::new();
    for user in &buyers {
        let engine = h.engine.clone();
        let barrier = barrier.clone();
        let user = *user;
        let auction_id = auction.id;
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            (user, engine.place_bid(user, auction_id, 200_000).await)
        }));
    }

    let mut winner = None;
    let mut closed_out = 0;
    for handle in handles {
        let (user, result) = handle.await.unwrap();
        match result {
            Ok(outcome) => {
                assert!(outcome.buy_now, "a bid at the buy-now price closes the auction");
                assert!(winner.replace(user).is_none(), "two buy-now winners");
            }
            Err(EngineError::AuctionEnded) => closed_out += 1,
            Err(other) => panic!("unexpected buy-now failure: {other}"),
        }
    }
    let winner = winner.expect("one buyer must win");
    assert_eq!(closed_out, 3, "late buyers must see the auction closed");

    let state = h.engine.auction(auction.id).await.unwrap();
    assert_eq!(state.status, AuctionStatus::Ended);
    assert_eq!(state.current_price, 200_000);
    assert!(state.actual_end_time.is_some());

    // Losers were refunded during settlement; the winner's deposit is
    // still held against payment.
    for user in &buyers {
        let expected = if *user == winner { 990_000 } else { 1_000_000 };
        assert_eq!(balance_of(&h, *user).await, expected);
        assert_consistent(&h, *user).await;
    }
    assert!(h.orders.created().await.is_empty(), "no order until the winner pays");
}

#[tokio::test]
async fn test_expired_payment_window_forfeits_deposit() {
    let business = BusinessConfig {
        payment_window_hours: 0,
        reminder_offsets_hours: Vec::new(),
        ..BusinessConfig::default()
    };
    let h = harness(business).await;
    spawn_worker(&h);

    let seller = Uuid::new_v4();
    let winner = funded_user(&h, 500_000).await;
    let auction = h
        .engine
        .create_auction(CreateAuction {
            seller_id: seller,
            item: item("tour jacket"),
            starting_price: 100_000,
            bid_increment: 10_000,
            buy_now_price: None,
            start_time: Utc::now(),
            end_time: Utc::now() + Duration::hours(2),
        })
        .await
        .unwrap();
    h.engine.start_auction(auction.id).await.unwrap();
    h.engine.join_auction(winner, auction.id).await.unwrap();
    h.engine.place_bid(winner, auction.id, 110_000).await.unwrap();

    // A zero-hour window makes the payment check due the moment the
    // auction ends; the worker should pick it up and forfeit.
    h.engine.end_auction(auction.id).await.unwrap();
    wait_for_status(
        h.engine.as_ref(),
        auction.id,
        AuctionStatus::Failed,
        StdDuration::from_secs(5),
    )
    .await;

    let task = h
        .scheduler
        .get(&payment_key(auction.id))
        .await
        .unwrap()
        .expect("payment check task");
    assert_eq!(task.status, TaskStatus::Done);

    // Half the 10_000 deposit goes to the seller, half returns.
    assert_eq!(balance_of(&h, winner).await, 495_000);
    let seller_wallet = ledger::wallet(&h.store, seller).await.unwrap();
    assert_eq!(seller_wallet.non_withdrawable, 5_000);

    assert!(
        h.sender.wait_for(4, StdDuration::from_secs(5)).await,
        "expected win, sale, forfeit and compensation notices"
    );
    assert_eq!(h.sender.count_of(NotificationKind::DepositForfeited).await, 1);
    assert_eq!(h.sender.count_of(NotificationKind::CompensationPaid).await, 1);

    assert_consistent(&h, winner).await;
    assert_consistent(&h, seller).await;
}

#[tokio::test]
async fn test_payment_reminder_dispatched_by_worker() {
    let business = BusinessConfig {
        reminder_offsets_hours: vec![0],
        ..BusinessConfig::default()
    };
    let h = harness(business).await;
    spawn_worker(&h);

    let seller = Uuid::new_v4();
    let winner = funded_user(&h, 500_000).await;
    let auction = h
        .engine
        .create_auction(CreateAuction {
            seller_id: seller,
            item: item("scrimshaw compass"),
            starting_price: 100_000,
            bid_increment: 10_000,
            buy_now_price: None,
            start_time: Utc::now(),
            end_time: Utc::now() + Duration::hours(2),
        })
        .await
        .unwrap();
    h.engine.start_auction(auction.id).await.unwrap();
    h.engine.join_auction(winner, auction.id).await.unwrap();
    h.engine.place_bid(winner, auction.id, 110_000).await.unwrap();
    h.engine.end_auction(auction.id).await.unwrap();

    // Win + sale from the end, then the zero-offset reminder.
    assert!(
        h.sender.wait_for(3, StdDuration::from_secs(5)).await,
        "reminder never arrived"
    );
    assert_eq!(h.sender.count_of(NotificationKind::PaymentReminder).await, 1);
    let reminder = h
        .sender
        .sent()
        .await
        .into_iter()
        .find(|n| n.kind == NotificationKind::PaymentReminder)
        .expect("reminder notification");
    assert_eq!(reminder.recipient_id, winner);
    assert!(
        reminder.message.contains("48 hours"),
        "reminder should quote the remaining window: {}",
        reminder.message
    );

    let task = h
        .scheduler
        .get(&reminder_key(auction.id, 1))
        .await
        .unwrap()
        .expect("reminder task");
    assert_eq!(task.status, TaskStatus::Done);

    // The payment check itself is still two days out.
    let payment = h
        .scheduler
        .get(&payment_key(auction.id))
        .await
        .unwrap()
        .expect("payment check task");
    assert_eq!(payment.status, TaskStatus::Pending);
}
