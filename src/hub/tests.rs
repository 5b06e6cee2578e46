//! Tests for the auction event hub.

use std::time::Duration;

use tokio::time::timeout;
use uuid::Uuid;

use super::*;

fn bid_event(auction_id: Uuid, amount: i64) -> AuctionEvent {
    AuctionEvent::NewBid {
        auction_id,
        bid_id: Uuid::new_v4(),
        bidder_id: Uuid::new_v4(),
        amount,
        total_bids: 1,
    }
}

#[tokio::test]
async fn test_subscriber_receives_published_event() {
    let hub = EventHub::default();
    let auction = Uuid::new_v4();
    let mut sub = hub.subscribe(auction).await;

    hub.publish(bid_event(auction, 100)).await;

    let event = timeout(Duration::from_secs(1), sub.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.auction_id(), auction);
    assert_eq!(event.kind(), "new_bid");
}

#[tokio::test]
async fn test_all_subscribers_receive_each_event() {
    let hub = EventHub::default();
    let auction = Uuid::new_v4();
    let mut first = hub.subscribe(auction).await;
    let mut second = hub.subscribe(auction).await;
    assert_eq!(hub.subscriber_count(auction).await, 2);

    hub.publish(AuctionEvent::AuctionEnded {
        auction_id: auction,
        has_winner: true,
        final_price: 300_000,
        total_bids: 7,
    })
    .await;

    for sub in [&mut first, &mut second] {
        let event = timeout(Duration::from_secs(1), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.kind(), "auction_ended");
    }
}

#[tokio::test]
async fn test_events_do_not_cross_auctions() {
    let hub = EventHub::default();
    let watched = Uuid::new_v4();
    let other = Uuid::new_v4();
    let mut sub = hub.subscribe(watched).await;

    hub.publish(bid_event(other, 100)).await;

    let result = timeout(Duration::from_millis(100), sub.recv()).await;
    assert!(result.is_err(), "event for another auction leaked through");
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let hub = EventHub::default();
    let auction = Uuid::new_v4();
    let mut sub = hub.subscribe(auction).await;

    hub.unsubscribe(auction, sub.id()).await;
    assert_eq!(hub.subscriber_count(auction).await, 0);

    hub.publish(bid_event(auction, 100)).await;

    // Sender side was dropped on unsubscribe, so the stream just ends.
    assert!(sub.recv().await.is_none());
}

#[tokio::test]
async fn test_slow_subscriber_does_not_block_others() {
    let hub = EventHub::new(HubConfig {
        subscriber_buffer: 1,
        publish_timeout_ms: 50,
    });
    let auction = Uuid::new_v4();
    let mut slow = hub.subscribe(auction).await;
    let mut fast = hub.subscribe(auction).await;

    // The slow subscriber never drains, so only one event fits its queue.
    hub.publish(bid_event(auction, 100)).await;
    hub.publish(bid_event(auction, 200)).await;
    hub.publish(bid_event(auction, 300)).await;

    for _ in 0..3 {
        timeout(Duration::from_secs(1), fast.recv())
            .await
            .expect("fast subscriber should not be starved")
            .unwrap();
    }

    let first = timeout(Duration::from_millis(100), slow.recv()).await;
    assert!(first.is_ok(), "one event should have been buffered");
    let second = timeout(Duration::from_millis(100), slow.recv()).await;
    assert!(second.is_err(), "overflow events should have been dropped");
}

#[tokio::test]
async fn test_dropped_subscription_is_pruned() {
    let hub = EventHub::default();
    let auction = Uuid::new_v4();
    let mut keep = hub.subscribe(auction).await;
    let gone = hub.subscribe(auction).await;
    drop(gone);

    assert_eq!(hub.subscriber_count(auction).await, 1);

    hub.publish(bid_event(auction, 100)).await;
    timeout(Duration::from_secs(1), keep.recv())
        .await
        .unwrap()
        .unwrap();
}
