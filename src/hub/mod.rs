//! In-process auction event hub.
//!
//! Fan-out is topic-per-auction with a bounded channel per subscriber.
//! Delivery preserves per-subscriber order; a stuck consumer gets a
//! bounded send window and then loses only its own copy. Auction
//! mutations commit first and publish after, so a lost event never
//! implies lost state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::RwLock;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};
use uuid::Uuid;

/// Configuration for the event hub.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Queued events per subscriber before sends start timing out.
    pub subscriber_buffer: usize,
    /// How long a delivery may wait on a full subscriber queue before
    /// that subscriber's copy is dropped.
    pub publish_timeout_ms: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 64,
            publish_timeout_ms: 250,
        }
    }
}

impl HubConfig {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

/// Events broadcast to auction watchers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuctionEvent {
    NewBid {
        auction_id: Uuid,
        bid_id: Uuid,
        bidder_id: Uuid,
        amount: i64,
        total_bids: i64,
    },
    NewParticipant {
        auction_id: Uuid,
        user_id: Uuid,
        total_participants: i64,
    },
    AuctionEnded {
        auction_id: Uuid,
        has_winner: bool,
        final_price: i64,
        total_bids: i64,
    },
}

impl AuctionEvent {
    pub fn auction_id(&self) -> Uuid {
        match self {
            AuctionEvent::NewBid { auction_id, .. } => *auction_id,
            AuctionEvent::NewParticipant { auction_id, .. } => *auction_id,
            AuctionEvent::AuctionEnded { auction_id, .. } => *auction_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AuctionEvent::NewBid { .. } => "new_bid",
            AuctionEvent::NewParticipant { .. } => "new_participant",
            AuctionEvent::AuctionEnded { .. } => "auction_ended",
        }
    }
}

struct SubscriberSlot {
    id: Uuid,
    tx: mpsc::Sender<Arc<AuctionEvent>>,
}

/// Per-auction fan-out of [`AuctionEvent`]s.
pub struct EventHub {
    topics: RwLock<HashMap<Uuid, Vec<SubscriberSlot>>>,
    config: HubConfig,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

impl EventHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Register interest in one auction's events.
    pub async fn subscribe(&self, auction_id: Uuid) -> Subscription {
        let (tx, rx) = mpsc::channel(self.config.subscriber_buffer);
        let id = Uuid::new_v4();

        let mut topics = self.topics.write().await;
        topics
            .entry(auction_id)
            .or_default()
            .push(SubscriberSlot { id, tx });

        debug!(auction = %auction_id, subscriber = %id, "Subscriber added");
        Subscription { id, auction_id, rx }
    }

    /// Remove one subscriber. Unknown ids are ignored.
    pub async fn unsubscribe(&self, auction_id: Uuid, subscriber_id: Uuid) {
        let mut topics = self.topics.write().await;
        if let Some(slots) = topics.get_mut(&auction_id) {
            slots.retain(|slot| slot.id != subscriber_id);
            if slots.is_empty() {
                topics.remove(&auction_id);
            }
        }
    }

    /// Deliver an event to every current subscriber of its auction.
    ///
    /// Sends happen in subscriber order and events arrive in publish
    /// order. A full subscriber queue gets `publish_timeout` to drain;
    /// past that the subscriber loses its own copy and everyone else
    /// still receives theirs.
    #[tracing::instrument(
        name = "hub.publish",
        skip_all,
        fields(auction = %event.auction_id(), kind = event.kind())
    )]
    pub async fn publish(&self, event: AuctionEvent) {
        let event = Arc::new(event);
        let auction_id = event.auction_id();
        let timeout = self.config.publish_timeout();

        let senders: Vec<(Uuid, mpsc::Sender<Arc<AuctionEvent>>)> = {
            let mut topics = self.topics.write().await;
            let Some(slots) = topics.get_mut(&auction_id) else {
                debug!("No subscribers");
                return;
            };
            slots.retain(|slot| !slot.tx.is_closed());
            if slots.is_empty() {
                topics.remove(&auction_id);
                debug!("No subscribers");
                return;
            }
            slots.iter().map(|s| (s.id, s.tx.clone())).collect()
        };

        debug!(subscribers = senders.len(), "Publishing event");
        for (subscriber_id, tx) in senders {
            match tx.send_timeout(event.clone(), timeout).await {
                Ok(()) => {}
                Err(SendTimeoutError::Timeout(_)) => {
                    warn!(subscriber = %subscriber_id, "Subscriber too slow, event dropped");
                }
                Err(SendTimeoutError::Closed(_)) => {
                    debug!(subscriber = %subscriber_id, "Subscriber gone");
                }
            }
        }
    }

    /// Number of live subscribers for an auction.
    pub async fn subscriber_count(&self, auction_id: Uuid) -> usize {
        let topics = self.topics.read().await;
        topics
            .get(&auction_id)
            .map(|slots| slots.iter().filter(|s| !s.tx.is_closed()).count())
            .unwrap_or(0)
    }
}

/// A live subscription to one auction's events.
pub struct Subscription {
    id: Uuid,
    auction_id: Uuid,
    rx: mpsc::Receiver<Arc<AuctionEvent>>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn auction_id(&self) -> Uuid {
        self.auction_id
    }

    /// Next event, or `None` once the hub has dropped this subscriber.
    pub async fn recv(&mut self) -> Option<Arc<AuctionEvent>> {
        self.rx.recv().await
    }

    /// Adapt into a `Stream` for transports that want one.
    pub fn into_stream(self) -> ReceiverStream<Arc<AuctionEvent>> {
        ReceiverStream::new(self.rx)
    }
}

#[cfg(test)]
mod tests;
