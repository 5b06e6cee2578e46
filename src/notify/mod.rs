//! Outbound user notifications.
//!
//! The engine dispatches fire-and-forget; a background worker delivers
//! through a pluggable [`NotificationSender`] with retry. A lost
//! notification never fails or rolls back the transaction that
//! produced it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub mod mock;

pub type Result<T> = std::result::Result<T, NotifyError>;

/// Errors from notification delivery.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Configuration for the notification queue.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub queue_capacity: usize,
    /// Delivery attempts per notification before it is dropped.
    pub max_attempts: usize,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            max_attempts: 3,
        }
    }
}

/// What a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Outbid,
    AuctionWon,
    AuctionSold,
    AuctionExpired,
    AuctionCanceled,
    DepositRefunded,
    DepositForfeited,
    PaymentReminder,
    PaymentReceived,
    CompensationPaid,
    OrderCreated,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Outbid => "outbid",
            NotificationKind::AuctionWon => "auction_won",
            NotificationKind::AuctionSold => "auction_sold",
            NotificationKind::AuctionExpired => "auction_expired",
            NotificationKind::AuctionCanceled => "auction_canceled",
            NotificationKind::DepositRefunded => "deposit_refunded",
            NotificationKind::DepositForfeited => "deposit_forfeited",
            NotificationKind::PaymentReminder => "payment_reminder",
            NotificationKind::PaymentReceived => "payment_received",
            NotificationKind::CompensationPaid => "compensation_paid",
            NotificationKind::OrderCreated => "order_created",
        }
    }
}

/// One message to one user.
#[derive(Debug, Clone)]
pub struct Notification {
    pub recipient_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    /// Domain object the notification talks about, usually an auction.
    pub reference_id: Option<Uuid>,
}

/// Delivery backend.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Sender that only logs. Default backend for the worker binary.
pub struct LogSender;

#[async_trait]
impl NotificationSender for LogSender {
    async fn send(&self, notification: &Notification) -> Result<()> {
        info!(
            recipient = %notification.recipient_id,
            kind = notification.kind.as_str(),
            title = %notification.title,
            "Notification"
        );
        Ok(())
    }
}

fn delivery_backoff(max_attempts: usize) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(50))
        .with_max_delay(Duration::from_secs(2))
        .with_max_times(max_attempts)
        .with_jitter()
}

/// Bounded queue in front of a [`NotificationSender`].
pub struct QueuedNotifier {
    tx: mpsc::Sender<Notification>,
}

impl QueuedNotifier {
    /// Start the delivery worker and return the queue handle.
    pub fn new(sender: Arc<dyn NotificationSender>, config: NotifyConfig) -> Self {
        let (tx, mut rx) = mpsc::channel::<Notification>(config.queue_capacity);
        let max_attempts = config.max_attempts;

        tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                let deliver = || async { sender.send(&notification).await };
                let result = deliver
                    .retry(delivery_backoff(max_attempts))
                    .notify(|err, dur| {
                        warn!(error = %err, retry_in = ?dur, "Notification delivery failed, retrying");
                    })
                    .await;

                if let Err(e) = result {
                    error!(
                        recipient = %notification.recipient_id,
                        kind = notification.kind.as_str(),
                        error = %e,
                        "Notification dropped after retries"
                    );
                }
            }
            debug!("Notification worker stopped");
        });

        Self { tx }
    }

    /// Enqueue without waiting. On a full queue the notification is
    /// dropped and logged; state changes never wait on notifications.
    pub fn dispatch(&self, notification: Notification) {
        if let Err(e) = self.tx.try_send(notification) {
            warn!(error = %e, "Notification queue full, dropping");
        }
    }
}

#[cfg(test)]
mod tests;
