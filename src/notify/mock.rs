//! Test doubles for notification delivery.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Notification, NotificationKind, NotificationSender, NotifyError, Result};

/// Sender that records everything it is asked to deliver.
///
/// `fail_next` injects transient failures for retry tests.
#[derive(Default)]
pub struct RecordingSender {
    sent: RwLock<Vec<Notification>>,
    fail_times: AtomicUsize,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` deliveries fail.
    pub fn fail_next(&self, n: usize) {
        self.fail_times.store(n, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.read().await.clone()
    }

    pub async fn count_of(&self, kind: NotificationKind) -> usize {
        self.sent
            .read()
            .await
            .iter()
            .filter(|n| n.kind == kind)
            .count()
    }

    pub async fn for_recipient(&self, recipient_id: Uuid) -> Vec<Notification> {
        self.sent
            .read()
            .await
            .iter()
            .filter(|n| n.recipient_id == recipient_id)
            .cloned()
            .collect()
    }

    /// Poll until at least `n` notifications were recorded or `timeout`
    /// passed. Returns whether the count was reached.
    pub async fn wait_for(&self, n: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.sent.read().await.len() >= n {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl NotificationSender for RecordingSender {
    async fn send(&self, notification: &Notification) -> Result<()> {
        let remaining = self.fail_times.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_times.store(remaining - 1, Ordering::SeqCst);
            return Err(NotifyError::Delivery("injected failure".into()));
        }
        self.sent.write().await.push(notification.clone());
        Ok(())
    }
}
