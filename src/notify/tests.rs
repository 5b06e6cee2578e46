//! Tests for the queued notifier.

use std::sync::Arc;

use super::mock::RecordingSender;
use super::*;

fn note(kind: NotificationKind) -> Notification {
    Notification {
        recipient_id: Uuid::new_v4(),
        kind,
        title: "test".into(),
        message: "test message".into(),
        reference_id: None,
    }
}

#[tokio::test]
async fn test_dispatch_delivers_through_sender() {
    let sender = Arc::new(RecordingSender::new());
    let notifier = QueuedNotifier::new(sender.clone(), NotifyConfig::default());

    notifier.dispatch(note(NotificationKind::Outbid));

    assert!(sender.wait_for(1, Duration::from_secs(1)).await);
    let sent = sender.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, NotificationKind::Outbid);
}

#[tokio::test]
async fn test_delivery_retries_after_transient_failure() {
    let sender = Arc::new(RecordingSender::new());
    let notifier = QueuedNotifier::new(sender.clone(), NotifyConfig::default());

    sender.fail_next(2);
    notifier.dispatch(note(NotificationKind::AuctionWon));

    assert!(sender.wait_for(1, Duration::from_secs(3)).await);
    assert_eq!(sender.count_of(NotificationKind::AuctionWon).await, 1);
}

#[tokio::test]
async fn test_full_queue_drops_instead_of_blocking() {
    /// Sender slow enough that the queue stays occupied.
    struct SlowSender(Arc<RecordingSender>);

    #[async_trait]
    impl NotificationSender for SlowSender {
        async fn send(&self, notification: &Notification) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.0.send(notification).await
        }
    }

    let recorder = Arc::new(RecordingSender::new());
    let notifier = QueuedNotifier::new(
        Arc::new(SlowSender(recorder.clone())),
        NotifyConfig {
            queue_capacity: 1,
            max_attempts: 1,
        },
    );

    for _ in 0..4 {
        notifier.dispatch(note(NotificationKind::PaymentReminder));
    }

    // At most the in-flight one plus the single buffered one survive;
    // dispatch itself never blocked on the rest.
    tokio::time::sleep(Duration::from_secs(1)).await;
    let delivered = recorder.sent().await.len();
    assert!(
        (1..=2).contains(&delivered),
        "expected 1..=2 deliveries, got {delivered}"
    );
}
