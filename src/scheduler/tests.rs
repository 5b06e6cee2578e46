//! Tests for the durable task scheduler.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use uuid::Uuid;

use super::*;

/// Handler that records calls and replays scripted results.
#[derive(Default)]
struct StubHandler {
    calls: Mutex<Vec<(TaskKind, TaskPayload)>>,
    script: Mutex<VecDeque<std::result::Result<(), TaskError>>>,
}

impl StubHandler {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push_result(&self, result: std::result::Result<(), TaskError>) {
        self.script.lock().unwrap().push_back(result);
    }

    fn calls(&self) -> Vec<(TaskKind, TaskPayload)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskHandler for StubHandler {
    async fn handle(
        &self,
        kind: TaskKind,
        payload: &TaskPayload,
    ) -> std::result::Result<(), TaskError> {
        self.calls.lock().unwrap().push((kind, payload.clone()));
        self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

async fn test_scheduler(config: SchedulerConfig) -> Scheduler {
    let store = Store::in_memory().await.unwrap();
    store.init().await.unwrap();
    Scheduler::new(Arc::new(store), config)
}

#[tokio::test]
async fn test_schedule_is_idempotent_per_key() {
    let scheduler = test_scheduler(SchedulerConfig::default()).await;
    let auction = Uuid::new_v4();
    let key = end_key(auction);
    let run_at = Utc::now() + Duration::hours(1);
    let payload = TaskPayload::for_auction(auction);

    assert!(scheduler
        .schedule_at(&key, TaskKind::EndAuction, run_at, &payload)
        .await
        .unwrap());
    assert!(!scheduler
        .schedule_at(&key, TaskKind::EndAuction, run_at, &payload)
        .await
        .unwrap());

    let task = scheduler.get(&key).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.kind, TaskKind::EndAuction.as_str());
    assert_eq!(task.attempts, 0);
}

#[tokio::test]
async fn test_due_tasks_run_and_complete() {
    let scheduler = test_scheduler(SchedulerConfig::default()).await;
    let handler = StubHandler::new();
    let auction = Uuid::new_v4();
    let key = start_key(auction);

    scheduler
        .schedule_at(
            &key,
            TaskKind::StartAuction,
            Utc::now() - Duration::seconds(1),
            &TaskPayload::for_auction(auction),
        )
        .await
        .unwrap();

    let executed = scheduler.run_pending_once(handler.as_ref()).await.unwrap();
    assert_eq!(executed, 1);

    let calls = handler.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, TaskKind::StartAuction);
    assert_eq!(calls[0].1.auction_id, auction);

    let task = scheduler.get(&key).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Done);
    assert_eq!(task.attempts, 1);
}

#[tokio::test]
async fn test_future_tasks_are_not_claimed() {
    let scheduler = test_scheduler(SchedulerConfig::default()).await;
    let handler = StubHandler::new();
    let auction = Uuid::new_v4();
    let key = end_key(auction);

    scheduler
        .schedule_at(
            &key,
            TaskKind::EndAuction,
            Utc::now() + Duration::minutes(5),
            &TaskPayload::for_auction(auction),
        )
        .await
        .unwrap();

    let executed = scheduler.run_pending_once(handler.as_ref()).await.unwrap();
    assert_eq!(executed, 0);
    assert!(handler.calls().is_empty());

    let task = scheduler.get(&key).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
}

#[tokio::test]
async fn test_cancel_prevents_execution() {
    let scheduler = test_scheduler(SchedulerConfig::default()).await;
    let handler = StubHandler::new();
    let auction = Uuid::new_v4();
    let key = end_key(auction);

    scheduler
        .schedule_at(
            &key,
            TaskKind::EndAuction,
            Utc::now() - Duration::seconds(1),
            &TaskPayload::for_auction(auction),
        )
        .await
        .unwrap();

    assert!(scheduler.cancel(&key).await.unwrap());
    assert!(!scheduler.cancel("auction:end:missing").await.unwrap());

    let executed = scheduler.run_pending_once(handler.as_ref()).await.unwrap();
    assert_eq!(executed, 0);
    assert!(handler.calls().is_empty());

    let task = scheduler.get(&key).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Canceled);
}

#[tokio::test]
async fn test_transient_failure_requeues_with_delay() {
    let scheduler = test_scheduler(SchedulerConfig {
        retry_delay_secs: 60,
        ..SchedulerConfig::default()
    })
    .await;
    let handler = StubHandler::new();
    handler.push_result(Err(TaskError::Transient("db busy".into())));

    let auction = Uuid::new_v4();
    let key = payment_key(auction);
    scheduler
        .schedule_at(
            &key,
            TaskKind::CheckWinnerPayment,
            Utc::now() - Duration::seconds(1),
            &TaskPayload::for_auction(auction),
        )
        .await
        .unwrap();

    assert_eq!(scheduler.run_pending_once(handler.as_ref()).await.unwrap(), 1);

    let task = scheduler.get(&key).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.attempts, 1);
    assert!(task.run_at > Utc::now());
    assert_eq!(task.last_error.as_deref(), Some("db busy"));

    // Not due yet, so a second poll leaves it alone.
    assert_eq!(scheduler.run_pending_once(handler.as_ref()).await.unwrap(), 0);
    assert_eq!(handler.calls().len(), 1);
}

#[tokio::test]
async fn test_transient_failure_retries_until_success() {
    let scheduler = test_scheduler(SchedulerConfig {
        retry_delay_secs: 0,
        ..SchedulerConfig::default()
    })
    .await;
    let handler = StubHandler::new();
    handler.push_result(Err(TaskError::Transient("db busy".into())));
    handler.push_result(Ok(()));

    let auction = Uuid::new_v4();
    let key = payment_key(auction);
    scheduler
        .schedule_at(
            &key,
            TaskKind::CheckWinnerPayment,
            Utc::now() - Duration::seconds(1),
            &TaskPayload::for_auction(auction),
        )
        .await
        .unwrap();

    assert_eq!(scheduler.run_pending_once(handler.as_ref()).await.unwrap(), 1);
    assert_eq!(scheduler.run_pending_once(handler.as_ref()).await.unwrap(), 1);

    let task = scheduler.get(&key).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Done);
    assert_eq!(task.attempts, 2);
    assert_eq!(handler.calls().len(), 2);
}

#[tokio::test]
async fn test_transient_failures_park_after_max_attempts() {
    let scheduler = test_scheduler(SchedulerConfig {
        retry_delay_secs: 0,
        max_attempts: 2,
        ..SchedulerConfig::default()
    })
    .await;
    let handler = StubHandler::new();
    handler.push_result(Err(TaskError::Transient("still broken".into())));
    handler.push_result(Err(TaskError::Transient("still broken".into())));

    let auction = Uuid::new_v4();
    let key = payment_key(auction);
    scheduler
        .schedule_at(
            &key,
            TaskKind::CheckWinnerPayment,
            Utc::now() - Duration::seconds(1),
            &TaskPayload::for_auction(auction),
        )
        .await
        .unwrap();

    assert_eq!(scheduler.run_pending_once(handler.as_ref()).await.unwrap(), 1);
    assert_eq!(scheduler.run_pending_once(handler.as_ref()).await.unwrap(), 1);

    let task = scheduler.get(&key).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.attempts, 2);

    // Parked tasks are never claimed again.
    assert_eq!(scheduler.run_pending_once(handler.as_ref()).await.unwrap(), 0);
    assert_eq!(handler.calls().len(), 2);
}

#[tokio::test]
async fn test_permanent_failure_parks_immediately() {
    let scheduler = test_scheduler(SchedulerConfig::default()).await;
    let handler = StubHandler::new();
    handler.push_result(Err(TaskError::Permanent("no such auction".into())));

    let auction = Uuid::new_v4();
    let key = end_key(auction);
    scheduler
        .schedule_at(
            &key,
            TaskKind::EndAuction,
            Utc::now() - Duration::seconds(1),
            &TaskPayload::for_auction(auction),
        )
        .await
        .unwrap();

    assert_eq!(scheduler.run_pending_once(handler.as_ref()).await.unwrap(), 1);

    let task = scheduler.get(&key).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.attempts, 1);
    assert_eq!(task.last_error.as_deref(), Some("no such auction"));
}

#[tokio::test]
async fn test_unreadable_task_parks_as_failed() {
    let scheduler = test_scheduler(SchedulerConfig::default()).await;
    let handler = StubHandler::new();

    let now = crate::storage::fmt_ts(Utc::now() - Duration::seconds(1));
    sqlx::query(
        "INSERT INTO scheduled_tasks \
         (task_key, kind, payload, run_at, status, attempts, created_at, updated_at) \
         VALUES (?, 'bogus_kind', '{}', ?, 'pending', 0, ?, ?)",
    )
    .bind("auction:bogus:1")
    .bind(&now)
    .bind(&now)
    .bind(&now)
    .execute(scheduler.store.pool())
    .await
    .unwrap();

    assert_eq!(scheduler.run_pending_once(handler.as_ref()).await.unwrap(), 1);
    assert!(handler.calls().is_empty());

    let task = scheduler.get("auction:bogus:1").await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.last_error.is_some());
}
