//! Durable delayed-task queue backed by the `scheduled_tasks` table.
//!
//! Tasks are keyed deterministically, so re-scheduling an existing key
//! is a natural no-op. Workers poll on a timer, claim due tasks with an
//! optimistic `pending -> running` flip, and hand them to a
//! [`TaskHandler`]. Execution is at-least-once: handlers re-read
//! current state and treat an already-handled task as success.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Expr, OnConflict, Order, Query, SqliteQueryBuilder};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::storage::schema::ScheduledTasks;
use crate::storage::{fmt_ts, parse_ts, StorageError, Store};

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Errors from scheduler operations.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Invalid task payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Key for the task that activates a scheduled auction.
pub fn start_key(auction_id: Uuid) -> String {
    format!("auction:start:{auction_id}")
}

/// Key for the task that ends an active auction.
pub fn end_key(auction_id: Uuid) -> String {
    format!("auction:end:{auction_id}")
}

/// Key for the winner-payment deadline check.
pub fn payment_key(auction_id: Uuid) -> String {
    format!("auction:payment:{auction_id}")
}

/// Key for one of the numbered payment reminders.
pub fn reminder_key(auction_id: Uuid, sequence: u32) -> String {
    format!("auction:reminder:{auction_id}:{sequence}")
}

/// What a task does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    StartAuction,
    EndAuction,
    CheckWinnerPayment,
    PaymentReminder,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::StartAuction => "start_auction",
            TaskKind::EndAuction => "end_auction",
            TaskKind::CheckWinnerPayment => "check_winner_payment",
            TaskKind::PaymentReminder => "payment_reminder",
        }
    }
}

impl std::str::FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "start_auction" => Ok(TaskKind::StartAuction),
            "end_auction" => Ok(TaskKind::EndAuction),
            "check_winner_payment" => Ok(TaskKind::CheckWinnerPayment),
            "payment_reminder" => Ok(TaskKind::PaymentReminder),
            other => Err(format!("unknown task kind: {other}")),
        }
    }
}

/// Queue states of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Failed,
    Canceled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
            TaskStatus::Canceled => "canceled",
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "done" => Ok(TaskStatus::Done),
            "failed" => Ok(TaskStatus::Failed),
            "canceled" => Ok(TaskStatus::Canceled),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// Payload carried by every auction task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub auction_id: Uuid,
    /// Which reminder this is. Zero for non-reminder tasks.
    #[serde(default)]
    pub reminder_sequence: u32,
}

impl TaskPayload {
    pub fn for_auction(auction_id: Uuid) -> Self {
        Self {
            auction_id,
            reminder_sequence: 0,
        }
    }

    pub fn reminder(auction_id: Uuid, sequence: u32) -> Self {
        Self {
            auction_id,
            reminder_sequence: sequence,
        }
    }
}

/// How a handler failure should be treated.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// Worth retrying, such as an infrastructure hiccup.
    #[error("transient: {0}")]
    Transient(String),

    /// Retrying can never help; the task is parked as failed.
    #[error("permanent: {0}")]
    Permanent(String),
}

/// Receives claimed tasks.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, kind: TaskKind, payload: &TaskPayload)
        -> std::result::Result<(), TaskError>;
}

/// One row of the task queue, as stored.
///
/// `kind` and `payload` stay raw here so corrupt rows can still be
/// inspected; execution parses them and parks unreadable tasks.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub key: String,
    pub kind: String,
    pub payload: String,
    pub run_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Configuration for the task scheduler.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Worker poll period.
    pub poll_interval_ms: u64,
    /// Concurrent polling workers.
    pub workers: usize,
    /// Attempts before a transiently failing task is parked as failed.
    pub max_attempts: i64,
    /// Base retry delay; the actual delay grows linearly with the
    /// attempt number.
    pub retry_delay_secs: i64,
    /// Tasks claimed per poll cycle.
    pub claim_batch: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            workers: 2,
            max_attempts: 5,
            retry_delay_secs: 30,
            claim_batch: 16,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Durable delayed-task scheduler.
pub struct Scheduler {
    store: Arc<Store>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(store: Arc<Store>, config: SchedulerConfig) -> Self {
        Self { store, config }
    }

    /// Queue `kind` to run at `run_at` under `key`.
    ///
    /// Returns `false` when a task with this key already exists, which
    /// makes scheduling idempotent across retried operations.
    #[tracing::instrument(
        name = "scheduler.schedule",
        skip(self, payload),
        fields(%key, kind = kind.as_str())
    )]
    pub async fn schedule_at(
        &self,
        key: &str,
        kind: TaskKind,
        run_at: DateTime<Utc>,
        payload: &TaskPayload,
    ) -> Result<bool> {
        let mut conn = self
            .store
            .pool()
            .acquire()
            .await
            .map_err(StorageError::from)?;
        schedule_in(&mut conn, key, kind, run_at, payload).await
    }

    /// Cancel a task that has not started yet.
    ///
    /// Returns whether a pending task was actually canceled. Canceling
    /// an absent, running, or finished task is not an error.
    pub async fn cancel(&self, key: &str) -> Result<bool> {
        let mut conn = self
            .store
            .pool()
            .acquire()
            .await
            .map_err(StorageError::from)?;
        cancel_in(&mut conn, key).await
    }

    /// Fetch one task row by key.
    pub async fn get(&self, key: &str) -> Result<Option<ScheduledTask>> {
        let query = Query::select()
            .columns([
                ScheduledTasks::TaskKey,
                ScheduledTasks::Kind,
                ScheduledTasks::Payload,
                ScheduledTasks::RunAt,
                ScheduledTasks::Status,
                ScheduledTasks::Attempts,
                ScheduledTasks::LastError,
                ScheduledTasks::CreatedAt,
                ScheduledTasks::UpdatedAt,
            ])
            .from(ScheduledTasks::Table)
            .and_where(Expr::col(ScheduledTasks::TaskKey).eq(key))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query)
            .fetch_optional(self.store.pool())
            .await
            .map_err(StorageError::from)?;
        row.as_ref().map(row_to_task).transpose()
    }

    /// Claim and run everything currently due, up to the batch size.
    ///
    /// Returns how many tasks were executed. The polling workers call
    /// this on a timer; tests call it directly for determinism.
    pub async fn run_pending_once(&self, handler: &dyn TaskHandler) -> Result<usize> {
        let query = Query::select()
            .columns([
                ScheduledTasks::TaskKey,
                ScheduledTasks::Kind,
                ScheduledTasks::Payload,
                ScheduledTasks::Attempts,
            ])
            .from(ScheduledTasks::Table)
            .and_where(Expr::col(ScheduledTasks::Status).eq(TaskStatus::Pending.as_str()))
            .and_where(Expr::col(ScheduledTasks::RunAt).lte(fmt_ts(Utc::now())))
            .order_by(ScheduledTasks::RunAt, Order::Asc)
            .limit(self.config.claim_batch)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query)
            .fetch_all(self.store.pool())
            .await
            .map_err(StorageError::from)?;

        let mut executed = 0;
        for row in &rows {
            let key: String = row.get("task_key");
            if !self.claim(&key).await? {
                continue;
            }
            let kind: String = row.get("kind");
            let payload: String = row.get("payload");
            let attempts: i64 = row.get("attempts");
            self.execute(handler, &key, &kind, &payload, attempts).await?;
            executed += 1;
        }
        Ok(executed)
    }

    /// Run polling workers until the process exits.
    pub async fn run(self: Arc<Self>, handler: Arc<dyn TaskHandler>) {
        info!(
            workers = self.config.workers,
            poll_ms = self.config.poll_interval_ms,
            "Task scheduler starting"
        );

        let mut handles = Vec::new();
        for worker_id in 0..self.config.workers.max(1) {
            let scheduler = self.clone();
            let handler = handler.clone();
            handles.push(tokio::spawn(async move {
                let mut ticker = interval(scheduler.config.poll_interval());
                loop {
                    ticker.tick().await;
                    match scheduler.run_pending_once(handler.as_ref()).await {
                        Ok(0) => {}
                        Ok(n) => debug!(worker = worker_id, tasks = n, "Poll cycle complete"),
                        Err(e) => error!(worker = worker_id, error = %e, "Poll cycle failed"),
                    }
                }
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Optimistic `pending -> running` flip; the loser of a race with
    /// another worker gets `false`.
    async fn claim(&self, key: &str) -> Result<bool> {
        let query = Query::update()
            .table(ScheduledTasks::Table)
            .value(ScheduledTasks::Status, TaskStatus::Running.as_str())
            .value(ScheduledTasks::UpdatedAt, fmt_ts(Utc::now()))
            .and_where(Expr::col(ScheduledTasks::TaskKey).eq(key))
            .and_where(Expr::col(ScheduledTasks::Status).eq(TaskStatus::Pending.as_str()))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query)
            .execute(self.store.pool())
            .await
            .map_err(StorageError::from)?;
        Ok(result.rows_affected() == 1)
    }

    async fn execute(
        &self,
        handler: &dyn TaskHandler,
        key: &str,
        kind_raw: &str,
        payload_raw: &str,
        attempts: i64,
    ) -> Result<()> {
        let parsed = kind_raw.parse::<TaskKind>().and_then(|kind| {
            serde_json::from_str::<TaskPayload>(payload_raw)
                .map(|payload| (kind, payload))
                .map_err(|e| e.to_string())
        });
        let (kind, payload) = match parsed {
            Ok(parts) => parts,
            Err(e) => {
                error!(%key, error = %e, "Unreadable task, parking as failed");
                return self
                    .finish(key, TaskStatus::Failed, attempts + 1, Some(e.as_str()), None)
                    .await;
            }
        };

        debug!(%key, kind = kind.as_str(), "Running task");
        match handler.handle(kind, &payload).await {
            Ok(()) => {
                self.finish(key, TaskStatus::Done, attempts + 1, None, None)
                    .await
            }
            Err(TaskError::Permanent(msg)) => {
                error!(%key, error = %msg, "Task failed permanently");
                self.finish(key, TaskStatus::Failed, attempts + 1, Some(msg.as_str()), None)
                    .await
            }
            Err(TaskError::Transient(msg)) => {
                let next_attempts = attempts + 1;
                if next_attempts >= self.config.max_attempts {
                    error!(
                        %key,
                        error = %msg,
                        attempts = next_attempts,
                        "Task failed after max attempts"
                    );
                    self.finish(key, TaskStatus::Failed, next_attempts, Some(msg.as_str()), None)
                        .await
                } else {
                    let delay =
                        chrono::Duration::seconds(self.config.retry_delay_secs * next_attempts);
                    let run_at = Utc::now() + delay;
                    warn!(%key, error = %msg, retry_at = %run_at, "Task failed, will retry");
                    self.finish(
                        key,
                        TaskStatus::Pending,
                        next_attempts,
                        Some(msg.as_str()),
                        Some(run_at),
                    )
                    .await
                }
            }
        }
    }

    async fn finish(
        &self,
        key: &str,
        status: TaskStatus,
        attempts: i64,
        last_error: Option<&str>,
        run_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let query = {
            let mut stmt = Query::update();
            stmt.table(ScheduledTasks::Table)
                .value(ScheduledTasks::Status, status.as_str())
                .value(ScheduledTasks::Attempts, attempts)
                .value(ScheduledTasks::LastError, last_error.map(str::to_owned))
                .value(ScheduledTasks::UpdatedAt, fmt_ts(Utc::now()))
                .and_where(Expr::col(ScheduledTasks::TaskKey).eq(key));
            if let Some(run_at) = run_at {
                stmt.value(ScheduledTasks::RunAt, fmt_ts(run_at));
            }
            stmt.to_string(SqliteQueryBuilder)
        };

        sqlx::query(&query)
            .execute(self.store.pool())
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }
}

/// Insert a task inside an open transaction.
///
/// Same key-dedup semantics as [`Scheduler::schedule_at`]. Lifecycle
/// operations use this so the task row commits atomically with the
/// state change it follows up on.
pub async fn schedule_in(
    conn: &mut SqliteConnection,
    key: &str,
    kind: TaskKind,
    run_at: DateTime<Utc>,
    payload: &TaskPayload,
) -> Result<bool> {
    let now = Utc::now();
    let body = serde_json::to_string(payload)?;

    let query = Query::insert()
        .into_table(ScheduledTasks::Table)
        .columns([
            ScheduledTasks::TaskKey,
            ScheduledTasks::Kind,
            ScheduledTasks::Payload,
            ScheduledTasks::RunAt,
            ScheduledTasks::Status,
            ScheduledTasks::Attempts,
            ScheduledTasks::CreatedAt,
            ScheduledTasks::UpdatedAt,
        ])
        .values_panic([
            key.into(),
            kind.as_str().into(),
            body.into(),
            fmt_ts(run_at).into(),
            TaskStatus::Pending.as_str().into(),
            0i64.into(),
            fmt_ts(now).into(),
            fmt_ts(now).into(),
        ])
        .on_conflict(
            OnConflict::column(ScheduledTasks::TaskKey)
                .do_nothing()
                .to_owned(),
        )
        .to_string(SqliteQueryBuilder);

    let result = sqlx::query(&query)
        .execute(&mut *conn)
        .await
        .map_err(StorageError::from)?;

    let inserted = result.rows_affected() == 1;
    if inserted {
        debug!(%key, kind = kind.as_str(), run_at = %run_at, "Task scheduled");
    } else {
        debug!(%key, "Task already scheduled, skipping");
    }
    Ok(inserted)
}

/// Cancel a pending task inside an open transaction.
pub async fn cancel_in(conn: &mut SqliteConnection, key: &str) -> Result<bool> {
    let query = Query::update()
        .table(ScheduledTasks::Table)
        .value(ScheduledTasks::Status, TaskStatus::Canceled.as_str())
        .value(ScheduledTasks::UpdatedAt, fmt_ts(Utc::now()))
        .and_where(Expr::col(ScheduledTasks::TaskKey).eq(key))
        .and_where(Expr::col(ScheduledTasks::Status).eq(TaskStatus::Pending.as_str()))
        .to_string(SqliteQueryBuilder);

    let result = sqlx::query(&query)
        .execute(&mut *conn)
        .await
        .map_err(StorageError::from)?;

    let canceled = result.rows_affected() == 1;
    if canceled {
        debug!(%key, "Task canceled");
    }
    Ok(canceled)
}

fn row_to_task(row: &SqliteRow) -> Result<ScheduledTask> {
    let status: String = row.get("status");
    let status = status
        .parse::<TaskStatus>()
        .map_err(StorageError::Corrupt)?;

    Ok(ScheduledTask {
        key: row.get("task_key"),
        kind: row.get("kind"),
        payload: row.get("payload"),
        run_at: parse_ts(row.get::<String, _>("run_at").as_str())?,
        status,
        attempts: row.get("attempts"),
        last_error: row.get("last_error"),
        created_at: parse_ts(row.get::<String, _>("created_at").as_str())?,
        updated_at: parse_ts(row.get::<String, _>("updated_at").as_str())?,
    })
}

#[cfg(test)]
mod tests;
