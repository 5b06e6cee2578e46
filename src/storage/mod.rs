//! SQLite persistence for auctions, wallets, and scheduled tasks.
//!
//! All writes that must be atomic run inside a single `BEGIN IMMEDIATE`
//! transaction so SQLite's single-writer lock serializes them. Table
//! modules expose row-level operations; policy lives in the callers.
//!
//! Timestamps are stored as RFC 3339 TEXT with fixed microsecond
//! precision, which keeps lexicographic comparison equal to
//! chronological comparison.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;
use uuid::Uuid;

pub mod auctions;
pub mod bids;
pub mod participants;
pub mod schema;
pub mod wallets;

pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors from the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid UUID in column {column}: {source}")]
    InvalidUuid {
        column: &'static str,
        source: uuid::Error,
    },

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    /// True when the underlying database rejected a UNIQUE constraint.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            StorageError::Database(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }
}

/// Shared SQLite pool behind every subsystem.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if needed) the database file at `path`.
    pub async fn connect(path: &str) -> Result<Self> {
        info!("Storage: sqlite at {}", path);

        if let Some(parent) = std::path::Path::new(path).parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Corrupt(format!("cannot create storage directory: {e}"))
            })?;
        }

        let pool = SqlitePool::connect(&format!("sqlite:{}?mode=rwc", path)).await?;
        Ok(Self { pool })
    }

    /// In-memory database on a single pooled connection.
    ///
    /// A pool of several `:memory:` connections would see several
    /// databases, so the pool is capped at one.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    /// Create all tables and indexes if they do not exist.
    pub async fn init(&self) -> Result<()> {
        for ddl in [
            schema::CREATE_AUCTIONS_TABLE,
            schema::CREATE_BIDS_TABLE,
            schema::CREATE_PARTICIPANTS_TABLE,
            schema::CREATE_WALLETS_TABLE,
            schema::CREATE_WALLET_ENTRIES_TABLE,
            schema::CREATE_SCHEDULED_TASKS_TABLE,
        ] {
            sqlx::query(ddl).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Start a write transaction, taking SQLite's writer lock up front.
pub(crate) async fn begin_immediate(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
    Ok(())
}

pub(crate) async fn commit(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query("COMMIT").execute(&mut *conn).await?;
    Ok(())
}

/// Best-effort rollback; the original error is what callers report.
pub(crate) async fn rollback(conn: &mut SqliteConnection) {
    let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
}

/// Fixed-width RFC 3339 rendering, safe for string ordering.
pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::InvalidTimestamp(format!("{s}: {e}")))
}

pub(crate) fn parse_uuid(column: &'static str, s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|source| StorageError::InvalidUuid { column, source })
}
