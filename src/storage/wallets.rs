//! Wallet and ledger-entry row operations.
//!
//! Balance math stays out of this module. Callers compute the new
//! amounts inside their transaction and write them through
//! [`set_amounts`]; this file only moves rows.

use chrono::{DateTime, Utc};
use sea_query::{Alias, Expr, Order, Query, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::schema::{WalletEntries, Wallets};
use super::{fmt_ts, parse_ts, parse_uuid, Result, StorageError};
use crate::model::{AffectedField, EntryStatus, EntryType, Wallet, WalletEntry};

/// Fetch a wallet, creating a zero-balance row on first touch.
pub async fn get_or_create(conn: &mut SqliteConnection, user_id: Uuid) -> Result<Wallet> {
    if let Some(wallet) = find(conn, user_id).await? {
        return Ok(wallet);
    }

    let now = Utc::now();
    let query = Query::insert()
        .into_table(Wallets::Table)
        .columns([
            Wallets::UserId,
            Wallets::Balance,
            Wallets::NonWithdrawable,
            Wallets::CreatedAt,
            Wallets::UpdatedAt,
        ])
        .values_panic([
            user_id.to_string().into(),
            0i64.into(),
            0i64.into(),
            fmt_ts(now).into(),
            fmt_ts(now).into(),
        ])
        .to_string(SqliteQueryBuilder);

    sqlx::query(&query).execute(&mut *conn).await?;

    Ok(Wallet {
        user_id,
        balance: 0,
        non_withdrawable: 0,
        created_at: now,
        updated_at: now,
    })
}

pub async fn get(pool: &SqlitePool, user_id: Uuid) -> Result<Wallet> {
    let mut conn = pool.acquire().await?;
    find(&mut conn, user_id).await?.ok_or(StorageError::NotFound {
        entity: "wallet",
        id: user_id,
    })
}

async fn find(conn: &mut SqliteConnection, user_id: Uuid) -> Result<Option<Wallet>> {
    let query = Query::select()
        .columns([
            Wallets::UserId,
            Wallets::Balance,
            Wallets::NonWithdrawable,
            Wallets::CreatedAt,
            Wallets::UpdatedAt,
        ])
        .from(Wallets::Table)
        .and_where(Expr::col(Wallets::UserId).eq(user_id.to_string()))
        .to_string(SqliteQueryBuilder);

    let row = sqlx::query(&query).fetch_optional(&mut *conn).await?;
    row.as_ref().map(row_to_wallet).transpose()
}

/// Overwrite both balance fields for a user.
pub async fn set_amounts(
    conn: &mut SqliteConnection,
    user_id: Uuid,
    balance: i64,
    non_withdrawable: i64,
    updated_at: DateTime<Utc>,
) -> Result<()> {
    let query = Query::update()
        .table(Wallets::Table)
        .value(Wallets::Balance, balance)
        .value(Wallets::NonWithdrawable, non_withdrawable)
        .value(Wallets::UpdatedAt, fmt_ts(updated_at))
        .and_where(Expr::col(Wallets::UserId).eq(user_id.to_string()))
        .to_string(SqliteQueryBuilder);

    let result = sqlx::query(&query).execute(&mut *conn).await?;
    if result.rows_affected() == 0 {
        return Err(StorageError::NotFound {
            entity: "wallet",
            id: user_id,
        });
    }
    Ok(())
}

pub async fn insert_entry(conn: &mut SqliteConnection, entry: &WalletEntry) -> Result<()> {
    let query = Query::insert()
        .into_table(WalletEntries::Table)
        .columns([
            WalletEntries::Id,
            WalletEntries::UserId,
            WalletEntries::Amount,
            WalletEntries::EntryType,
            WalletEntries::AffectedField,
            WalletEntries::Status,
            WalletEntries::ReferenceId,
            WalletEntries::ReferenceType,
            WalletEntries::CreatedAt,
            WalletEntries::CompletedAt,
        ])
        .values_panic([
            entry.id.to_string().into(),
            entry.user_id.to_string().into(),
            entry.amount.into(),
            entry.entry_type.as_str().into(),
            entry.affected_field.as_str().into(),
            entry.status.as_str().into(),
            entry.reference_id.map(|id| id.to_string()).into(),
            entry.reference_type.clone().into(),
            fmt_ts(entry.created_at).into(),
            entry.completed_at.map(fmt_ts).into(),
        ])
        .to_string(SqliteQueryBuilder);

    sqlx::query(&query).execute(&mut *conn).await?;
    Ok(())
}

/// All ledger entries for a user, oldest first.
pub async fn list_entries(pool: &SqlitePool, user_id: Uuid) -> Result<Vec<WalletEntry>> {
    let query = Query::select()
        .columns([
            WalletEntries::Id,
            WalletEntries::UserId,
            WalletEntries::Amount,
            WalletEntries::EntryType,
            WalletEntries::AffectedField,
            WalletEntries::Status,
            WalletEntries::ReferenceId,
            WalletEntries::ReferenceType,
            WalletEntries::CreatedAt,
            WalletEntries::CompletedAt,
        ])
        .from(WalletEntries::Table)
        .and_where(Expr::col(WalletEntries::UserId).eq(user_id.to_string()))
        .order_by(WalletEntries::CreatedAt, Order::Asc)
        .to_string(SqliteQueryBuilder);

    let rows = sqlx::query(&query).fetch_all(pool).await?;
    rows.iter().map(row_to_entry).collect()
}

/// Sum of completed entry amounts per affected field.
///
/// Returns `(balance_sum, non_withdrawable_sum)`.
pub async fn completed_sums(pool: &SqlitePool, user_id: Uuid) -> Result<(i64, i64)> {
    let query = Query::select()
        .column(WalletEntries::AffectedField)
        .expr_as(Expr::col(WalletEntries::Amount).sum(), Alias::new("total"))
        .from(WalletEntries::Table)
        .and_where(Expr::col(WalletEntries::UserId).eq(user_id.to_string()))
        .and_where(Expr::col(WalletEntries::Status).eq(EntryStatus::Completed.as_str()))
        .group_by_col(WalletEntries::AffectedField)
        .to_string(SqliteQueryBuilder);

    let rows = sqlx::query(&query).fetch_all(pool).await?;

    let mut balance_sum = 0i64;
    let mut non_withdrawable_sum = 0i64;
    for row in &rows {
        let field: String = row.get("affected_field");
        let field = field.parse::<AffectedField>().map_err(StorageError::Corrupt)?;
        let total: i64 = row.get("total");
        match field {
            AffectedField::Balance => balance_sum = total,
            AffectedField::NonWithdrawable => non_withdrawable_sum = total,
        }
    }
    Ok((balance_sum, non_withdrawable_sum))
}

fn row_to_wallet(row: &SqliteRow) -> Result<Wallet> {
    Ok(Wallet {
        user_id: parse_uuid("user_id", row.get::<String, _>("user_id").as_str())?,
        balance: row.get("balance"),
        non_withdrawable: row.get("non_withdrawable"),
        created_at: parse_ts(row.get::<String, _>("created_at").as_str())?,
        updated_at: parse_ts(row.get::<String, _>("updated_at").as_str())?,
    })
}

fn row_to_entry(row: &SqliteRow) -> Result<WalletEntry> {
    let entry_type: String = row.get("entry_type");
    let affected_field: String = row.get("affected_field");
    let status: String = row.get("status");

    let reference_id = match row.get::<Option<String>, _>("reference_id") {
        Some(s) => Some(parse_uuid("reference_id", &s)?),
        None => None,
    };
    let completed_at = match row.get::<Option<String>, _>("completed_at") {
        Some(s) => Some(parse_ts(&s)?),
        None => None,
    };

    Ok(WalletEntry {
        id: parse_uuid("id", row.get::<String, _>("id").as_str())?,
        user_id: parse_uuid("user_id", row.get::<String, _>("user_id").as_str())?,
        amount: row.get("amount"),
        entry_type: entry_type.parse::<EntryType>().map_err(StorageError::Corrupt)?,
        affected_field: affected_field
            .parse::<AffectedField>()
            .map_err(StorageError::Corrupt)?,
        status: status.parse::<EntryStatus>().map_err(StorageError::Corrupt)?,
        reference_id,
        reference_type: row.get("reference_type"),
        created_at: parse_ts(row.get::<String, _>("created_at").as_str())?,
        completed_at,
    })
}
