//! Participant row operations.
//!
//! Inserting a duplicate (auction, user) pair trips the table's UNIQUE
//! constraint; callers translate that into their own duplicate error.

use sea_query::{Expr, Order, Query, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::schema::Participants;
use super::{fmt_ts, parse_ts, parse_uuid, Result, StorageError};
use crate::model::AuctionParticipant;

pub async fn insert(conn: &mut SqliteConnection, participant: &AuctionParticipant) -> Result<()> {
    let query = Query::insert()
        .into_table(Participants::Table)
        .columns([
            Participants::Id,
            Participants::AuctionId,
            Participants::UserId,
            Participants::DepositAmount,
            Participants::DepositEntryId,
            Participants::IsRefunded,
            Participants::CreatedAt,
        ])
        .values_panic([
            participant.id.to_string().into(),
            participant.auction_id.to_string().into(),
            participant.user_id.to_string().into(),
            participant.deposit_amount.into(),
            participant.deposit_entry_id.to_string().into(),
            (participant.is_refunded as i64).into(),
            fmt_ts(participant.created_at).into(),
        ])
        .to_string(SqliteQueryBuilder);

    sqlx::query(&query).execute(&mut *conn).await?;
    Ok(())
}

/// Look up one user's participation row, if any.
pub async fn find_for_user(
    conn: &mut SqliteConnection,
    auction_id: Uuid,
    user_id: Uuid,
) -> Result<Option<AuctionParticipant>> {
    let query = select_columns()
        .and_where(Expr::col(Participants::AuctionId).eq(auction_id.to_string()))
        .and_where(Expr::col(Participants::UserId).eq(user_id.to_string()))
        .to_string(SqliteQueryBuilder);

    let row = sqlx::query(&query).fetch_optional(&mut *conn).await?;
    row.as_ref().map(row_to_participant).transpose()
}

pub async fn list_for_auction(pool: &SqlitePool, auction_id: Uuid) -> Result<Vec<AuctionParticipant>> {
    let mut conn = pool.acquire().await?;
    list_for_auction_tx(&mut conn, auction_id).await
}

pub async fn list_for_auction_tx(
    conn: &mut SqliteConnection,
    auction_id: Uuid,
) -> Result<Vec<AuctionParticipant>> {
    let query = select_columns()
        .and_where(Expr::col(Participants::AuctionId).eq(auction_id.to_string()))
        .order_by(Participants::CreatedAt, Order::Asc)
        .to_string(SqliteQueryBuilder);

    let rows = sqlx::query(&query).fetch_all(&mut *conn).await?;
    rows.iter().map(row_to_participant).collect()
}

pub async fn mark_refunded(conn: &mut SqliteConnection, participant_id: Uuid) -> Result<()> {
    let query = Query::update()
        .table(Participants::Table)
        .value(Participants::IsRefunded, 1i64)
        .and_where(Expr::col(Participants::Id).eq(participant_id.to_string()))
        .to_string(SqliteQueryBuilder);

    let result = sqlx::query(&query).execute(&mut *conn).await?;
    if result.rows_affected() == 0 {
        return Err(StorageError::NotFound {
            entity: "participant",
            id: participant_id,
        });
    }
    Ok(())
}

fn select_columns() -> sea_query::SelectStatement {
    Query::select()
        .columns([
            Participants::Id,
            Participants::AuctionId,
            Participants::UserId,
            Participants::DepositAmount,
            Participants::DepositEntryId,
            Participants::IsRefunded,
            Participants::CreatedAt,
        ])
        .from(Participants::Table)
        .to_owned()
}

fn row_to_participant(row: &SqliteRow) -> Result<AuctionParticipant> {
    Ok(AuctionParticipant {
        id: parse_uuid("id", row.get::<String, _>("id").as_str())?,
        auction_id: parse_uuid("auction_id", row.get::<String, _>("auction_id").as_str())?,
        user_id: parse_uuid("user_id", row.get::<String, _>("user_id").as_str())?,
        deposit_amount: row.get("deposit_amount"),
        deposit_entry_id: parse_uuid(
            "deposit_entry_id",
            row.get::<String, _>("deposit_entry_id").as_str(),
        )?,
        is_refunded: row.get::<i64, _>("is_refunded") != 0,
        created_at: parse_ts(row.get::<String, _>("created_at").as_str())?,
    })
}
