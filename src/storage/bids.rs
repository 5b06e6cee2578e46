//! Bid row operations. Bids are append-only.

use sea_query::{Expr, Order, Query, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::schema::Bids;
use super::{fmt_ts, parse_ts, parse_uuid, Result, StorageError};
use crate::model::AuctionBid;

pub async fn insert(conn: &mut SqliteConnection, bid: &AuctionBid) -> Result<()> {
    let query = Query::insert()
        .into_table(Bids::Table)
        .columns([
            Bids::Id,
            Bids::AuctionId,
            Bids::BidderId,
            Bids::ParticipantId,
            Bids::Amount,
            Bids::CreatedAt,
        ])
        .values_panic([
            bid.id.to_string().into(),
            bid.auction_id.to_string().into(),
            bid.bidder_id.to_string().into(),
            bid.participant_id.to_string().into(),
            bid.amount.into(),
            fmt_ts(bid.created_at).into(),
        ])
        .to_string(SqliteQueryBuilder);

    sqlx::query(&query).execute(&mut *conn).await?;
    Ok(())
}

pub async fn get(pool: &SqlitePool, id: Uuid) -> Result<AuctionBid> {
    let mut conn = pool.acquire().await?;
    get_tx(&mut conn, id).await
}

pub async fn get_tx(conn: &mut SqliteConnection, id: Uuid) -> Result<AuctionBid> {
    let query = select_columns()
        .and_where(Expr::col(Bids::Id).eq(id.to_string()))
        .to_string(SqliteQueryBuilder);

    let row = sqlx::query(&query).fetch_optional(&mut *conn).await?;
    match row {
        Some(row) => row_to_bid(&row),
        None => Err(StorageError::NotFound { entity: "bid", id }),
    }
}

/// All bids for an auction in placement order.
pub async fn list_for_auction(pool: &SqlitePool, auction_id: Uuid) -> Result<Vec<AuctionBid>> {
    let query = select_columns()
        .and_where(Expr::col(Bids::AuctionId).eq(auction_id.to_string()))
        .order_by(Bids::CreatedAt, Order::Asc)
        .to_string(SqliteQueryBuilder);

    let rows = sqlx::query(&query).fetch_all(pool).await?;
    rows.iter().map(row_to_bid).collect()
}

fn select_columns() -> sea_query::SelectStatement {
    Query::select()
        .columns([
            Bids::Id,
            Bids::AuctionId,
            Bids::BidderId,
            Bids::ParticipantId,
            Bids::Amount,
            Bids::CreatedAt,
        ])
        .from(Bids::Table)
        .to_owned()
}

fn row_to_bid(row: &SqliteRow) -> Result<AuctionBid> {
    Ok(AuctionBid {
        id: parse_uuid("id", row.get::<String, _>("id").as_str())?,
        auction_id: parse_uuid("auction_id", row.get::<String, _>("auction_id").as_str())?,
        bidder_id: parse_uuid("bidder_id", row.get::<String, _>("bidder_id").as_str())?,
        participant_id: parse_uuid(
            "participant_id",
            row.get::<String, _>("participant_id").as_str(),
        )?,
        amount: row.get("amount"),
        created_at: parse_ts(row.get::<String, _>("created_at").as_str())?,
    })
}
