//! Auction row operations.
//!
//! Identity and pricing columns are written once at insert; `update`
//! only touches the columns that legitimately change over an auction's
//! life. Functions suffixed `_tx` expect an already-open transaction.

use sea_query::{Expr, Query, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::schema::Auctions;
use super::{fmt_ts, parse_ts, parse_uuid, Result, StorageError};
use crate::model::{Auction, AuctionStatus, ItemSnapshot};

pub async fn insert(conn: &mut SqliteConnection, auction: &Auction) -> Result<()> {
    let query = Query::insert()
        .into_table(Auctions::Table)
        .columns([
            Auctions::Id,
            Auctions::SellerId,
            Auctions::ItemName,
            Auctions::ItemDescription,
            Auctions::ItemCategory,
            Auctions::ItemImageUrl,
            Auctions::StartingPrice,
            Auctions::BidIncrement,
            Auctions::BuyNowPrice,
            Auctions::DepositAmount,
            Auctions::CurrentPrice,
            Auctions::WinningBidId,
            Auctions::Status,
            Auctions::StartTime,
            Auctions::EndTime,
            Auctions::ActualEndTime,
            Auctions::WinnerPaymentDeadline,
            Auctions::TotalBids,
            Auctions::TotalParticipants,
            Auctions::OrderId,
            Auctions::CreatedAt,
        ])
        .values_panic([
            auction.id.to_string().into(),
            auction.seller_id.to_string().into(),
            auction.item.name.clone().into(),
            auction.item.description.clone().into(),
            auction.item.category.clone().into(),
            auction.item.image_url.clone().into(),
            auction.starting_price.into(),
            auction.bid_increment.into(),
            auction.buy_now_price.into(),
            auction.deposit_amount.into(),
            auction.current_price.into(),
            auction.winning_bid_id.map(|id| id.to_string()).into(),
            auction.status.as_str().into(),
            fmt_ts(auction.start_time).into(),
            fmt_ts(auction.end_time).into(),
            auction.actual_end_time.map(fmt_ts).into(),
            auction.winner_payment_deadline.map(fmt_ts).into(),
            auction.total_bids.into(),
            auction.total_participants.into(),
            auction.order_id.map(|id| id.to_string()).into(),
            fmt_ts(auction.created_at).into(),
        ])
        .to_string(SqliteQueryBuilder);

    sqlx::query(&query).execute(&mut *conn).await?;
    Ok(())
}

/// Rewrite the mutable columns of an existing auction row.
pub async fn update(conn: &mut SqliteConnection, auction: &Auction) -> Result<()> {
    let query = Query::update()
        .table(Auctions::Table)
        .value(Auctions::CurrentPrice, auction.current_price)
        .value(
            Auctions::WinningBidId,
            auction.winning_bid_id.map(|id| id.to_string()),
        )
        .value(Auctions::Status, auction.status.as_str())
        .value(Auctions::ActualEndTime, auction.actual_end_time.map(fmt_ts))
        .value(
            Auctions::WinnerPaymentDeadline,
            auction.winner_payment_deadline.map(fmt_ts),
        )
        .value(Auctions::TotalBids, auction.total_bids)
        .value(Auctions::TotalParticipants, auction.total_participants)
        .value(Auctions::OrderId, auction.order_id.map(|id| id.to_string()))
        .and_where(Expr::col(Auctions::Id).eq(auction.id.to_string()))
        .to_string(SqliteQueryBuilder);

    let result = sqlx::query(&query).execute(&mut *conn).await?;
    if result.rows_affected() == 0 {
        return Err(StorageError::NotFound {
            entity: "auction",
            id: auction.id,
        });
    }
    Ok(())
}

pub async fn get(pool: &SqlitePool, id: Uuid) -> Result<Auction> {
    let mut conn = pool.acquire().await?;
    get_tx(&mut conn, id).await
}

pub async fn get_tx(conn: &mut SqliteConnection, id: Uuid) -> Result<Auction> {
    let query = Query::select()
        .columns([
            Auctions::Id,
            Auctions::SellerId,
            Auctions::ItemName,
            Auctions::ItemDescription,
            Auctions::ItemCategory,
            Auctions::ItemImageUrl,
            Auctions::StartingPrice,
            Auctions::BidIncrement,
            Auctions::BuyNowPrice,
            Auctions::DepositAmount,
            Auctions::CurrentPrice,
            Auctions::WinningBidId,
            Auctions::Status,
            Auctions::StartTime,
            Auctions::EndTime,
            Auctions::ActualEndTime,
            Auctions::WinnerPaymentDeadline,
            Auctions::TotalBids,
            Auctions::TotalParticipants,
            Auctions::OrderId,
            Auctions::CreatedAt,
        ])
        .from(Auctions::Table)
        .and_where(Expr::col(Auctions::Id).eq(id.to_string()))
        .to_string(SqliteQueryBuilder);

    let row = sqlx::query(&query).fetch_optional(&mut *conn).await?;
    match row {
        Some(row) => row_to_auction(&row),
        None => Err(StorageError::NotFound {
            entity: "auction",
            id,
        }),
    }
}

fn row_to_auction(row: &SqliteRow) -> Result<Auction> {
    let status: String = row.get("status");
    let status = status
        .parse::<AuctionStatus>()
        .map_err(StorageError::Corrupt)?;

    let winning_bid_id = match row.get::<Option<String>, _>("winning_bid_id") {
        Some(s) => Some(parse_uuid("winning_bid_id", &s)?),
        None => None,
    };
    let order_id = match row.get::<Option<String>, _>("order_id") {
        Some(s) => Some(parse_uuid("order_id", &s)?),
        None => None,
    };
    let actual_end_time = match row.get::<Option<String>, _>("actual_end_time") {
        Some(s) => Some(parse_ts(&s)?),
        None => None,
    };
    let winner_payment_deadline = match row.get::<Option<String>, _>("winner_payment_deadline") {
        Some(s) => Some(parse_ts(&s)?),
        None => None,
    };

    Ok(Auction {
        id: parse_uuid("id", row.get::<String, _>("id").as_str())?,
        seller_id: parse_uuid("seller_id", row.get::<String, _>("seller_id").as_str())?,
        item: ItemSnapshot {
            name: row.get("item_name"),
            description: row.get("item_description"),
            category: row.get("item_category"),
            image_url: row.get("item_image_url"),
        },
        starting_price: row.get("starting_price"),
        bid_increment: row.get("bid_increment"),
        buy_now_price: row.get("buy_now_price"),
        deposit_amount: row.get("deposit_amount"),
        current_price: row.get("current_price"),
        winning_bid_id,
        status,
        start_time: parse_ts(row.get::<String, _>("start_time").as_str())?,
        end_time: parse_ts(row.get::<String, _>("end_time").as_str())?,
        actual_end_time,
        winner_payment_deadline,
        total_bids: row.get("total_bids"),
        total_participants: row.get("total_participants"),
        order_id,
        created_at: parse_ts(row.get::<String, _>("created_at").as_str())?,
    })
}
