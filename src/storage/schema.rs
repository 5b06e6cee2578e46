//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::Iden;

/// Auctions table schema.
#[derive(Iden)]
pub enum Auctions {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "seller_id"]
    SellerId,
    #[iden = "item_name"]
    ItemName,
    #[iden = "item_description"]
    ItemDescription,
    #[iden = "item_category"]
    ItemCategory,
    #[iden = "item_image_url"]
    ItemImageUrl,
    #[iden = "starting_price"]
    StartingPrice,
    #[iden = "bid_increment"]
    BidIncrement,
    #[iden = "buy_now_price"]
    BuyNowPrice,
    #[iden = "deposit_amount"]
    DepositAmount,
    #[iden = "current_price"]
    CurrentPrice,
    #[iden = "winning_bid_id"]
    WinningBidId,
    #[iden = "status"]
    Status,
    #[iden = "start_time"]
    StartTime,
    #[iden = "end_time"]
    EndTime,
    #[iden = "actual_end_time"]
    ActualEndTime,
    #[iden = "winner_payment_deadline"]
    WinnerPaymentDeadline,
    #[iden = "total_bids"]
    TotalBids,
    #[iden = "total_participants"]
    TotalParticipants,
    #[iden = "order_id"]
    OrderId,
    #[iden = "created_at"]
    CreatedAt,
}

/// Bids table schema.
#[derive(Iden)]
pub enum Bids {
    #[iden = "auction_bids"]
    Table,
    #[iden = "id"]
    Id,
    #[iden = "auction_id"]
    AuctionId,
    #[iden = "bidder_id"]
    BidderId,
    #[iden = "participant_id"]
    ParticipantId,
    #[iden = "amount"]
    Amount,
    #[iden = "created_at"]
    CreatedAt,
}

/// Participants table schema.
#[derive(Iden)]
pub enum Participants {
    #[iden = "auction_participants"]
    Table,
    #[iden = "id"]
    Id,
    #[iden = "auction_id"]
    AuctionId,
    #[iden = "user_id"]
    UserId,
    #[iden = "deposit_amount"]
    DepositAmount,
    #[iden = "deposit_entry_id"]
    DepositEntryId,
    #[iden = "is_refunded"]
    IsRefunded,
    #[iden = "created_at"]
    CreatedAt,
}

/// Wallets table schema.
#[derive(Iden)]
pub enum Wallets {
    Table,
    #[iden = "user_id"]
    UserId,
    #[iden = "balance"]
    Balance,
    #[iden = "non_withdrawable"]
    NonWithdrawable,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// Wallet entries table schema.
#[derive(Iden)]
pub enum WalletEntries {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "user_id"]
    UserId,
    #[iden = "amount"]
    Amount,
    #[iden = "entry_type"]
    EntryType,
    #[iden = "affected_field"]
    AffectedField,
    #[iden = "status"]
    Status,
    #[iden = "reference_id"]
    ReferenceId,
    #[iden = "reference_type"]
    ReferenceType,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "completed_at"]
    CompletedAt,
}

/// Scheduled tasks table schema.
#[derive(Iden)]
pub enum ScheduledTasks {
    Table,
    #[iden = "task_key"]
    TaskKey,
    #[iden = "kind"]
    Kind,
    #[iden = "payload"]
    Payload,
    #[iden = "run_at"]
    RunAt,
    #[iden = "status"]
    Status,
    #[iden = "attempts"]
    Attempts,
    #[iden = "last_error"]
    LastError,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// SQL for creating the auctions table.
pub const CREATE_AUCTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS auctions (
    id TEXT PRIMARY KEY,
    seller_id TEXT NOT NULL,
    item_name TEXT NOT NULL,
    item_description TEXT,
    item_category TEXT,
    item_image_url TEXT,
    starting_price INTEGER NOT NULL,
    bid_increment INTEGER NOT NULL,
    buy_now_price INTEGER,
    deposit_amount INTEGER NOT NULL,
    current_price INTEGER NOT NULL,
    winning_bid_id TEXT,
    status TEXT NOT NULL,
    start_time TEXT NOT NULL,
    end_time TEXT NOT NULL,
    actual_end_time TEXT,
    winner_payment_deadline TEXT,
    total_bids INTEGER NOT NULL DEFAULT 0,
    total_participants INTEGER NOT NULL DEFAULT 0,
    order_id TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_auctions_status ON auctions(status);
"#;

/// SQL for creating the bids table.
pub const CREATE_BIDS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS auction_bids (
    id TEXT PRIMARY KEY,
    auction_id TEXT NOT NULL,
    bidder_id TEXT NOT NULL,
    participant_id TEXT NOT NULL,
    amount INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_bids_auction ON auction_bids(auction_id);
"#;

/// SQL for creating the participants table.
///
/// The unique constraint backs the one-join-per-user rule; a second join
/// surfaces as a constraint violation instead of a second deposit.
pub const CREATE_PARTICIPANTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS auction_participants (
    id TEXT PRIMARY KEY,
    auction_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    deposit_amount INTEGER NOT NULL,
    deposit_entry_id TEXT NOT NULL,
    is_refunded INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    UNIQUE (auction_id, user_id)
);
"#;

/// SQL for creating the wallets table.
pub const CREATE_WALLETS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS wallets (
    user_id TEXT PRIMARY KEY,
    balance INTEGER NOT NULL DEFAULT 0,
    non_withdrawable INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// SQL for creating the wallet entries table.
pub const CREATE_WALLET_ENTRIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS wallet_entries (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    amount INTEGER NOT NULL,
    entry_type TEXT NOT NULL,
    affected_field TEXT NOT NULL,
    status TEXT NOT NULL,
    reference_id TEXT,
    reference_type TEXT,
    created_at TEXT NOT NULL,
    completed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_wallet_entries_user ON wallet_entries(user_id);
"#;

/// SQL for creating the scheduled tasks table.
///
/// `task_key` is the deterministic dedup key; re-scheduling an existing
/// key is a no-op at the INSERT level.
pub const CREATE_SCHEDULED_TASKS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS scheduled_tasks (
    task_key TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL,
    run_at TEXT NOT NULL,
    status TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_scheduled_tasks_due ON scheduled_tasks(status, run_at);
"#;
