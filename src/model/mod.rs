//! Domain types for auctions, bids, participants, and wallets.
//!
//! All monetary amounts are integer smallest currency units. Fractional
//! arithmetic never enters the ledger; percentage splits use integer
//! division and the remainder stays with the payer.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle states of an auction.
///
/// Transitions are forward-only: `Scheduled -> Active -> Ended`, then one of
/// `Completed` (order created and paid), `Failed` (winner never paid), or,
/// from the early states, `Canceled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuctionStatus {
    Scheduled,
    Active,
    Ended,
    Completed,
    Failed,
    Canceled,
}

impl AuctionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuctionStatus::Scheduled => "scheduled",
            AuctionStatus::Active => "active",
            AuctionStatus::Ended => "ended",
            AuctionStatus::Completed => "completed",
            AuctionStatus::Failed => "failed",
            AuctionStatus::Canceled => "canceled",
        }
    }
}

impl FromStr for AuctionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(AuctionStatus::Scheduled),
            "active" => Ok(AuctionStatus::Active),
            "ended" => Ok(AuctionStatus::Ended),
            "completed" => Ok(AuctionStatus::Completed),
            "failed" => Ok(AuctionStatus::Failed),
            "canceled" => Ok(AuctionStatus::Canceled),
            other => Err(format!("unknown auction status: {other}")),
        }
    }
}

impl std::fmt::Display for AuctionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Item details frozen into the auction at creation time.
///
/// Later edits to the catalog item never affect a listed auction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSnapshot {
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub image_url: Option<String>,
}

/// A single auction listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Auction {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub item: ItemSnapshot,
    /// Opening price; also the initial `current_price`.
    pub starting_price: i64,
    /// Minimum step a new bid must clear above `current_price`.
    pub bid_increment: i64,
    /// Instant-win threshold. A bid at or above this ends the auction.
    pub buy_now_price: Option<i64>,
    /// Deposit debited from every participant at join time.
    pub deposit_amount: i64,
    pub current_price: i64,
    pub winning_bid_id: Option<Uuid>,
    pub status: AuctionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Set when the auction actually ends, which may precede `end_time`
    /// on a buy-now.
    pub actual_end_time: Option<DateTime<Utc>>,
    /// Deadline by which the winner must complete payment.
    pub winner_payment_deadline: Option<DateTime<Utc>>,
    pub total_bids: i64,
    pub total_participants: i64,
    /// Order produced when the winner pays.
    pub order_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Auction {
    /// Final hammer price. Meaningful once the auction has ended.
    pub fn final_price(&self) -> i64 {
        self.current_price
    }
}

/// An accepted bid. Rejected bids are never recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionBid {
    pub id: Uuid,
    pub auction_id: Uuid,
    pub bidder_id: Uuid,
    /// Participation row the bidder joined under.
    pub participant_id: Uuid,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

/// A user's paid-up membership in one auction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionParticipant {
    pub id: Uuid,
    pub auction_id: Uuid,
    pub user_id: Uuid,
    /// Deposit actually debited at join time, kept here because the
    /// auction's configured deposit could in principle change between
    /// listings.
    pub deposit_amount: i64,
    /// Ledger entry that debited the deposit.
    pub deposit_entry_id: Uuid,
    pub is_refunded: bool,
    pub created_at: DateTime<Utc>,
}

/// Current balances for one user.
///
/// `balance` is freely spendable; `non_withdrawable` holds sale proceeds
/// and compensation that can be spent on the platform but not cashed out.
/// Both are derivable by summing completed [`WalletEntry`] rows and are
/// stored denormalized for cheap reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: Uuid,
    pub balance: i64,
    pub non_withdrawable: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Which wallet field a ledger entry moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AffectedField {
    Balance,
    NonWithdrawable,
}

impl AffectedField {
    pub fn as_str(&self) -> &'static str {
        match self {
            AffectedField::Balance => "balance",
            AffectedField::NonWithdrawable => "non_withdrawable",
        }
    }
}

impl FromStr for AffectedField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "balance" => Ok(AffectedField::Balance),
            "non_withdrawable" => Ok(AffectedField::NonWithdrawable),
            other => Err(format!("unknown affected field: {other}")),
        }
    }
}

/// Business meaning of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    /// External funds added to the wallet.
    TopUp,
    /// Auction participation deposit (negative amount).
    Deposit,
    /// Deposit returned to a non-winner or a paid-up winner.
    DepositRefund,
    /// Winner paying the hammer price (negative amount).
    Payment,
    /// Seller receiving the hammer price.
    PaymentReceived,
    /// Seller's share of a forfeited deposit.
    Compensation,
    /// Funds leaving the platform (negative amount).
    Withdrawal,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::TopUp => "top_up",
            EntryType::Deposit => "deposit",
            EntryType::DepositRefund => "deposit_refund",
            EntryType::Payment => "payment",
            EntryType::PaymentReceived => "payment_received",
            EntryType::Compensation => "compensation",
            EntryType::Withdrawal => "withdrawal",
        }
    }
}

impl FromStr for EntryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "top_up" => Ok(EntryType::TopUp),
            "deposit" => Ok(EntryType::Deposit),
            "deposit_refund" => Ok(EntryType::DepositRefund),
            "payment" => Ok(EntryType::Payment),
            "payment_received" => Ok(EntryType::PaymentReceived),
            "compensation" => Ok(EntryType::Compensation),
            "withdrawal" => Ok(EntryType::Withdrawal),
            other => Err(format!("unknown entry type: {other}")),
        }
    }
}

/// Settlement state of a ledger entry.
///
/// Every flow in this crate settles synchronously inside its transaction
/// and writes `Completed`. `Pending` exists for entries whose settlement
/// is confirmed by an external system, such as withdrawal payouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Completed,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::Completed => "completed",
        }
    }
}

impl FromStr for EntryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EntryStatus::Pending),
            "completed" => Ok(EntryStatus::Completed),
            other => Err(format!("unknown entry status: {other}")),
        }
    }
}

/// One append-only ledger line.
///
/// `amount` is signed: positive credits the affected field, negative
/// debits it. Wallet balances equal the sum of completed entries per
/// field at all times.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: i64,
    pub entry_type: EntryType,
    pub affected_field: AffectedField,
    pub status: EntryStatus,
    /// Domain object this entry settles against, e.g. an auction or order.
    pub reference_id: Option<Uuid>,
    pub reference_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
