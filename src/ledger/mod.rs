//! Append-only wallet ledger.
//!
//! Every balance movement is an immutable [`WalletEntry`] plus an update
//! of the denormalized totals on the wallet row, written in the caller's
//! transaction. Either both land or neither does, so the invariant
//! "wallet totals equal the sum of completed entries" holds after every
//! commit. [`verify_wallet`] checks it on demand.

use sqlx::SqliteConnection;
use tracing::debug;
use uuid::Uuid;

use crate::model::{AffectedField, EntryStatus, EntryType, Wallet, WalletEntry};
use crate::storage::{self, StorageError, Store};

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors from ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: i64, available: i64 },

    #[error("Top-up amount must be positive, got {0}")]
    NonPositiveAmount(i64),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Apply one signed movement to a user's wallet.
///
/// Runs inside the caller's open transaction. A debit that would take
/// the affected field below zero fails without writing anything; the
/// caller is expected to roll back. Amounts of zero are recorded as
/// entries but move nothing, which keeps flows with a zero deposit
/// uniform.
pub async fn apply(
    conn: &mut SqliteConnection,
    user_id: Uuid,
    amount: i64,
    entry_type: EntryType,
    affected_field: AffectedField,
    reference_id: Option<Uuid>,
    reference_type: Option<&str>,
) -> Result<WalletEntry> {
    let wallet = storage::wallets::get_or_create(conn, user_id).await?;

    let (balance, non_withdrawable) = match affected_field {
        AffectedField::Balance => {
            let next = wallet.balance + amount;
            if next < 0 {
                return Err(LedgerError::InsufficientFunds {
                    required: -amount,
                    available: wallet.balance,
                });
            }
            (next, wallet.non_withdrawable)
        }
        AffectedField::NonWithdrawable => {
            let next = wallet.non_withdrawable + amount;
            if next < 0 {
                return Err(LedgerError::InsufficientFunds {
                    required: -amount,
                    available: wallet.non_withdrawable,
                });
            }
            (wallet.balance, next)
        }
    };

    let now = chrono::Utc::now();
    let entry = WalletEntry {
        id: Uuid::new_v4(),
        user_id,
        amount,
        entry_type,
        affected_field,
        status: EntryStatus::Completed,
        reference_id,
        reference_type: reference_type.map(str::to_owned),
        created_at: now,
        completed_at: Some(now),
    };

    storage::wallets::insert_entry(conn, &entry).await?;
    storage::wallets::set_amounts(conn, user_id, balance, non_withdrawable, now).await?;

    debug!(
        user = %user_id,
        amount,
        entry_type = entry.entry_type.as_str(),
        field = affected_field.as_str(),
        "Ledger entry applied"
    );
    Ok(entry)
}

/// Credit external funds to a user's spendable balance.
#[tracing::instrument(name = "ledger.top_up", skip(store), fields(%user_id, amount))]
pub async fn top_up(store: &Store, user_id: Uuid, amount: i64) -> Result<WalletEntry> {
    if amount <= 0 {
        return Err(LedgerError::NonPositiveAmount(amount));
    }

    let mut conn = store.pool().acquire().await.map_err(StorageError::from)?;
    storage::begin_immediate(&mut conn).await?;

    let result = apply(
        &mut conn,
        user_id,
        amount,
        EntryType::TopUp,
        AffectedField::Balance,
        None,
        None,
    )
    .await;

    match result {
        Ok(entry) => {
            storage::commit(&mut conn).await?;
            Ok(entry)
        }
        Err(e) => {
            storage::rollback(&mut conn).await;
            Err(e)
        }
    }
}

/// Current wallet snapshot for a user.
pub async fn wallet(store: &Store, user_id: Uuid) -> Result<Wallet> {
    Ok(storage::wallets::get(store.pool(), user_id).await?)
}

/// Full entry history for a user, oldest first.
pub async fn entries(store: &Store, user_id: Uuid) -> Result<Vec<WalletEntry>> {
    Ok(storage::wallets::list_entries(store.pool(), user_id).await?)
}

/// Stored wallet totals next to the sums recomputed from entries.
#[derive(Debug, Clone)]
pub struct WalletAudit {
    pub wallet: Wallet,
    pub entry_balance: i64,
    pub entry_non_withdrawable: i64,
}

impl WalletAudit {
    pub fn is_consistent(&self) -> bool {
        self.wallet.balance == self.entry_balance
            && self.wallet.non_withdrawable == self.entry_non_withdrawable
    }
}

/// Recompute a user's balances from completed entries and compare with
/// the stored wallet row.
pub async fn verify_wallet(store: &Store, user_id: Uuid) -> Result<WalletAudit> {
    let wallet = storage::wallets::get(store.pool(), user_id).await?;
    let (entry_balance, entry_non_withdrawable) =
        storage::wallets::completed_sums(store.pool(), user_id).await?;
    Ok(WalletAudit {
        wallet,
        entry_balance,
        entry_non_withdrawable,
    })
}
