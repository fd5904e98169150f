use thiserror::Error;

use crate::{Money, OperationId, TransactionId, UserId, WalletId, WithdrawId, WithdrawStatus};

/// Errors that can occur when interacting with the ledger stores.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// No wallet exists with the given ID.
    #[error("Wallet not found: {0}")]
    WalletNotFound(WalletId),

    /// The user already owns a wallet.
    #[error("Wallet already exists for user {0}")]
    WalletAlreadyExists(UserId),

    /// The wallet is frozen and the change was not explicitly allowed.
    #[error("Wallet {0} is frozen")]
    WalletFrozen(WalletId),

    /// Applying the change would take the balance below zero.
    #[error("Insufficient balance in wallet {wallet_id}: balance {balance}, requested {requested}")]
    InsufficientBalance {
        wallet_id: WalletId,
        balance: Money,
        requested: Money,
    },

    /// Applying the change would overflow the balance.
    #[error("Balance overflow in wallet {0}")]
    BalanceOverflow(WalletId),

    /// No transaction exists with the given ID.
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    /// A transaction with the same operation ID was already recorded.
    #[error("Operation {operation_id} already recorded for wallet {wallet_id}")]
    DuplicateOperation {
        wallet_id: WalletId,
        operation_id: OperationId,
    },

    /// No withdrawal request exists with the given ID.
    #[error("Withdraw request not found: {0}")]
    WithdrawNotFound(WithdrawId),

    /// The withdrawal request was not in the expected status.
    #[error("Withdraw request {id} status conflict: expected {expected}, found {actual}")]
    StatusConflict {
        id: WithdrawId,
        expected: WithdrawStatus,
        actual: WithdrawStatus,
    },

    /// The backing store could not be reached.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// A stored value could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
