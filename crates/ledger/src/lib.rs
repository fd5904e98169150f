//! Persistence layer for the wallet ledger.
//!
//! The ledger is made of three collaborators, each behind its own trait:
//! - [`WalletStore`]: wallets and their balances, with an atomic guarded adjust
//! - [`TransactionLog`]: append-only transaction history
//! - [`WithdrawStore`]: withdrawal requests with compare-and-set status changes
//!
//! Two backends are provided: an in-memory one for tests and embedding, and a
//! PostgreSQL one built on `sqlx`.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;
pub mod transaction;
pub mod wallet;
pub mod withdraw;

pub use common::{Money, OperationId, TransactionId, UserId, WalletId, WithdrawId};
pub use error::{LedgerError, Result};
pub use memory::{InMemoryTransactionLog, InMemoryWalletStore, InMemoryWithdrawStore};
pub use postgres::{
    PostgresTransactionLog, PostgresWalletStore, PostgresWithdrawStore, run_migrations,
};
pub use store::{AdjustOptions, StatusTransition, TransactionLog, WalletStore, WithdrawStore};
pub use transaction::{
    Transaction, TransactionBuilder, TransactionQuery, TransactionStatus, TransactionType,
};
pub use wallet::{Wallet, WalletStatus};
pub use withdraw::{WithdrawQuery, WithdrawRequest, WithdrawStatus};
