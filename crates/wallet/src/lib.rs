//! Wallet service for the ledger.
//!
//! This crate provides:
//! - Wallet administration: create, query, freeze and unfreeze
//! - Recharge, consume and transfer, each executed as a saga
//! - The withdrawal state machine with up-front reservation and refund on rejection
//! - Event publication after commit and per-wallet reconciliation

pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod reconcile;
pub mod service;
mod steps;
mod withdrawal;

pub use commands::{
    ApproveWithdraw, Consume, CreateWallet, DEFAULT_WITHDRAW_METHOD, ProcessWithdraw, Recharge,
    RejectWithdraw, RequestWithdraw, Transfer,
};
pub use config::{MAX_PAGE_SIZE, WalletConfig};
pub use error::{Result, WalletError};
pub use events::{
    EventPublisher, InMemoryEventPublisher, NoopEventPublisher, PublishError, PublishedEvent,
    WalletEvent,
};
pub use ledger::{
    Money, OperationId, Transaction, TransactionId, TransactionQuery, TransactionStatus,
    TransactionType, UserId, Wallet, WalletId, WalletStatus, WithdrawId, WithdrawQuery,
    WithdrawRequest, WithdrawStatus,
};
pub use reconcile::ReconciliationReport;
pub use service::{InMemoryWalletService, PostgresWalletService, WalletService};
