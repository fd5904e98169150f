//! Shared identifiers and value objects used across the wallet workspace.

pub mod money;
pub mod types;

pub use money::Money;
pub use types::{OperationId, SagaId, TransactionId, UserId, WalletId, WithdrawId};
