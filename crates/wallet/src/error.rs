//! Wallet service error types.

use common::{Money, OperationId, SagaId, TransactionId, UserId, WalletId, WithdrawId};
use ledger::{LedgerError, WithdrawStatus};
use saga::{SagaError, StepFailure};
use thiserror::Error;

/// Errors returned by wallet service operations.
#[derive(Debug, Error)]
pub enum WalletError {
    /// Amount must be strictly positive.
    #[error("Invalid amount: {0}")]
    InvalidAmount(Money),

    #[error("Wallet not found: {0}")]
    WalletNotFound(WalletId),

    #[error("No wallet for user {0}")]
    UserWalletNotFound(UserId),

    #[error("User {0} already has a wallet")]
    WalletAlreadyExists(UserId),

    #[error("Wallet {0} is frozen")]
    WalletFrozen(WalletId),

    #[error("Insufficient balance in wallet {wallet_id}: balance {balance}, requested {requested}")]
    InsufficientBalance {
        wallet_id: WalletId,
        balance: Money,
        requested: Money,
    },

    #[error("Balance of wallet {0} would overflow")]
    BalanceOverflow(WalletId),

    /// The transfer target does not exist.
    #[error("Destination wallet not found: {0}")]
    DestinationNotFound(WalletId),

    #[error("Cannot transfer from wallet {0} to itself")]
    SameWallet(WalletId),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    #[error("Withdraw request not found: {0}")]
    WithdrawNotFound(WithdrawId),

    /// The withdrawal request is not in a state that allows the change.
    #[error("Withdraw request {id} cannot move from {from} to {to}")]
    InvalidStateTransition {
        id: WithdrawId,
        from: WithdrawStatus,
        to: WithdrawStatus,
    },

    /// A concurrent retry of the same operation won the race.
    #[error("Operation {operation_id} is already being applied to wallet {wallet_id}")]
    DuplicateOperation {
        wallet_id: WalletId,
        operation_id: OperationId,
    },

    /// A saga step failed and the completed steps were rolled back.
    ///
    /// Raised for non-business failures (storage, timeout, panic), and for
    /// any failure whose rollback was only partial. In that case
    /// `compensation_errors` lists the steps that could not be undone.
    #[error("Saga '{saga}' failed at step '{step}': {reason}")]
    SagaExecutionFailed {
        saga_id: SagaId,
        saga: &'static str,
        step: &'static str,
        reason: String,
        compensation_errors: Vec<String>,
    },

    /// A saga step failed and none of its rollback succeeded.
    ///
    /// The ledger may be inconsistent and needs manual reconciliation.
    #[error(
        "Saga '{saga}' failed at step '{step}' ({reason}) and could not be rolled back: {}",
        .compensation_errors.join("; ")
    )]
    SagaCompensationFailed {
        saga_id: SagaId,
        saga: &'static str,
        step: &'static str,
        reason: String,
        compensation_errors: Vec<String>,
    },

    /// Storage failure.
    #[error("Ledger error: {0}")]
    Ledger(#[source] LedgerError),
}

impl WalletError {
    /// Returns true for domain rejections, which are surfaced to callers as is.
    pub fn is_business(&self) -> bool {
        !matches!(
            self,
            WalletError::SagaExecutionFailed { .. }
                | WalletError::SagaCompensationFailed { .. }
                | WalletError::Ledger(_)
        )
    }

    /// Returns true if the ledger may need manual reconciliation.
    pub fn requires_reconciliation(&self) -> bool {
        match self {
            WalletError::SagaCompensationFailed { .. } => true,
            WalletError::SagaExecutionFailed {
                compensation_errors,
                ..
            } => !compensation_errors.is_empty(),
            _ => false,
        }
    }

    /// Maps a failed compare-and-set on a withdrawal request.
    pub(crate) fn from_transition(err: LedgerError, to: WithdrawStatus) -> Self {
        match err {
            LedgerError::StatusConflict { id, actual, .. } => WalletError::InvalidStateTransition {
                id,
                from: actual,
                to,
            },
            other => other.into(),
        }
    }
}

impl From<LedgerError> for WalletError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::WalletNotFound(id) => WalletError::WalletNotFound(id),
            LedgerError::WalletAlreadyExists(user) => WalletError::WalletAlreadyExists(user),
            LedgerError::WalletFrozen(id) => WalletError::WalletFrozen(id),
            LedgerError::InsufficientBalance {
                wallet_id,
                balance,
                requested,
            } => WalletError::InsufficientBalance {
                wallet_id,
                balance,
                requested,
            },
            LedgerError::BalanceOverflow(id) => WalletError::BalanceOverflow(id),
            LedgerError::TransactionNotFound(id) => WalletError::TransactionNotFound(id),
            LedgerError::WithdrawNotFound(id) => WalletError::WithdrawNotFound(id),
            LedgerError::DuplicateOperation {
                wallet_id,
                operation_id,
            } => WalletError::DuplicateOperation {
                wallet_id,
                operation_id,
            },
            other => WalletError::Ledger(other),
        }
    }
}

impl From<SagaError<WalletError>> for WalletError {
    fn from(err: SagaError<WalletError>) -> Self {
        match err {
            // A clean rollback leaves nothing behind, so the rejection is the answer.
            SagaError::ExecutionFailed {
                failure: StepFailure::Error(e),
                compensation_errors,
                ..
            } if e.is_business() && compensation_errors.is_empty() => e,
            SagaError::ExecutionFailed {
                saga_id,
                saga,
                step,
                failure,
                compensation_errors,
                ..
            } => WalletError::SagaExecutionFailed {
                saga_id,
                saga,
                step,
                reason: failure.to_string(),
                compensation_errors: compensation_errors.iter().map(ToString::to_string).collect(),
            },
            SagaError::CompensationFailed {
                saga_id,
                saga,
                step,
                failure,
                compensation_errors,
                ..
            } => WalletError::SagaCompensationFailed {
                saga_id,
                saga,
                step,
                reason: failure.to_string(),
                compensation_errors: compensation_errors.iter().map(ToString::to_string).collect(),
            },
        }
    }
}

/// Convenience type alias for wallet results.
pub type Result<T> = std::result::Result<T, WalletError>;

#[cfg(test)]
mod tests {
    use saga::CompensationError;

    use super::*;

    #[test]
    fn test_ledger_business_errors_map_to_domain_errors() {
        let wallet_id = WalletId::new();
        let err: WalletError = LedgerError::WalletFrozen(wallet_id).into();
        assert!(matches!(err, WalletError::WalletFrozen(id) if id == wallet_id));
        assert!(err.is_business());

        let err: WalletError = LedgerError::Unavailable("transaction log".to_string()).into();
        assert!(matches!(err, WalletError::Ledger(_)));
        assert!(!err.is_business());
    }

    #[test]
    fn test_status_conflict_maps_to_invalid_transition() {
        let id = WithdrawId::new();
        let err = WalletError::from_transition(
            LedgerError::StatusConflict {
                id,
                expected: WithdrawStatus::Approved,
                actual: WithdrawStatus::Pending,
            },
            WithdrawStatus::Processed,
        );
        assert!(matches!(
            err,
            WalletError::InvalidStateTransition {
                from: WithdrawStatus::Pending,
                to: WithdrawStatus::Processed,
                ..
            }
        ));
    }

    #[test]
    fn test_business_step_error_is_surfaced_directly() {
        let wallet_id = WalletId::new();
        let saga_err = SagaError::ExecutionFailed {
            saga_id: SagaId::new(),
            saga: "transfer",
            step: "credit_destination",
            failure: StepFailure::Error(WalletError::WalletFrozen(wallet_id)),
            compensated: vec!["debit_source"],
            compensation_errors: vec![],
        };
        let err: WalletError = saga_err.into();
        assert!(matches!(err, WalletError::WalletFrozen(id) if id == wallet_id));
    }

    #[test]
    fn test_partial_rollback_is_not_surfaced_as_business_error() {
        let wallet_id = WalletId::new();
        let saga_err = SagaError::ExecutionFailed {
            saga_id: SagaId::new(),
            saga: "transfer",
            step: "credit_destination",
            failure: StepFailure::Error(WalletError::WalletFrozen(wallet_id)),
            compensated: vec!["credit_destination"],
            compensation_errors: vec![CompensationError {
                step: "debit_source",
                failure: StepFailure::Error(WalletError::Ledger(LedgerError::Unavailable(
                    "transaction log".to_string(),
                ))),
            }],
        };

        let err: WalletError = saga_err.into();
        assert!(!err.is_business());
        assert!(err.requires_reconciliation());
        match err {
            WalletError::SagaExecutionFailed {
                reason,
                compensation_errors,
                ..
            } => {
                assert!(reason.contains("frozen"));
                assert_eq!(compensation_errors.len(), 1);
                assert!(compensation_errors[0].starts_with("debit_source:"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_infrastructure_step_error_is_wrapped() {
        let saga_err: SagaError<WalletError> = SagaError::ExecutionFailed {
            saga_id: SagaId::new(),
            saga: "recharge",
            step: "credit_wallet",
            failure: StepFailure::TimedOut(std::time::Duration::from_millis(10)),
            compensated: vec![],
            compensation_errors: vec![],
        };
        let err: WalletError = saga_err.into();
        assert!(matches!(
            err,
            WalletError::SagaExecutionFailed {
                step: "credit_wallet",
                ..
            }
        ));
        assert!(!err.is_business());
        assert!(!err.requires_reconciliation());
    }

    #[test]
    fn test_compensation_failure_keeps_both_signals() {
        let wallet_id = WalletId::new();
        let saga_err = SagaError::CompensationFailed {
            saga_id: SagaId::new(),
            saga: "transfer",
            step: "credit_destination",
            failure: StepFailure::Error(WalletError::WalletFrozen(wallet_id)),
            compensation_errors: vec![CompensationError {
                step: "debit_source",
                failure: StepFailure::Error(WalletError::Ledger(LedgerError::Unavailable(
                    "wallet store".to_string(),
                ))),
            }],
            compensated: vec![],
        };

        let err: WalletError = saga_err.into();
        assert!(err.requires_reconciliation());
        match err {
            WalletError::SagaCompensationFailed {
                reason,
                compensation_errors,
                ..
            } => {
                assert!(reason.contains("frozen"));
                assert_eq!(compensation_errors.len(), 1);
                assert!(compensation_errors[0].starts_with("debit_source:"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
