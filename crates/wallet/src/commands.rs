//! Wallet service commands.

use common::{Money, OperationId, UserId, WalletId, WithdrawId};

/// Withdrawal channel used when a request does not name one.
pub const DEFAULT_WITHDRAW_METHOD: &str = "bank";

/// Command to open a wallet for a user.
#[derive(Debug, Clone)]
pub struct CreateWallet {
    pub user_id: UserId,
}

impl CreateWallet {
    pub fn new(user_id: UserId) -> Self {
        Self { user_id }
    }
}

/// Command to add funds to a wallet from an external payment.
#[derive(Debug, Clone)]
pub struct Recharge {
    pub wallet_id: WalletId,
    pub amount: Money,

    /// Payment channel the funds came from.
    pub method: String,

    /// External order reference, recorded as the transaction reason.
    pub order_ref: Option<String>,

    /// Makes retries of the same recharge apply at most once.
    pub operation_id: Option<OperationId>,
}

impl Recharge {
    pub fn new(wallet_id: WalletId, amount: Money, method: impl Into<String>) -> Self {
        Self {
            wallet_id,
            amount,
            method: method.into(),
            order_ref: None,
            operation_id: None,
        }
    }

    pub fn order_ref(mut self, order_ref: impl Into<String>) -> Self {
        self.order_ref = Some(order_ref.into());
        self
    }

    pub fn operation_id(mut self, operation_id: OperationId) -> Self {
        self.operation_id = Some(operation_id);
        self
    }
}

/// Command to spend funds from a wallet.
#[derive(Debug, Clone)]
pub struct Consume {
    pub wallet_id: WalletId,
    pub amount: Money,
    pub reason: String,
    pub operation_id: Option<OperationId>,
}

impl Consume {
    pub fn new(wallet_id: WalletId, amount: Money, reason: impl Into<String>) -> Self {
        Self {
            wallet_id,
            amount,
            reason: reason.into(),
            operation_id: None,
        }
    }

    pub fn operation_id(mut self, operation_id: OperationId) -> Self {
        self.operation_id = Some(operation_id);
        self
    }
}

/// Command to move funds between two wallets.
#[derive(Debug, Clone)]
pub struct Transfer {
    pub from_wallet_id: WalletId,
    pub to_wallet_id: WalletId,
    pub amount: Money,
    pub reason: String,
    pub operation_id: Option<OperationId>,
}

impl Transfer {
    pub fn new(
        from_wallet_id: WalletId,
        to_wallet_id: WalletId,
        amount: Money,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            from_wallet_id,
            to_wallet_id,
            amount,
            reason: reason.into(),
            operation_id: None,
        }
    }

    pub fn operation_id(mut self, operation_id: OperationId) -> Self {
        self.operation_id = Some(operation_id);
        self
    }
}

/// Command to request a payout from a user's wallet.
#[derive(Debug, Clone)]
pub struct RequestWithdraw {
    pub user_id: UserId,
    pub amount: Money,
    pub method: String,
    pub account: String,
}

impl RequestWithdraw {
    /// Creates a request paid out through the default channel.
    pub fn new(user_id: UserId, amount: Money, account: impl Into<String>) -> Self {
        Self {
            user_id,
            amount,
            method: DEFAULT_WITHDRAW_METHOD.to_string(),
            account: account.into(),
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }
}

/// Command to approve a pending withdrawal.
#[derive(Debug, Clone)]
pub struct ApproveWithdraw {
    pub withdraw_id: WithdrawId,
    pub reviewer_id: UserId,
}

impl ApproveWithdraw {
    pub fn new(withdraw_id: WithdrawId, reviewer_id: UserId) -> Self {
        Self {
            withdraw_id,
            reviewer_id,
        }
    }
}

/// Command to reject a pending withdrawal and refund the reservation.
#[derive(Debug, Clone)]
pub struct RejectWithdraw {
    pub withdraw_id: WithdrawId,
    pub reviewer_id: UserId,
    pub reason: String,
}

impl RejectWithdraw {
    pub fn new(withdraw_id: WithdrawId, reviewer_id: UserId, reason: impl Into<String>) -> Self {
        Self {
            withdraw_id,
            reviewer_id,
            reason: reason.into(),
        }
    }
}

/// Command to mark an approved withdrawal as paid out.
#[derive(Debug, Clone)]
pub struct ProcessWithdraw {
    pub withdraw_id: WithdrawId,

    /// Operator who executed the payout.
    pub processed_by: UserId,
}

impl ProcessWithdraw {
    pub fn new(withdraw_id: WithdrawId, processed_by: UserId) -> Self {
        Self {
            withdraw_id,
            processed_by,
        }
    }
}
