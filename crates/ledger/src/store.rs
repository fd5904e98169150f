use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Money, OperationId, Result, Transaction, TransactionId, TransactionQuery, TransactionType,
    UserId, Wallet, WalletId, WalletStatus, WithdrawId, WithdrawQuery, WithdrawRequest,
    WithdrawStatus,
};

/// Options for a balance adjustment.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdjustOptions {
    /// Apply the change even if the wallet is frozen.
    ///
    /// Only compensations and refunds of reserved funds set this.
    pub allow_frozen: bool,
}

impl AdjustOptions {
    /// Creates options for an ordinary adjustment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates options that bypass the frozen-wallet guard.
    pub fn allow_frozen() -> Self {
        Self { allow_frozen: true }
    }
}

/// Persistence for wallets.
///
/// All implementations must be thread-safe (Send + Sync). Operations on
/// different wallets must not serialize against each other.
#[async_trait]
pub trait WalletStore: Send + Sync {
    /// Inserts a new wallet.
    ///
    /// Fails with `WalletAlreadyExists` if the user already owns a wallet.
    async fn create_wallet(&self, wallet: Wallet) -> Result<Wallet>;

    /// Retrieves a wallet by ID.
    async fn get_wallet(&self, wallet_id: WalletId) -> Result<Option<Wallet>>;

    /// Retrieves the wallet owned by a user.
    async fn get_wallet_by_user(&self, user_id: UserId) -> Result<Option<Wallet>>;

    /// Atomically adds `delta` to the balance and returns the updated wallet.
    ///
    /// The check and the write are one operation: the change is rejected with
    /// `InsufficientBalance` if the resulting balance would be negative, with
    /// `BalanceOverflow` if it would not fit, and with `WalletFrozen` if the
    /// wallet is frozen and `options.allow_frozen` is not set. A rejected
    /// change leaves the wallet untouched.
    ///
    /// This records no transaction. Ledger operations go through
    /// [`TransactionLog::post`]; a direct adjustment is an out-of-band
    /// correction that reconciliation will report.
    async fn adjust_balance(
        &self,
        wallet_id: WalletId,
        delta: Money,
        options: AdjustOptions,
    ) -> Result<Wallet>;

    /// Sets the wallet status and returns the updated wallet.
    async fn set_status(&self, wallet_id: WalletId, status: WalletStatus) -> Result<Wallet>;
}

/// Append-only transaction history, posted together with the balance it moves.
///
/// A posted transaction and its balance change commit as one unit, and so
/// do a void and its reversal. Entries for one wallet are committed in the
/// same order as the balance changes they record, so each entry's
/// `balance_after` equals the previous entry's plus its own amount.
#[async_trait]
pub trait TransactionLog: Send + Sync {
    /// Applies `transaction.amount` to its wallet and records the transaction.
    ///
    /// `balance_after` is set to the committed balance. The change is
    /// rejected, with nothing written, for the same reasons as
    /// [`WalletStore::adjust_balance`], and with `DuplicateOperation` if a
    /// successful transaction with the same wallet, type and operation ID
    /// already exists. Failed transactions do not hold on to their operation
    /// ID, so a rolled-back operation can be retried.
    async fn post(&self, transaction: Transaction, options: AdjustOptions) -> Result<Transaction>;

    /// Marks a successful transaction as failed and reverses its amount.
    ///
    /// The reversal bypasses the frozen-wallet guard. Returns true if this
    /// call made the change, false if the transaction was already failed.
    /// Fails with `TransactionNotFound` if it does not exist, and with
    /// `InsufficientBalance` (changing nothing) if reversing a credit would
    /// take the balance below zero.
    async fn void(&self, id: TransactionId) -> Result<bool>;

    /// Retrieves a transaction by ID.
    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>>;

    /// Finds the successful transaction recorded for an operation ID on a wallet.
    async fn find_by_operation(
        &self,
        wallet_id: WalletId,
        tx_type: TransactionType,
        operation_id: OperationId,
    ) -> Result<Option<Transaction>>;

    /// Lists a wallet's transactions in commit order.
    async fn list_for_wallet(
        &self,
        wallet_id: WalletId,
        query: &TransactionQuery,
    ) -> Result<Vec<Transaction>>;
}

/// A compare-and-set status change for a withdrawal request.
#[derive(Debug, Clone)]
pub struct StatusTransition {
    /// Status the request must currently be in.
    pub from: WithdrawStatus,
    pub to: WithdrawStatus,
    pub reviewer_id: Option<UserId>,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

impl StatusTransition {
    pub fn new(from: WithdrawStatus, to: WithdrawStatus) -> Self {
        Self {
            from,
            to,
            reviewer_id: None,
            reason: None,
            at: Utc::now(),
        }
    }

    pub fn reviewer(mut self, reviewer_id: UserId) -> Self {
        self.reviewer_id = Some(reviewer_id);
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Applies the transition's fields to a request already known to be in `from`.
    pub fn apply_to(&self, request: &mut WithdrawRequest) {
        request.status = self.to;
        request.updated_at = self.at;
        if self.reviewer_id.is_some() {
            request.reviewer_id = self.reviewer_id;
        }
        if self.reason.is_some() {
            request.reason.clone_from(&self.reason);
        }
        match self.to {
            WithdrawStatus::Approved | WithdrawStatus::Rejected => {
                request.reviewed_at = Some(self.at)
            }
            WithdrawStatus::Processed => request.processed_at = Some(self.at),
            WithdrawStatus::Pending => {
                request.reviewer_id = None;
                request.reason = None;
                request.reviewed_at = None;
            }
        }
    }
}

/// Persistence for withdrawal requests.
#[async_trait]
pub trait WithdrawStore: Send + Sync {
    /// Inserts a new withdrawal request.
    async fn insert_withdraw(&self, request: WithdrawRequest) -> Result<WithdrawRequest>;

    /// Retrieves a withdrawal request by ID.
    async fn get_withdraw(&self, id: WithdrawId) -> Result<Option<WithdrawRequest>>;

    /// Lists withdrawal requests, oldest first.
    async fn list_withdraws(&self, query: &WithdrawQuery) -> Result<Vec<WithdrawRequest>>;

    /// Changes the request status if it is currently `transition.from`.
    ///
    /// Fails with `StatusConflict` if the current status differs, so two
    /// concurrent reviewers can never both succeed.
    async fn transition(
        &self,
        id: WithdrawId,
        transition: StatusTransition,
    ) -> Result<WithdrawRequest>;
}
