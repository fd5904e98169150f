//! Transaction records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{LedgerError, Money, OperationId, TransactionId, WalletId};

/// Kind of balance change a transaction records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Recharge,
    Consume,
    TransferIn,
    TransferOut,
    /// Funds reserved by a withdrawal request.
    Withdraw,
    /// Reserved funds returned after a withdrawal was rejected.
    WithdrawRefund,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Recharge => "recharge",
            TransactionType::Consume => "consume",
            TransactionType::TransferIn => "transfer_in",
            TransactionType::TransferOut => "transfer_out",
            TransactionType::Withdraw => "withdraw",
            TransactionType::WithdrawRefund => "withdraw_refund",
        }
    }

    /// Returns true if this kind of transaction removes funds from the wallet.
    pub fn is_debit(&self) -> bool {
        matches!(
            self,
            TransactionType::Consume | TransactionType::TransferOut | TransactionType::Withdraw
        )
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TransactionType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recharge" => Ok(TransactionType::Recharge),
            "consume" => Ok(TransactionType::Consume),
            "transfer_in" => Ok(TransactionType::TransferIn),
            "transfer_out" => Ok(TransactionType::TransferOut),
            "withdraw" => Ok(TransactionType::Withdraw),
            "withdraw_refund" => Ok(TransactionType::WithdrawRefund),
            other => Err(LedgerError::Decode(format!(
                "unknown transaction type '{other}'"
            ))),
        }
    }
}

/// Status of a transaction.
///
/// A transaction is committed as `Success`. The only later change allowed is
/// `Success -> Failed`, made when a saga compensates the step that wrote it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    #[default]
    Success,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Success => "success",
            TransactionStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(TransactionStatus::Success),
            "failed" => Ok(TransactionStatus::Failed),
            other => Err(LedgerError::Decode(format!(
                "unknown transaction status '{other}'"
            ))),
        }
    }
}

/// A committed ledger entry.
///
/// `balance_after` is the wallet balance at the instant the entry was
/// committed, so the history can be replayed independently of the current
/// wallet state. It is assigned by [`TransactionLog::post`](crate::TransactionLog::post)
/// in the same atomic operation that changes the balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub wallet_id: WalletId,
    pub tx_type: TransactionType,
    /// Signed amount; negative for debits.
    pub amount: Money,
    pub balance_after: Money,
    pub related_wallet_id: Option<WalletId>,
    pub reason: String,
    pub method: Option<String>,
    pub operation_id: Option<OperationId>,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Starts building a transaction with its required fields.
    pub fn builder(wallet_id: WalletId, tx_type: TransactionType, amount: Money) -> TransactionBuilder {
        TransactionBuilder {
            wallet_id,
            tx_type,
            amount,
            balance_after: Money::zero(),
            related_wallet_id: None,
            reason: String::new(),
            method: None,
            operation_id: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TransactionStatus::Success
    }
}

/// Builder for [`Transaction`]. The ID and timestamp are assigned on build.
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    wallet_id: WalletId,
    tx_type: TransactionType,
    amount: Money,
    balance_after: Money,
    related_wallet_id: Option<WalletId>,
    reason: String,
    method: Option<String>,
    operation_id: Option<OperationId>,
}

impl TransactionBuilder {
    /// Sets the resulting balance. Posting overwrites it with the committed value.
    pub fn balance_after(mut self, balance_after: Money) -> Self {
        self.balance_after = balance_after;
        self
    }

    /// Sets the counterparty wallet (transfers only).
    pub fn related_wallet(mut self, wallet_id: WalletId) -> Self {
        self.related_wallet_id = Some(wallet_id);
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Sets the payment channel (e.g. "alipay", "bank").
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn operation_id(mut self, operation_id: Option<OperationId>) -> Self {
        self.operation_id = operation_id;
        self
    }

    pub fn build(self) -> Transaction {
        Transaction {
            id: TransactionId::new(),
            wallet_id: self.wallet_id,
            tx_type: self.tx_type,
            amount: self.amount,
            balance_after: self.balance_after,
            related_wallet_id: self.related_wallet_id,
            reason: self.reason,
            method: self.method,
            operation_id: self.operation_id,
            status: TransactionStatus::Success,
            created_at: Utc::now(),
        }
    }
}

/// Page and filter for transaction history queries.
#[derive(Debug, Clone, Default)]
pub struct TransactionQuery {
    /// Only return transactions of this type.
    pub tx_type: Option<TransactionType>,

    /// Only return transactions with this status.
    pub status: Option<TransactionStatus>,

    /// Maximum number of transactions to return.
    pub limit: Option<usize>,

    /// Number of transactions to skip.
    pub offset: Option<usize>,
}

impl TransactionQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tx_type(mut self, tx_type: TransactionType) -> Self {
        self.tx_type = Some(tx_type);
        self
    }

    pub fn status(mut self, status: TransactionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Returns true if the transaction passes the type and status filters.
    pub fn matches(&self, tx: &Transaction) -> bool {
        self.tx_type.is_none_or(|t| t == tx.tx_type) && self.status.is_none_or(|s| s == tx.status)
    }
}
