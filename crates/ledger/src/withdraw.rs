//! Withdrawal request record and its status lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{LedgerError, Money, TransactionId, UserId, WalletId, WithdrawId};

/// The status of a withdrawal request.
///
/// State transitions:
/// ```text
/// Pending ──┬──► Approved ──► Processed
///           └──► Rejected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawStatus {
    /// Funds are reserved, awaiting review.
    #[default]
    Pending,

    /// Approved by a reviewer, awaiting payout.
    Approved,

    /// Rejected by a reviewer; reserved funds were returned (terminal state).
    Rejected,

    /// Paid out (terminal state).
    Processed,
}

impl WithdrawStatus {
    /// Returns true if the request can be approved in this state.
    pub fn can_approve(&self) -> bool {
        matches!(self, WithdrawStatus::Pending)
    }

    /// Returns true if the request can be rejected in this state.
    pub fn can_reject(&self) -> bool {
        matches!(self, WithdrawStatus::Pending)
    }

    /// Returns true if the request can be paid out in this state.
    pub fn can_process(&self) -> bool {
        matches!(self, WithdrawStatus::Approved)
    }

    /// Returns true if `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: WithdrawStatus) -> bool {
        match next {
            WithdrawStatus::Approved => self.can_approve(),
            WithdrawStatus::Rejected => self.can_reject(),
            WithdrawStatus::Processed => self.can_process(),
            WithdrawStatus::Pending => false,
        }
    }

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, WithdrawStatus::Rejected | WithdrawStatus::Processed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawStatus::Pending => "pending",
            WithdrawStatus::Approved => "approved",
            WithdrawStatus::Rejected => "rejected",
            WithdrawStatus::Processed => "processed",
        }
    }
}

impl std::fmt::Display for WithdrawStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for WithdrawStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(WithdrawStatus::Pending),
            "approved" => Ok(WithdrawStatus::Approved),
            "rejected" => Ok(WithdrawStatus::Rejected),
            "processed" => Ok(WithdrawStatus::Processed),
            other => Err(LedgerError::Decode(format!(
                "unknown withdraw status '{other}'"
            ))),
        }
    }
}

/// A request to withdraw funds from a wallet.
///
/// The full `amount` is debited from the wallet when the request is created;
/// `fee` and `actual_amount` describe how the payout is split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub id: WithdrawId,
    pub user_id: UserId,
    pub wallet_id: WalletId,
    pub amount: Money,
    pub fee: Money,
    pub actual_amount: Money,
    pub method: String,
    pub account: String,
    pub status: WithdrawStatus,
    pub reviewer_id: Option<UserId>,
    pub reason: Option<String>,
    /// The transaction that reserved the funds.
    pub reservation_tx_id: Option<TransactionId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl WithdrawRequest {
    /// Creates a pending request.
    pub fn pending(
        user_id: UserId,
        wallet_id: WalletId,
        amount: Money,
        fee: Money,
        method: impl Into<String>,
        account: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: WithdrawId::new(),
            user_id,
            wallet_id,
            amount,
            fee,
            actual_amount: amount - fee,
            method: method.into(),
            account: account.into(),
            status: WithdrawStatus::Pending,
            reviewer_id: None,
            reason: None,
            reservation_tx_id: None,
            created_at: now,
            updated_at: now,
            reviewed_at: None,
            processed_at: None,
        }
    }

    pub fn with_reservation(mut self, tx_id: TransactionId) -> Self {
        self.reservation_tx_id = Some(tx_id);
        self
    }
}

/// Filter for withdrawal request listings.
#[derive(Debug, Clone, Default)]
pub struct WithdrawQuery {
    pub user_id: Option<UserId>,
    pub status: Option<WithdrawStatus>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl WithdrawQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_user(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            ..Default::default()
        }
    }

    pub fn status(mut self, status: WithdrawStatus) -> Self {
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

    pub fn matches(&self, request: &WithdrawRequest) -> bool {
        self.user_id.is_none_or(|u| u == request.user_id)
            && self.status.is_none_or(|s| s == request.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [WithdrawStatus; 4] = [
        WithdrawStatus::Pending,
        WithdrawStatus::Approved,
        WithdrawStatus::Rejected,
        WithdrawStatus::Processed,
    ];

    #[test]
    fn test_default_status_is_pending() {
        assert_eq!(WithdrawStatus::default(), WithdrawStatus::Pending);
    }

    #[test]
    fn test_only_pending_can_be_reviewed() {
        assert!(WithdrawStatus::Pending.can_approve());
        assert!(WithdrawStatus::Pending.can_reject());
        for status in &ALL[1..] {
            assert!(!status.can_approve());
            assert!(!status.can_reject());
        }
    }

    #[test]
    fn test_only_approved_can_be_processed() {
        assert!(!WithdrawStatus::Pending.can_process());
        assert!(WithdrawStatus::Approved.can_process());
        assert!(!WithdrawStatus::Rejected.can_process());
        assert!(!WithdrawStatus::Processed.can_process());
    }

    #[test]
    fn test_legal_transitions() {
        let legal = [
            (WithdrawStatus::Pending, WithdrawStatus::Approved),
            (WithdrawStatus::Pending, WithdrawStatus::Rejected),
            (WithdrawStatus::Approved, WithdrawStatus::Processed),
        ];
        for from in ALL {
            for to in ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    legal.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(!WithdrawStatus::Pending.is_terminal());
        assert!(!WithdrawStatus::Approved.is_terminal());
        assert!(WithdrawStatus::Rejected.is_terminal());
        assert!(WithdrawStatus::Processed.is_terminal());
    }

    #[test]
    fn test_pending_request_splits_fee() {
        let request = WithdrawRequest::pending(
            UserId::new(),
            WalletId::new(),
            Money::from_cents(10_000),
            Money::from_cents(100),
            "bank",
            "6222-0000",
        );
        assert_eq!(request.status, WithdrawStatus::Pending);
        assert_eq!(request.actual_amount.cents(), 9_900);
        assert!(request.reviewer_id.is_none());
    }

    #[test]
    fn test_status_parse_roundtrip() {
        for status in ALL {
            assert_eq!(status.as_str().parse::<WithdrawStatus>().unwrap(), status);
        }
    }
}
