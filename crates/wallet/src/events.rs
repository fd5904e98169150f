//! Wallet events published after an operation commits.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Money, TransactionId, UserId, WalletId, WithdrawId};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Something that happened to a wallet or a withdrawal request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WalletEvent {
    #[serde(rename = "wallet.created")]
    WalletCreated { wallet_id: WalletId, user_id: UserId },

    #[serde(rename = "wallet.recharged")]
    Recharged {
        wallet_id: WalletId,
        transaction_id: TransactionId,
        amount: Money,
        balance_after: Money,
        method: String,
    },

    #[serde(rename = "wallet.consumed")]
    Consumed {
        wallet_id: WalletId,
        transaction_id: TransactionId,
        amount: Money,
        balance_after: Money,
    },

    #[serde(rename = "wallet.transferred")]
    Transferred {
        from_wallet_id: WalletId,
        to_wallet_id: WalletId,
        transaction_id: TransactionId,
        amount: Money,
    },

    #[serde(rename = "wallet.frozen")]
    Frozen { wallet_id: WalletId },

    #[serde(rename = "wallet.unfrozen")]
    Unfrozen { wallet_id: WalletId },

    #[serde(rename = "withdrawal.created")]
    WithdrawalCreated {
        withdraw_id: WithdrawId,
        user_id: UserId,
        amount: Money,
        fee: Money,
    },

    #[serde(rename = "withdrawal.approved")]
    WithdrawalApproved {
        withdraw_id: WithdrawId,
        reviewer_id: UserId,
    },

    #[serde(rename = "withdrawal.rejected")]
    WithdrawalRejected {
        withdraw_id: WithdrawId,
        reviewer_id: UserId,
        reason: String,
    },

    #[serde(rename = "withdrawal.completed")]
    WithdrawalCompleted {
        withdraw_id: WithdrawId,
        actual_amount: Money,
    },
}

impl WalletEvent {
    /// Returns the event type name used on the wire.
    pub fn event_type(&self) -> &'static str {
        match self {
            WalletEvent::WalletCreated { .. } => "wallet.created",
            WalletEvent::Recharged { .. } => "wallet.recharged",
            WalletEvent::Consumed { .. } => "wallet.consumed",
            WalletEvent::Transferred { .. } => "wallet.transferred",
            WalletEvent::Frozen { .. } => "wallet.frozen",
            WalletEvent::Unfrozen { .. } => "wallet.unfrozen",
            WalletEvent::WithdrawalCreated { .. } => "withdrawal.created",
            WalletEvent::WithdrawalApproved { .. } => "withdrawal.approved",
            WalletEvent::WithdrawalRejected { .. } => "withdrawal.rejected",
            WalletEvent::WithdrawalCompleted { .. } => "withdrawal.completed",
        }
    }
}

/// An event together with the time it was published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedEvent {
    pub event: WalletEvent,
    pub occurred_at: DateTime<Utc>,
}

/// Error reported by an event publisher.
#[derive(Debug, thiserror::Error)]
#[error("Failed to publish {event_type}: {reason}")]
pub struct PublishError {
    pub event_type: &'static str,
    pub reason: String,
}

/// Delivers wallet events to the outside world.
///
/// Publishing happens after the ledger change has committed, so a failure
/// here is logged by the caller and never undoes the change.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: WalletEvent) -> Result<(), PublishError>;
}

/// Publisher that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(&self, _event: WalletEvent) -> Result<(), PublishError> {
        Ok(())
    }
}

/// Publisher that keeps events in memory, for tests.
#[derive(Clone, Default)]
pub struct InMemoryEventPublisher {
    events: Arc<RwLock<Vec<PublishedEvent>>>,
    fail: Arc<AtomicBool>,
}

impl InMemoryEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the published events in order.
    pub async fn events(&self) -> Vec<WalletEvent> {
        self.events
            .read()
            .await
            .iter()
            .map(|p| p.event.clone())
            .collect()
    }

    /// Returns the event type names in publication order.
    pub async fn event_types(&self) -> Vec<&'static str> {
        self.events
            .read()
            .await
            .iter()
            .map(|p| p.event.event_type())
            .collect()
    }

    /// Makes every following publish fail until reset.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventPublisher {
    async fn publish(&self, event: WalletEvent) -> Result<(), PublishError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PublishError {
                event_type: event.event_type(),
                reason: "publisher unavailable".to_string(),
            });
        }
        self.events.write().await.push(PublishedEvent {
            event,
            occurred_at: Utc::now(),
        });
        Ok(())
    }
}
