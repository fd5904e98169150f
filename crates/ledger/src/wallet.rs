//! Wallet record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{LedgerError, Money, UserId, WalletId};

/// Status of a wallet.
///
/// A frozen wallet rejects every balance change except the ones explicitly
/// allowed through [`AdjustOptions::allow_frozen`](crate::AdjustOptions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WalletStatus {
    #[default]
    Active,
    Frozen,
}

impl WalletStatus {
    /// Returns true if the wallet accepts ordinary balance changes.
    pub fn is_active(&self) -> bool {
        matches!(self, WalletStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WalletStatus::Active => "active",
            WalletStatus::Frozen => "frozen",
        }
    }
}

impl std::fmt::Display for WalletStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for WalletStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(WalletStatus::Active),
            "frozen" => Ok(WalletStatus::Frozen),
            other => Err(LedgerError::Decode(format!("unknown wallet status '{other}'"))),
        }
    }
}

/// A user's wallet.
///
/// Wallets are created once per user and never deleted. The balance is only
/// changed through [`WalletStore::adjust_balance`](crate::WalletStore::adjust_balance).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub user_id: UserId,
    pub balance: Money,
    pub status: WalletStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Creates a new, active, empty wallet for a user.
    pub fn new(user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            id: WalletId::new(),
            user_id,
            balance: Money::zero(),
            status: WalletStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.status == WalletStatus::Frozen
    }
}
