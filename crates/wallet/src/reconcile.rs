//! Ledger reconciliation.

use chrono::{DateTime, Utc};
use common::{Money, TransactionId, WalletId};
use ledger::{TransactionLog, TransactionQuery, TransactionStatus, WalletStore, WithdrawStore};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::service::WalletService;

/// Outcome of replaying a wallet's history against its stored balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub wallet_id: WalletId,
    pub consistent: bool,

    /// Sum of the amounts of all successful transactions.
    pub ledger_sum: Money,
    pub stored_balance: Money,

    /// `stored_balance - ledger_sum`.
    pub discrepancy: Money,
    pub transaction_count: usize,

    /// Successful transactions whose balance snapshot is negative.
    pub negative_snapshots: Vec<TransactionId>,
    pub checked_at: DateTime<Utc>,
}

impl<W, T, R> WalletService<W, T, R>
where
    W: WalletStore + Clone + 'static,
    T: TransactionLog + Clone + 'static,
    R: WithdrawStore + Clone + 'static,
{
    /// Replays a wallet's successful transactions and compares the result
    /// with its stored balance.
    ///
    /// An operation in flight during the check can show up as a transient
    /// discrepancy; only a repeated one points at a broken ledger.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile(&self, wallet_id: WalletId) -> Result<ReconciliationReport> {
        let wallet = self.get_wallet(wallet_id).await?;
        let history = self
            .transactions
            .list_for_wallet(
                wallet_id,
                &TransactionQuery::new().status(TransactionStatus::Success),
            )
            .await?;

        let exact_sum = history
            .iter()
            .try_fold(Money::zero(), |acc, tx| acc.checked_add(tx.amount));
        let ledger_sum = match exact_sum {
            Some(sum) => sum,
            None => history.iter().map(|tx| tx.amount).sum(),
        };
        let negative_snapshots: Vec<TransactionId> = history
            .iter()
            .filter(|tx| tx.balance_after.is_negative())
            .map(|tx| tx.id)
            .collect();
        let discrepancy = wallet.balance.saturating_sub(ledger_sum);

        let report = ReconciliationReport {
            wallet_id,
            consistent: exact_sum.is_some()
                && discrepancy.is_zero()
                && negative_snapshots.is_empty(),
            ledger_sum,
            stored_balance: wallet.balance,
            discrepancy,
            transaction_count: history.len(),
            negative_snapshots,
            checked_at: Utc::now(),
        };

        if report.consistent {
            tracing::debug!(%wallet_id, transactions = report.transaction_count, "wallet reconciled");
        } else {
            metrics::counter!("wallet_reconciliation_mismatches_total").increment(1);
            tracing::error!(
                %wallet_id,
                stored_balance = %report.stored_balance,
                ledger_sum = %report.ledger_sum,
                discrepancy = %report.discrepancy,
                negative_snapshots = report.negative_snapshots.len(),
                "wallet balance does not match its ledger"
            );
        }
        Ok(report)
    }
}
