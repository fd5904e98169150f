//! Saga steps used by the wallet service.
//!
//! Steps carry only their parameters and cloned store handles. What a step
//! commits is recorded in the [`SagaContext`] under the step name, and its
//! compensation works from that record and the ledger's own state.

use async_trait::async_trait;
use common::{Money, OperationId, SagaId, TransactionId, UserId, WalletId, WithdrawId};
use ledger::{
    AdjustOptions, LedgerError, StatusTransition, Transaction, TransactionLog, TransactionType,
    WithdrawRequest, WithdrawStatus, WithdrawStore,
};
use saga::{SagaContext, SagaStep};

use crate::error::{Result, WalletError};

pub(crate) const CREDIT_WALLET: &str = "credit_wallet";
pub(crate) const DEBIT_WALLET: &str = "debit_wallet";
pub(crate) const DEBIT_SOURCE: &str = "debit_source";
pub(crate) const CREDIT_DESTINATION: &str = "credit_destination";
pub(crate) const RESERVE_FUNDS: &str = "reserve_funds";
pub(crate) const CREATE_REQUEST: &str = "create_request";
pub(crate) const MARK_REJECTED: &str = "mark_rejected";
pub(crate) const REFUND_RESERVATION: &str = "refund_reservation";

/// Reason recorded on a request that was rolled back before anyone saw it.
const ROLLBACK_REASON: &str = "request rolled back";

/// What a step recorded in the saga context.
#[derive(Debug, Clone)]
pub(crate) enum StepOutput {
    /// A posting was sent but its outcome is unknown.
    Attempted { transaction_id: TransactionId },

    /// The balance changed and the transaction was written.
    Posted(Transaction),

    /// A withdrawal request was written or changed.
    Request(WithdrawRequest),
}

/// Takes the transaction a posting step recorded.
pub(crate) fn take_transaction(
    ctx: &mut SagaContext<StepOutput>,
    step: &'static str,
) -> Result<Transaction> {
    match ctx.take_output(step) {
        Some(StepOutput::Posted(tx)) => Ok(tx),
        _ => Err(missing_output(ctx.saga_id(), ctx.name(), step)),
    }
}

/// Takes the withdrawal request a step recorded.
pub(crate) fn take_request(
    ctx: &mut SagaContext<StepOutput>,
    step: &'static str,
) -> Result<WithdrawRequest> {
    match ctx.take_output(step) {
        Some(StepOutput::Request(request)) => Ok(request),
        _ => Err(missing_output(ctx.saga_id(), ctx.name(), step)),
    }
}

fn missing_output(saga_id: SagaId, saga: &'static str, step: &'static str) -> WalletError {
    WalletError::SagaExecutionFailed {
        saga_id,
        saga,
        step,
        reason: "step completed without recording its output".to_string(),
        compensation_errors: Vec::new(),
    }
}

/// One balance change and the transaction that records it.
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub wallet_id: WalletId,
    pub tx_type: TransactionType,
    /// Signed change: negative for debits.
    pub amount: Money,
    pub related_wallet_id: Option<WalletId>,
    pub reason: String,
    pub method: Option<String>,
    pub operation_id: Option<OperationId>,
    pub options: AdjustOptions,
}

impl Entry {
    pub fn credit(wallet_id: WalletId, tx_type: TransactionType, amount: Money) -> Self {
        Self::new(wallet_id, tx_type, amount)
    }

    pub fn debit(wallet_id: WalletId, tx_type: TransactionType, amount: Money) -> Self {
        Self::new(wallet_id, tx_type, amount.negated())
    }

    fn new(wallet_id: WalletId, tx_type: TransactionType, amount: Money) -> Self {
        Self {
            wallet_id,
            tx_type,
            amount,
            related_wallet_id: None,
            reason: String::new(),
            method: None,
            operation_id: None,
            options: AdjustOptions::new(),
        }
    }

    pub fn related_wallet(mut self, wallet_id: WalletId) -> Self {
        self.related_wallet_id = Some(wallet_id);
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn operation_id(mut self, operation_id: Option<OperationId>) -> Self {
        self.operation_id = operation_id;
        self
    }

    /// Applies the entry even to a frozen wallet.
    pub fn allow_frozen(mut self) -> Self {
        self.options = AdjustOptions::allow_frozen();
        self
    }

    fn to_transaction(&self) -> Transaction {
        let mut builder = Transaction::builder(self.wallet_id, self.tx_type, self.amount)
            .reason(self.reason.clone())
            .operation_id(self.operation_id);
        if let Some(related) = self.related_wallet_id {
            builder = builder.related_wallet(related);
        }
        if let Some(method) = &self.method {
            builder = builder.method(method.clone());
        }
        builder.build()
    }
}

/// Posts an [`Entry`] to the ledger as one atomic balance change.
///
/// Compensation voids the transaction, which reverses its amount in the same
/// store operation. A posting whose outcome was never observed is voided by
/// ID, and a missing transaction means it never landed.
pub(crate) struct PostEntry<T> {
    name: &'static str,
    transactions: T,
    entry: Entry,
}

impl<T> PostEntry<T> {
    pub fn new(name: &'static str, transactions: T, entry: Entry) -> Self {
        Self {
            name,
            transactions,
            entry,
        }
    }
}

#[async_trait]
impl<T> SagaStep<StepOutput, WalletError> for PostEntry<T>
where
    T: TransactionLog + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    async fn execute(&self, ctx: &mut SagaContext<StepOutput>) -> Result<()> {
        let tx = self.entry.to_transaction();
        ctx.record(
            self.name,
            StepOutput::Attempted {
                transaction_id: tx.id,
            },
        );

        match self.transactions.post(tx, self.entry.options).await {
            Ok(tx) => {
                tracing::debug!(
                    step = self.name,
                    transaction_id = %tx.id,
                    wallet_id = %tx.wallet_id,
                    amount = %tx.amount,
                    balance_after = %tx.balance_after,
                    "ledger entry posted"
                );
                ctx.record(self.name, StepOutput::Posted(tx));
                Ok(())
            }
            Err(err) => {
                // A rejected post wrote nothing.
                ctx.take_output(self.name);
                Err(err.into())
            }
        }
    }

    async fn compensate(&self, ctx: &mut SagaContext<StepOutput>) -> Result<()> {
        let (transaction_id, observed) = match ctx.output(self.name) {
            Some(StepOutput::Posted(tx)) => (tx.id, true),
            Some(StepOutput::Attempted { transaction_id }) => (*transaction_id, false),
            _ => return Ok(()),
        };

        let reversed = match self.transactions.void(transaction_id).await {
            Ok(changed) => changed,
            Err(LedgerError::TransactionNotFound(_)) if !observed => false,
            Err(err) => return Err(err.into()),
        };
        ctx.take_output(self.name);

        tracing::info!(
            step = self.name,
            %transaction_id,
            wallet_id = %self.entry.wallet_id,
            reversed,
            "ledger entry compensated"
        );
        Ok(())
    }
}

/// Writes a pending withdrawal request linked to the reservation.
///
/// Compensation rejects the request so it can never be refunded a second
/// time once the reservation itself is rolled back.
pub(crate) struct CreateRequest<R> {
    withdraws: R,
    request: WithdrawRequest,
}

impl<R> CreateRequest<R> {
    pub fn new(withdraws: R, request: WithdrawRequest) -> Self {
        Self { withdraws, request }
    }
}

#[async_trait]
impl<R> SagaStep<StepOutput, WalletError> for CreateRequest<R>
where
    R: WithdrawStore + 'static,
{
    fn name(&self) -> &'static str {
        CREATE_REQUEST
    }

    async fn execute(&self, ctx: &mut SagaContext<StepOutput>) -> Result<()> {
        let reservation = match ctx.output(RESERVE_FUNDS) {
            Some(StepOutput::Posted(tx)) => tx.id,
            _ => return Err(missing_output(ctx.saga_id(), ctx.name(), RESERVE_FUNDS)),
        };

        let request = self
            .withdraws
            .insert_withdraw(self.request.clone().with_reservation(reservation))
            .await?;
        ctx.record(CREATE_REQUEST, StepOutput::Request(request));
        Ok(())
    }

    async fn compensate(&self, ctx: &mut SagaContext<StepOutput>) -> Result<()> {
        let transition = StatusTransition::new(WithdrawStatus::Pending, WithdrawStatus::Rejected)
            .reason(ROLLBACK_REASON);

        match self.withdraws.transition(self.request.id, transition).await {
            Ok(_) | Err(LedgerError::WithdrawNotFound(_)) => {}
            Err(LedgerError::StatusConflict {
                actual: WithdrawStatus::Rejected,
                ..
            }) => {}
            Err(err) => return Err(err.into()),
        }
        ctx.take_output(CREATE_REQUEST);
        Ok(())
    }
}

/// Moves a pending request to rejected.
///
/// Compensation moves it back to pending and clears the review.
pub(crate) struct MarkRejected<R> {
    withdraws: R,
    withdraw_id: WithdrawId,
    reviewer_id: UserId,
    reason: String,
}

impl<R> MarkRejected<R> {
    pub fn new(withdraws: R, withdraw_id: WithdrawId, reviewer_id: UserId, reason: String) -> Self {
        Self {
            withdraws,
            withdraw_id,
            reviewer_id,
            reason,
        }
    }
}

#[async_trait]
impl<R> SagaStep<StepOutput, WalletError> for MarkRejected<R>
where
    R: WithdrawStore + 'static,
{
    fn name(&self) -> &'static str {
        MARK_REJECTED
    }

    async fn execute(&self, ctx: &mut SagaContext<StepOutput>) -> Result<()> {
        let transition = StatusTransition::new(WithdrawStatus::Pending, WithdrawStatus::Rejected)
            .reviewer(self.reviewer_id)
            .reason(self.reason.clone());

        let request = self
            .withdraws
            .transition(self.withdraw_id, transition)
            .await
            .map_err(|e| WalletError::from_transition(e, WithdrawStatus::Rejected))?;
        ctx.record(MARK_REJECTED, StepOutput::Request(request));
        Ok(())
    }

    async fn compensate(&self, ctx: &mut SagaContext<StepOutput>) -> Result<()> {
        let transition = StatusTransition::new(WithdrawStatus::Rejected, WithdrawStatus::Pending);

        match self.withdraws.transition(self.withdraw_id, transition).await {
            Ok(_) => {}
            // Never got as far as rejecting.
            Err(LedgerError::StatusConflict {
                actual: WithdrawStatus::Pending,
                ..
            }) => {}
            Err(err) => return Err(err.into()),
        }
        ctx.take_output(MARK_REJECTED);
        Ok(())
    }
}
