//! Withdrawal operations.
//!
//! ```text
//!            ┌──────────┐  approve   ┌──────────┐  process   ┌───────────┐
//! request ──►│ Pending  │───────────►│ Approved │───────────►│ Processed │
//! (reserve)  └──────────┘            └──────────┘            └───────────┘
//!                 │ reject
//!                 ▼
//!            ┌──────────┐
//!            │ Rejected │  (reservation refunded)
//!            └──────────┘
//! ```
//!
//! Funds leave the wallet when the request is made, so a user cannot spend
//! them while the request waits for review. Processing moves no money.

use common::WithdrawId;
use ledger::{
    StatusTransition, TransactionLog, TransactionType, WalletStore, WithdrawQuery,
    WithdrawRequest, WithdrawStatus, WithdrawStore,
};
use saga::Saga;

use crate::commands::{ApproveWithdraw, ProcessWithdraw, RejectWithdraw, RequestWithdraw};
use crate::error::{Result, WalletError};
use crate::events::WalletEvent;
use crate::service::{WalletService, ensure_positive, observe};
use crate::steps::{
    CREATE_REQUEST, CreateRequest, Entry, MARK_REJECTED, MarkRejected, REFUND_RESERVATION,
    RESERVE_FUNDS, take_request,
};

impl<W, T, R> WalletService<W, T, R>
where
    W: WalletStore + Clone + 'static,
    T: TransactionLog + Clone + 'static,
    R: WithdrawStore + Clone + 'static,
{
    /// Reserves the amount and opens a pending withdrawal request.
    ///
    /// The full amount is debited now; the fee only reduces what is paid out.
    #[tracing::instrument(skip(self))]
    pub async fn request_withdraw(&self, cmd: RequestWithdraw) -> Result<WithdrawRequest> {
        observe("request_withdraw", self.run_request_withdraw(cmd).await)
    }

    async fn run_request_withdraw(&self, cmd: RequestWithdraw) -> Result<WithdrawRequest> {
        ensure_positive(cmd.amount)?;
        let wallet = self.get_wallet_by_user(cmd.user_id).await?;
        let fee = cmd.amount.fraction_bps(self.config.withdraw_fee_bps);

        let request = WithdrawRequest::pending(
            cmd.user_id,
            wallet.id,
            cmd.amount,
            fee,
            cmd.method.clone(),
            cmd.account,
        );
        let reserve = Entry::debit(wallet.id, TransactionType::Withdraw, cmd.amount)
            .method(cmd.method)
            .reason(format!("withdraw request {}", request.id));

        let saga = Saga::new("request_withdraw")
            .step(self.post(RESERVE_FUNDS, reserve))
            .step(CreateRequest::new(self.withdraws.clone(), request));

        let mut ctx = self.engine.execute(saga).await?;
        let request = take_request(&mut ctx, CREATE_REQUEST)?;

        tracing::info!(
            withdraw_id = %request.id,
            wallet_id = %request.wallet_id,
            amount = %request.amount,
            fee = %request.fee,
            "withdraw requested"
        );
        self.publish(WalletEvent::WithdrawalCreated {
            withdraw_id: request.id,
            user_id: request.user_id,
            amount: request.amount,
            fee: request.fee,
        })
        .await;
        Ok(request)
    }

    /// Approves a pending request.
    #[tracing::instrument(skip(self))]
    pub async fn approve_withdraw(&self, cmd: ApproveWithdraw) -> Result<WithdrawRequest> {
        let transition = StatusTransition::new(WithdrawStatus::Pending, WithdrawStatus::Approved)
            .reviewer(cmd.reviewer_id);
        let request = observe(
            "approve_withdraw",
            self.transition(cmd.withdraw_id, transition).await,
        )?;

        self.publish(WalletEvent::WithdrawalApproved {
            withdraw_id: request.id,
            reviewer_id: cmd.reviewer_id,
        })
        .await;
        Ok(request)
    }

    /// Rejects a pending request and refunds its reservation.
    ///
    /// Runs `mark_rejected` then `refund_reservation`. The refund is applied
    /// even if the wallet has been frozen since, because it only returns
    /// funds that were reserved.
    #[tracing::instrument(skip(self))]
    pub async fn reject_withdraw(&self, cmd: RejectWithdraw) -> Result<WithdrawRequest> {
        observe("reject_withdraw", self.run_reject_withdraw(cmd).await)
    }

    async fn run_reject_withdraw(&self, cmd: RejectWithdraw) -> Result<WithdrawRequest> {
        let current = self.get_withdraw(cmd.withdraw_id).await?;
        if !current.status.can_reject() {
            return Err(WalletError::InvalidStateTransition {
                id: current.id,
                from: current.status,
                to: WithdrawStatus::Rejected,
            });
        }

        let refund = Entry::credit(
            current.wallet_id,
            TransactionType::WithdrawRefund,
            current.amount,
        )
        .method(current.method.clone())
        .reason(format!("withdraw request {} rejected", current.id))
        .allow_frozen();

        let saga = Saga::new("reject_withdraw")
            .step(MarkRejected::new(
                self.withdraws.clone(),
                cmd.withdraw_id,
                cmd.reviewer_id,
                cmd.reason.clone(),
            ))
            .step(self.post(REFUND_RESERVATION, refund));

        let mut ctx = self.engine.execute(saga).await?;
        let request = take_request(&mut ctx, MARK_REJECTED)?;

        tracing::info!(
            withdraw_id = %request.id,
            wallet_id = %request.wallet_id,
            amount = %request.amount,
            "withdraw rejected, reservation refunded"
        );
        self.publish(WalletEvent::WithdrawalRejected {
            withdraw_id: request.id,
            reviewer_id: cmd.reviewer_id,
            reason: cmd.reason,
        })
        .await;
        Ok(request)
    }

    /// Marks an approved request as paid out.
    #[tracing::instrument(skip(self))]
    pub async fn process_withdraw(&self, cmd: ProcessWithdraw) -> Result<WithdrawRequest> {
        let transition =
            StatusTransition::new(WithdrawStatus::Approved, WithdrawStatus::Processed);
        let request = observe(
            "process_withdraw",
            self.transition(cmd.withdraw_id, transition).await,
        )?;

        tracing::info!(
            withdraw_id = %request.id,
            processed_by = %cmd.processed_by,
            actual_amount = %request.actual_amount,
            "withdraw processed"
        );
        self.publish(WalletEvent::WithdrawalCompleted {
            withdraw_id: request.id,
            actual_amount: request.actual_amount,
        })
        .await;
        Ok(request)
    }

    pub async fn get_withdraw(&self, withdraw_id: WithdrawId) -> Result<WithdrawRequest> {
        self.withdraws
            .get_withdraw(withdraw_id)
            .await?
            .ok_or(WalletError::WithdrawNotFound(withdraw_id))
    }

    /// Lists withdrawal requests, oldest first, one page at a time.
    #[tracing::instrument(skip(self))]
    pub async fn list_withdraws(&self, query: WithdrawQuery) -> Result<Vec<WithdrawRequest>> {
        let limit = self.config.page_limit(query.limit);
        let query = query.limit(limit);
        Ok(self.withdraws.list_withdraws(&query).await?)
    }

    async fn transition(
        &self,
        withdraw_id: WithdrawId,
        transition: StatusTransition,
    ) -> Result<WithdrawRequest> {
        let to = transition.to;
        let request = self
            .withdraws
            .transition(withdraw_id, transition)
            .await
            .map_err(|e| WalletError::from_transition(e, to))?;

        tracing::info!(%withdraw_id, status = %request.status, "withdraw status changed");
        Ok(request)
    }
}
