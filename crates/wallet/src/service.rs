//! Wallet service providing the ledger operations as sagas.

use std::sync::Arc;

use common::{Money, OperationId, TransactionId, UserId, WalletId};
use ledger::{
    InMemoryTransactionLog, InMemoryWalletStore, InMemoryWithdrawStore, LedgerError,
    PostgresTransactionLog, PostgresWalletStore, PostgresWithdrawStore, Transaction,
    TransactionLog, TransactionQuery, TransactionType, Wallet, WalletStatus, WalletStore,
    WithdrawStore,
};
use saga::{Saga, SagaEngine};
use sqlx::PgPool;

use crate::commands::{Consume, CreateWallet, Recharge, Transfer};
use crate::config::WalletConfig;
use crate::error::{Result, WalletError};
use crate::events::{EventPublisher, NoopEventPublisher, WalletEvent};
use crate::steps::{
    CREDIT_DESTINATION, CREDIT_WALLET, DEBIT_SOURCE, DEBIT_WALLET, Entry, PostEntry,
    take_transaction,
};

/// Wallet service over in-memory stores.
pub type InMemoryWalletService =
    WalletService<InMemoryWalletStore, InMemoryTransactionLog, InMemoryWithdrawStore>;

/// Wallet service over PostgreSQL stores.
pub type PostgresWalletService =
    WalletService<PostgresWalletStore, PostgresTransactionLog, PostgresWithdrawStore>;

/// Service for managing wallets.
///
/// Every balance change runs as a saga on the [`SagaEngine`]: either all of
/// its steps commit, or the completed ones are compensated in reverse order
/// before the error is returned. Domain rejections come back as their own
/// [`WalletError`] variant; anything else is wrapped in
/// `SagaExecutionFailed`, or `SagaCompensationFailed` if no part of the
/// rollback succeeded. [`WalletError::requires_reconciliation`] tells the
/// caller whether any compensation failed.
pub struct WalletService<W, T, R> {
    pub(crate) wallets: W,
    pub(crate) transactions: T,
    pub(crate) withdraws: R,
    pub(crate) engine: SagaEngine,
    pub(crate) config: WalletConfig,
    publisher: Arc<dyn EventPublisher>,
}

impl InMemoryWalletService {
    /// Creates a service over fresh in-memory stores.
    pub fn in_memory(config: WalletConfig) -> Self {
        let wallets = InMemoryWalletStore::new();
        Self::with_config(
            wallets.clone(),
            InMemoryTransactionLog::new(wallets),
            InMemoryWithdrawStore::new(),
            config,
        )
    }
}

impl PostgresWalletService {
    /// Creates a service whose stores share one connection pool.
    pub fn from_pool(pool: PgPool, config: WalletConfig) -> Self {
        Self::with_config(
            PostgresWalletStore::new(pool.clone()),
            PostgresTransactionLog::new(pool.clone()),
            PostgresWithdrawStore::new(pool),
            config,
        )
    }

    /// Connects to `config.database_url` and applies pending migrations.
    pub async fn connect(config: WalletConfig) -> Result<Self> {
        let url = config
            .database_url
            .clone()
            .ok_or_else(|| LedgerError::Unavailable("DATABASE_URL is not set".to_string()))?;

        let pool = PgPool::connect(&url).await.map_err(LedgerError::from)?;
        ledger::run_migrations(&pool).await?;
        tracing::info!("connected to wallet database");

        Ok(Self::from_pool(pool, config))
    }
}

impl<W, T, R> WalletService<W, T, R>
where
    W: WalletStore + Clone + 'static,
    T: TransactionLog + Clone + 'static,
    R: WithdrawStore + Clone + 'static,
{
    /// Creates a service with the default configuration.
    pub fn new(wallets: W, transactions: T, withdraws: R) -> Self {
        Self::with_config(wallets, transactions, withdraws, WalletConfig::default())
    }

    pub fn with_config(wallets: W, transactions: T, withdraws: R, config: WalletConfig) -> Self {
        Self {
            wallets,
            transactions,
            withdraws,
            engine: SagaEngine::with_step_timeout(config.step_timeout),
            config,
            publisher: Arc::new(NoopEventPublisher),
        }
    }

    /// Replaces the event publisher.
    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn wallet_store(&self) -> &W {
        &self.wallets
    }

    pub fn transaction_log(&self) -> &T {
        &self.transactions
    }

    pub fn withdraw_store(&self) -> &R {
        &self.withdraws
    }

    /// Opens a wallet for a user.
    #[tracing::instrument(skip(self))]
    pub async fn create_wallet(&self, cmd: CreateWallet) -> Result<Wallet> {
        let result = self
            .wallets
            .create_wallet(Wallet::new(cmd.user_id))
            .await
            .map_err(WalletError::from);
        let wallet = observe("create_wallet", result)?;

        tracing::info!(wallet_id = %wallet.id, "wallet created");
        self.publish(WalletEvent::WalletCreated {
            wallet_id: wallet.id,
            user_id: wallet.user_id,
        })
        .await;
        Ok(wallet)
    }

    pub async fn get_wallet(&self, wallet_id: WalletId) -> Result<Wallet> {
        self.wallets
            .get_wallet(wallet_id)
            .await?
            .ok_or(WalletError::WalletNotFound(wallet_id))
    }

    pub async fn get_wallet_by_user(&self, user_id: UserId) -> Result<Wallet> {
        self.wallets
            .get_wallet_by_user(user_id)
            .await?
            .ok_or(WalletError::UserWalletNotFound(user_id))
    }

    pub async fn get_balance(&self, wallet_id: WalletId) -> Result<Money> {
        Ok(self.get_wallet(wallet_id).await?.balance)
    }

    /// Freezes a wallet. Freezing a frozen wallet returns it unchanged.
    #[tracing::instrument(skip(self))]
    pub async fn freeze_wallet(&self, wallet_id: WalletId) -> Result<Wallet> {
        observe(
            "freeze_wallet",
            self.set_status(wallet_id, WalletStatus::Frozen).await,
        )
    }

    /// Unfreezes a wallet. Unfreezing an active wallet returns it unchanged.
    #[tracing::instrument(skip(self))]
    pub async fn unfreeze_wallet(&self, wallet_id: WalletId) -> Result<Wallet> {
        observe(
            "unfreeze_wallet",
            self.set_status(wallet_id, WalletStatus::Active).await,
        )
    }

    async fn set_status(&self, wallet_id: WalletId, status: WalletStatus) -> Result<Wallet> {
        let wallet = self.get_wallet(wallet_id).await?;
        if wallet.status == status {
            return Ok(wallet);
        }

        let wallet = self.wallets.set_status(wallet_id, status).await?;
        tracing::info!(%wallet_id, %status, "wallet status changed");

        let event = match status {
            WalletStatus::Frozen => WalletEvent::Frozen { wallet_id },
            WalletStatus::Active => WalletEvent::Unfrozen { wallet_id },
        };
        self.publish(event).await;
        Ok(wallet)
    }

    /// Adds funds from an external payment.
    #[tracing::instrument(skip(self))]
    pub async fn recharge(&self, cmd: Recharge) -> Result<Transaction> {
        observe("recharge", self.run_recharge(cmd).await)
    }

    async fn run_recharge(&self, cmd: Recharge) -> Result<Transaction> {
        ensure_positive(cmd.amount)?;
        if let Some(tx) = self
            .replayed(cmd.wallet_id, TransactionType::Recharge, cmd.operation_id)
            .await?
        {
            return Ok(tx);
        }

        let entry = Entry::credit(cmd.wallet_id, TransactionType::Recharge, cmd.amount)
            .method(cmd.method.clone())
            .reason(cmd.order_ref.unwrap_or_default())
            .operation_id(cmd.operation_id);
        let saga = Saga::new("recharge").step(self.post(CREDIT_WALLET, entry));

        let mut ctx = self.engine.execute(saga).await?;
        let tx = take_transaction(&mut ctx, CREDIT_WALLET)?;

        self.publish(WalletEvent::Recharged {
            wallet_id: tx.wallet_id,
            transaction_id: tx.id,
            amount: tx.amount,
            balance_after: tx.balance_after,
            method: cmd.method,
        })
        .await;
        Ok(tx)
    }

    /// Spends funds from a wallet.
    #[tracing::instrument(skip(self))]
    pub async fn consume(&self, cmd: Consume) -> Result<Transaction> {
        observe("consume", self.run_consume(cmd).await)
    }

    async fn run_consume(&self, cmd: Consume) -> Result<Transaction> {
        ensure_positive(cmd.amount)?;
        if let Some(tx) = self
            .replayed(cmd.wallet_id, TransactionType::Consume, cmd.operation_id)
            .await?
        {
            return Ok(tx);
        }

        let entry = Entry::debit(cmd.wallet_id, TransactionType::Consume, cmd.amount)
            .reason(cmd.reason)
            .operation_id(cmd.operation_id);
        let saga = Saga::new("consume").step(self.post(DEBIT_WALLET, entry));

        let mut ctx = self.engine.execute(saga).await?;
        let tx = take_transaction(&mut ctx, DEBIT_WALLET)?;

        self.publish(WalletEvent::Consumed {
            wallet_id: tx.wallet_id,
            transaction_id: tx.id,
            amount: cmd.amount,
            balance_after: tx.balance_after,
        })
        .await;
        Ok(tx)
    }

    /// Moves funds between two wallets.
    ///
    /// Runs `debit_source` then `credit_destination`. If the credit fails the
    /// debit is compensated: its `transfer_out` record is marked failed and
    /// the amount is returned to the source. Returns the `transfer_out`
    /// transaction.
    #[tracing::instrument(skip(self))]
    pub async fn transfer(&self, cmd: Transfer) -> Result<Transaction> {
        observe("transfer", self.run_transfer(cmd).await)
    }

    async fn run_transfer(&self, cmd: Transfer) -> Result<Transaction> {
        ensure_positive(cmd.amount)?;
        let (from, to) = (cmd.from_wallet_id, cmd.to_wallet_id);
        if from == to {
            return Err(WalletError::SameWallet(from));
        }
        if let Some(tx) = self
            .replayed(from, TransactionType::TransferOut, cmd.operation_id)
            .await?
        {
            return Ok(tx);
        }
        if self.wallets.get_wallet(to).await?.is_none() {
            return Err(WalletError::DestinationNotFound(to));
        }

        let debit = Entry::debit(from, TransactionType::TransferOut, cmd.amount)
            .related_wallet(to)
            .reason(cmd.reason.clone())
            .operation_id(cmd.operation_id);
        let credit = Entry::credit(to, TransactionType::TransferIn, cmd.amount)
            .related_wallet(from)
            .reason(cmd.reason)
            .operation_id(cmd.operation_id);
        let saga = Saga::new("transfer")
            .step(self.post(DEBIT_SOURCE, debit))
            .step(self.post(CREDIT_DESTINATION, credit));

        let mut ctx = self.engine.execute(saga).await?;
        let tx = take_transaction(&mut ctx, DEBIT_SOURCE)?;

        self.publish(WalletEvent::Transferred {
            from_wallet_id: from,
            to_wallet_id: to,
            transaction_id: tx.id,
            amount: cmd.amount,
        })
        .await;
        Ok(tx)
    }

    pub async fn get_transaction(&self, transaction_id: TransactionId) -> Result<Transaction> {
        self.transactions
            .get_transaction(transaction_id)
            .await?
            .ok_or(WalletError::TransactionNotFound(transaction_id))
    }

    /// Lists a wallet's transactions in commit order, one page at a time.
    ///
    /// A missing limit uses the configured page size; larger limits are capped.
    #[tracing::instrument(skip(self))]
    pub async fn list_transactions(
        &self,
        wallet_id: WalletId,
        query: TransactionQuery,
    ) -> Result<Vec<Transaction>> {
        self.get_wallet(wallet_id).await?;
        let limit = self.config.page_limit(query.limit);
        let query = query.limit(limit);
        Ok(self.transactions.list_for_wallet(wallet_id, &query).await?)
    }

    /// Returns the transaction already recorded for a retried operation.
    async fn replayed(
        &self,
        wallet_id: WalletId,
        tx_type: TransactionType,
        operation_id: Option<OperationId>,
    ) -> Result<Option<Transaction>> {
        let Some(operation_id) = operation_id else {
            return Ok(None);
        };

        let existing = self
            .transactions
            .find_by_operation(wallet_id, tx_type, operation_id)
            .await?;
        if let Some(tx) = &existing {
            tracing::info!(
                %wallet_id,
                %operation_id,
                transaction_id = %tx.id,
                "operation already applied, returning recorded transaction"
            );
        }
        Ok(existing)
    }

    pub(crate) fn post(&self, name: &'static str, entry: Entry) -> PostEntry<T> {
        PostEntry::new(name, self.transactions.clone(), entry)
    }

    pub(crate) async fn publish(&self, event: WalletEvent) {
        let event_type = event.event_type();
        if let Err(e) = self.publisher.publish(event).await {
            tracing::warn!(event_type, error = %e, "failed to publish wallet event");
        }
    }
}

pub(crate) fn ensure_positive(amount: Money) -> Result<()> {
    if amount.is_positive() {
        Ok(())
    } else {
        Err(WalletError::InvalidAmount(amount))
    }
}

/// Counts an operation and its failure, logging by severity.
pub(crate) fn observe<V>(operation: &'static str, result: Result<V>) -> Result<V> {
    metrics::counter!("wallet_operations_total", "operation" => operation).increment(1);

    if let Err(err) = &result {
        metrics::counter!("wallet_operation_failures_total", "operation" => operation)
            .increment(1);
        match err {
            WalletError::SagaCompensationFailed {
                saga_id,
                saga,
                step,
                compensation_errors,
                ..
            }
            | WalletError::SagaExecutionFailed {
                saga_id,
                saga,
                step,
                compensation_errors,
                ..
            } if !compensation_errors.is_empty() => tracing::error!(
                operation,
                %saga_id,
                saga,
                step,
                ?compensation_errors,
                error = %err,
                "operation left the ledger inconsistent, manual reconciliation required"
            ),
            err if err.is_business() => {
                tracing::debug!(operation, error = %err, "operation rejected")
            }
            err => tracing::warn!(operation, error = %err, "operation failed"),
        }
    }
    result
}
