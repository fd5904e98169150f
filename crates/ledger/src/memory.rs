use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::{
    LedgerError, Money, OperationId, Result, Transaction, TransactionId, TransactionQuery,
    TransactionStatus, TransactionType, UserId, Wallet, WalletId, WalletStatus, WithdrawId,
    WithdrawQuery, WithdrawRequest,
    store::{AdjustOptions, StatusTransition, TransactionLog, WalletStore, WithdrawStore},
};

/// Applies `delta` to a wallet held under its cell lock.
fn apply_delta(wallet: &mut Wallet, delta: Money, options: AdjustOptions) -> Result<()> {
    if wallet.is_frozen() && !options.allow_frozen {
        return Err(LedgerError::WalletFrozen(wallet.id));
    }

    let new_balance = wallet
        .balance
        .checked_add(delta)
        .ok_or(LedgerError::BalanceOverflow(wallet.id))?;

    if new_balance.is_negative() {
        return Err(LedgerError::InsufficientBalance {
            wallet_id: wallet.id,
            balance: wallet.balance,
            requested: delta.negated(),
        });
    }

    wallet.balance = new_balance;
    wallet.updated_at = chrono::Utc::now();
    Ok(())
}

fn paginate<T>(
    items: impl Iterator<Item = T>,
    offset: Option<usize>,
    limit: Option<usize>,
) -> Vec<T> {
    items
        .skip(offset.unwrap_or(0))
        .take(limit.unwrap_or(usize::MAX))
        .collect()
}

#[derive(Default)]
struct WalletIndex {
    cells: HashMap<WalletId, Arc<Mutex<Wallet>>>,
    by_user: HashMap<UserId, WalletId>,
}

/// In-memory wallet store.
///
/// Each wallet lives in its own mutex cell. The index lock is only held long
/// enough to look a cell up, so changes to different wallets never wait on
/// each other.
#[derive(Clone, Default)]
pub struct InMemoryWalletStore {
    index: Arc<RwLock<WalletIndex>>,
}

impl InMemoryWalletStore {
    /// Creates a new empty wallet store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of wallets stored.
    pub async fn wallet_count(&self) -> usize {
        self.index.read().await.cells.len()
    }

    async fn cell(&self, wallet_id: WalletId) -> Result<Arc<Mutex<Wallet>>> {
        self.index
            .read()
            .await
            .cells
            .get(&wallet_id)
            .cloned()
            .ok_or(LedgerError::WalletNotFound(wallet_id))
    }
}

#[async_trait]
impl WalletStore for InMemoryWalletStore {
    async fn create_wallet(&self, wallet: Wallet) -> Result<Wallet> {
        let mut index = self.index.write().await;

        if index.by_user.contains_key(&wallet.user_id) {
            return Err(LedgerError::WalletAlreadyExists(wallet.user_id));
        }

        index.by_user.insert(wallet.user_id, wallet.id);
        index
            .cells
            .insert(wallet.id, Arc::new(Mutex::new(wallet.clone())));
        Ok(wallet)
    }

    async fn get_wallet(&self, wallet_id: WalletId) -> Result<Option<Wallet>> {
        match self.cell(wallet_id).await {
            Ok(cell) => Ok(Some(cell.lock().await.clone())),
            Err(LedgerError::WalletNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_wallet_by_user(&self, user_id: UserId) -> Result<Option<Wallet>> {
        let wallet_id = self.index.read().await.by_user.get(&user_id).copied();
        match wallet_id {
            Some(id) => self.get_wallet(id).await,
            None => Ok(None),
        }
    }

    async fn adjust_balance(
        &self,
        wallet_id: WalletId,
        delta: Money,
        options: AdjustOptions,
    ) -> Result<Wallet> {
        let cell = self.cell(wallet_id).await?;
        let mut wallet = cell.lock().await;
        apply_delta(&mut wallet, delta, options)?;
        Ok(wallet.clone())
    }

    async fn set_status(&self, wallet_id: WalletId, status: WalletStatus) -> Result<Wallet> {
        let cell = self.cell(wallet_id).await?;
        let mut wallet = cell.lock().await;
        wallet.status = status;
        wallet.updated_at = chrono::Utc::now();
        Ok(wallet.clone())
    }
}

#[derive(Default)]
struct LogState {
    entries: Vec<Transaction>,
    positions: HashMap<TransactionId, usize>,
    operations: HashMap<(WalletId, TransactionType, OperationId), TransactionId>,
}

impl LogState {
    fn claim_operation(&self, transaction: &Transaction) -> Result<()> {
        let Some(operation_id) = transaction.operation_id else {
            return Ok(());
        };
        let key = (transaction.wallet_id, transaction.tx_type, operation_id);
        if self.operations.contains_key(&key) {
            return Err(LedgerError::DuplicateOperation {
                wallet_id: transaction.wallet_id,
                operation_id,
            });
        }
        Ok(())
    }

    fn push(&mut self, transaction: Transaction) {
        if let Some(operation_id) = transaction.operation_id {
            let key = (transaction.wallet_id, transaction.tx_type, operation_id);
            self.operations.insert(key, transaction.id);
        }
        self.positions.insert(transaction.id, self.entries.len());
        self.entries.push(transaction);
    }
}

/// In-memory transaction log over an [`InMemoryWalletStore`].
///
/// Posting and voiding hold the wallet's cell lock while the entry is
/// written, so the balance and the log always change together. Lock order
/// is wallet cell, then log.
#[derive(Clone)]
pub struct InMemoryTransactionLog {
    wallets: InMemoryWalletStore,
    state: Arc<RwLock<LogState>>,
    fail_on_post: Arc<AtomicBool>,
}

impl InMemoryTransactionLog {
    /// Creates an empty log posting to the given wallets.
    pub fn new(wallets: InMemoryWalletStore) -> Self {
        Self {
            wallets,
            state: Arc::new(RwLock::new(LogState::default())),
            fail_on_post: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns the total number of transactions stored.
    pub async fn transaction_count(&self) -> usize {
        self.state.read().await.entries.len()
    }

    /// Makes every following post fail until reset.
    pub fn set_fail_on_post(&self, fail: bool) {
        self.fail_on_post.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransactionLog for InMemoryTransactionLog {
    async fn post(
        &self,
        mut transaction: Transaction,
        options: AdjustOptions,
    ) -> Result<Transaction> {
        if self.fail_on_post.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("transaction log".to_string()));
        }

        let cell = self.wallets.cell(transaction.wallet_id).await?;
        let mut wallet = cell.lock().await;
        let mut updated = wallet.clone();
        apply_delta(&mut updated, transaction.amount, options)?;

        let mut state = self.state.write().await;
        state.claim_operation(&transaction)?;
        transaction.balance_after = updated.balance;
        state.push(transaction.clone());
        *wallet = updated;
        Ok(transaction)
    }

    async fn void(&self, id: TransactionId) -> Result<bool> {
        let wallet_id = self
            .get_transaction(id)
            .await?
            .ok_or(LedgerError::TransactionNotFound(id))?
            .wallet_id;

        let cell = self.wallets.cell(wallet_id).await?;
        let mut wallet = cell.lock().await;
        let mut state = self.state.write().await;
        let pos = *state
            .positions
            .get(&id)
            .ok_or(LedgerError::TransactionNotFound(id))?;

        let entry = &state.entries[pos];
        if entry.status == TransactionStatus::Failed {
            return Ok(false);
        }
        let mut updated = wallet.clone();
        apply_delta(&mut updated, entry.amount.negated(), AdjustOptions::allow_frozen())?;

        let entry = &mut state.entries[pos];
        entry.status = TransactionStatus::Failed;
        let released = entry
            .operation_id
            .map(|operation_id| (entry.wallet_id, entry.tx_type, operation_id));

        // A failed entry no longer claims its operation ID.
        if let Some(key) = released {
            if state.operations.get(&key) == Some(&id) {
                state.operations.remove(&key);
            }
        }
        *wallet = updated;
        Ok(true)
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        let state = self.state.read().await;
        Ok(state.positions.get(&id).map(|&pos| state.entries[pos].clone()))
    }

    async fn find_by_operation(
        &self,
        wallet_id: WalletId,
        tx_type: TransactionType,
        operation_id: OperationId,
    ) -> Result<Option<Transaction>> {
        let state = self.state.read().await;
        Ok(state
            .operations
            .get(&(wallet_id, tx_type, operation_id))
            .and_then(|id| state.positions.get(id))
            .map(|&pos| state.entries[pos].clone()))
    }

    async fn list_for_wallet(
        &self,
        wallet_id: WalletId,
        query: &TransactionQuery,
    ) -> Result<Vec<Transaction>> {
        let state = self.state.read().await;
        let matching = state
            .entries
            .iter()
            .filter(|tx| tx.wallet_id == wallet_id && query.matches(tx))
            .cloned();
        Ok(paginate(matching, query.offset, query.limit))
    }
}

/// In-memory withdrawal request store.
#[derive(Clone, Default)]
pub struct InMemoryWithdrawStore {
    requests: Arc<RwLock<Vec<WithdrawRequest>>>,
    fail_on_insert: Arc<AtomicBool>,
}

impl InMemoryWithdrawStore {
    /// Creates a new empty withdrawal store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of withdrawal requests stored.
    pub async fn request_count(&self) -> usize {
        self.requests.read().await.len()
    }

    /// Makes every following insert fail until reset.
    pub fn set_fail_on_insert(&self, fail: bool) {
        self.fail_on_insert.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl WithdrawStore for InMemoryWithdrawStore {
    async fn insert_withdraw(&self, request: WithdrawRequest) -> Result<WithdrawRequest> {
        if self.fail_on_insert.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("withdraw store".to_string()));
        }
        self.requests.write().await.push(request.clone());
        Ok(request)
    }

    async fn get_withdraw(&self, id: WithdrawId) -> Result<Option<WithdrawRequest>> {
        Ok(self
            .requests
            .read()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn list_withdraws(&self, query: &WithdrawQuery) -> Result<Vec<WithdrawRequest>> {
        let requests = self.requests.read().await;
        let matching = requests.iter().filter(|r| query.matches(r)).cloned();
        Ok(paginate(matching, query.offset, query.limit))
    }

    async fn transition(
        &self,
        id: WithdrawId,
        transition: StatusTransition,
    ) -> Result<WithdrawRequest> {
        let mut requests = self.requests.write().await;
        let request = requests
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(LedgerError::WithdrawNotFound(id))?;

        if request.status != transition.from {
            return Err(LedgerError::StatusConflict {
                id,
                expected: transition.from,
                actual: request.status,
            });
        }

        transition.apply_to(request);
        Ok(request.clone())
    }
}
