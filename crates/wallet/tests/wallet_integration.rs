//! Integration tests for the wallet service over the in-memory ledger.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ledger::{
    AdjustOptions, InMemoryTransactionLog, InMemoryWalletStore, InMemoryWithdrawStore, LedgerError,
    TransactionLog, WalletStore, WithdrawStore,
};
use wallet::{
    Consume, CreateWallet, InMemoryEventPublisher, InMemoryWalletService, Money, OperationId,
    Recharge, RejectWithdraw, RequestWithdraw, Transaction, TransactionId, TransactionQuery,
    TransactionStatus, TransactionType, Transfer, UserId, WalletConfig, WalletError, WalletEvent,
    WalletId, WalletService,
};

#[ctor::ctor]
unsafe fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn service() -> InMemoryWalletService {
    InMemoryWalletService::in_memory(WalletConfig::default())
}

async fn wallet_with<W, T, R>(service: &WalletService<W, T, R>, cents: i64) -> WalletId
where
    W: WalletStore + Clone + 'static,
    T: TransactionLog + Clone + 'static,
    R: WithdrawStore + Clone + 'static,
{
    let wallet = service
        .create_wallet(CreateWallet::new(UserId::new()))
        .await
        .unwrap();
    if cents > 0 {
        service
            .recharge(Recharge::new(wallet.id, Money::from_cents(cents), "card"))
            .await
            .unwrap();
    }
    wallet.id
}

async fn history<W, T, R>(service: &WalletService<W, T, R>, wallet_id: WalletId) -> Vec<Transaction>
where
    W: WalletStore + Clone + 'static,
    T: TransactionLog + Clone + 'static,
    R: WithdrawStore + Clone + 'static,
{
    service
        .list_transactions(wallet_id, TransactionQuery::new().limit(100))
        .await
        .unwrap()
}

fn cents(money: Money) -> i64 {
    money.cents()
}

#[tokio::test]
async fn test_transfer_moves_funds_and_records_both_sides() {
    let service = service();
    let a = wallet_with(&service, 500).await;
    let b = wallet_with(&service, 300).await;

    let tx = service
        .transfer(Transfer::new(a, b, Money::from_cents(100), "rent"))
        .await
        .unwrap();

    assert_eq!(tx.tx_type, TransactionType::TransferOut);
    assert_eq!(tx.wallet_id, a);
    assert_eq!(tx.amount, Money::from_cents(-100));
    assert_eq!(tx.balance_after, Money::from_cents(400));
    assert_eq!(tx.related_wallet_id, Some(b));

    assert_eq!(cents(service.get_balance(a).await.unwrap()), 400);
    assert_eq!(cents(service.get_balance(b).await.unwrap()), 400);

    let a_out: Vec<_> = history(&service, a)
        .await
        .into_iter()
        .filter(|t| t.tx_type == TransactionType::TransferOut)
        .collect();
    assert_eq!(a_out.len(), 1);

    let b_in: Vec<_> = history(&service, b)
        .await
        .into_iter()
        .filter(|t| t.tx_type == TransactionType::TransferIn)
        .collect();
    assert_eq!(b_in.len(), 1);
    assert_eq!(b_in[0].amount, Money::from_cents(100));
    assert_eq!(b_in[0].balance_after, Money::from_cents(400));
    assert_eq!(b_in[0].related_wallet_id, Some(a));
    assert_eq!(b_in[0].reason, "rent");
}

#[tokio::test]
async fn test_overdrawn_transfer_changes_nothing() {
    let service = service();
    let a = wallet_with(&service, 500).await;
    let b = wallet_with(&service, 0).await;

    let err = service
        .transfer(Transfer::new(a, b, Money::from_cents(700), "test"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        WalletError::InsufficientBalance { wallet_id, .. } if wallet_id == a
    ));
    assert_eq!(cents(service.get_balance(a).await.unwrap()), 500);
    assert_eq!(cents(service.get_balance(b).await.unwrap()), 0);

    // Only the initial recharge on A; nothing on B.
    assert_eq!(history(&service, a).await.len(), 1);
    assert!(history(&service, b).await.is_empty());
}

#[tokio::test]
async fn test_failed_credit_restores_source_and_fails_transfer_out() {
    let service = service();
    let a = wallet_with(&service, 500).await;
    let b = wallet_with(&service, 0).await;
    service.freeze_wallet(b).await.unwrap();

    let err = service
        .transfer(Transfer::new(a, b, Money::from_cents(200), "test"))
        .await
        .unwrap_err();

    assert!(matches!(err, WalletError::WalletFrozen(id) if id == b));
    assert_eq!(cents(service.get_balance(a).await.unwrap()), 500);
    assert_eq!(cents(service.get_balance(b).await.unwrap()), 0);

    let transfer_out: Vec<_> = history(&service, a)
        .await
        .into_iter()
        .filter(|t| t.tx_type == TransactionType::TransferOut)
        .collect();
    assert_eq!(transfer_out.len(), 1);
    assert_eq!(transfer_out[0].status, TransactionStatus::Failed);
    assert!(history(&service, b).await.is_empty());

    assert!(service.reconcile(a).await.unwrap().consistent);
}

#[tokio::test]
async fn test_failed_credit_post_restores_both_wallets() {
    let wallets = InMemoryWalletStore::new();
    let service = WalletService::new(
        wallets.clone(),
        FlakyLog::rejecting(wallets, TransactionType::TransferIn),
        InMemoryWithdrawStore::new(),
    );
    let a = wallet_with(&service, 500).await;
    let b = wallet_with(&service, 100).await;

    let err = service
        .transfer(Transfer::new(a, b, Money::from_cents(200), "test"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        WalletError::SagaExecutionFailed {
            step: "credit_destination",
            ..
        }
    ));
    assert_eq!(cents(service.get_balance(a).await.unwrap()), 500);
    assert_eq!(cents(service.get_balance(b).await.unwrap()), 100);
    assert!(service.reconcile(a).await.unwrap().consistent);
    assert!(service.reconcile(b).await.unwrap().consistent);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_transfers_conserve_total_balance() {
    let service = Arc::new(service());
    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(wallet_with(service.as_ref(), 1_000).await);
    }

    let mut handles = Vec::new();
    for i in 0..100 {
        let service = service.clone();
        let from = ids[i % ids.len()];
        let to = ids[(i * 3 + 1) % ids.len()];
        handles.push(tokio::spawn(async move {
            if from == to {
                return;
            }
            let amount = Money::from_cents(((i % 7) as i64 + 1) * 37);
            // Overdrafts are expected under contention; they must change nothing.
            let _ = service.transfer(Transfer::new(from, to, amount, "mix")).await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let mut total = 0;
    for id in &ids {
        let balance = cents(service.get_balance(*id).await.unwrap());
        assert!(balance >= 0);
        total += balance;
        assert!(service.reconcile(*id).await.unwrap().consistent);
    }
    assert_eq!(total, 5_000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_consumes_never_overdraw() {
    let service = Arc::new(service());
    let wallet_id = wallet_with(service.as_ref(), 1_000).await;

    let mut handles = Vec::new();
    for _ in 0..25 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service
                .consume(Consume::new(wallet_id, Money::from_cents(70), "race"))
                .await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(WalletError::InsufficientBalance { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    // 14 * 70 = 980 fits, a 15th does not.
    assert_eq!(succeeded, 14);
    assert_eq!(cents(service.get_balance(wallet_id).await.unwrap()), 20);
    assert!(service.reconcile(wallet_id).await.unwrap().consistent);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_retries_apply_once() {
    let service = Arc::new(service());
    let wallet_id = wallet_with(service.as_ref(), 0).await;
    let op = OperationId::new();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service
                .recharge(Recharge::new(wallet_id, Money::from_cents(500), "card").operation_id(op))
                .await
        }));
    }

    for handle in handles {
        match handle.await.unwrap() {
            Ok(tx) => assert_eq!(tx.amount, Money::from_cents(500)),
            Err(WalletError::DuplicateOperation { operation_id, .. }) => {
                assert_eq!(operation_id, op)
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(cents(service.get_balance(wallet_id).await.unwrap()), 500);
    assert!(service.reconcile(wallet_id).await.unwrap().consistent);
}

#[tokio::test]
async fn test_withdraw_reservation_and_refund() {
    let service = service();
    let user = UserId::new();
    let wallet = service.create_wallet(CreateWallet::new(user)).await.unwrap();
    service
        .recharge(Recharge::new(wallet.id, Money::from_cents(2_000), "card"))
        .await
        .unwrap();

    let request = service
        .request_withdraw(RequestWithdraw::new(user, Money::from_cents(1_500), "acct-1"))
        .await
        .unwrap();
    assert_eq!(cents(service.get_balance(wallet.id).await.unwrap()), 500);

    // Reserved funds cannot be spent.
    let err = service
        .consume(Consume::new(wallet.id, Money::from_cents(600), "x"))
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::InsufficientBalance { .. }));

    service
        .reject_withdraw(RejectWithdraw::new(request.id, UserId::new(), "limit"))
        .await
        .unwrap();
    assert_eq!(cents(service.get_balance(wallet.id).await.unwrap()), 2_000);
    assert!(service.reconcile(wallet.id).await.unwrap().consistent);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_rejections_refund_once() {
    let service = Arc::new(service());
    let user = UserId::new();
    let wallet = service.create_wallet(CreateWallet::new(user)).await.unwrap();
    service
        .recharge(Recharge::new(wallet.id, Money::from_cents(1_000), "card"))
        .await
        .unwrap();
    let request = service
        .request_withdraw(RequestWithdraw::new(user, Money::from_cents(800), "acct"))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = service.clone();
        let id = request.id;
        handles.push(tokio::spawn(async move {
            service
                .reject_withdraw(RejectWithdraw::new(id, UserId::new(), "dup"))
                .await
        }));
    }
    let mut rejected = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            rejected += 1;
        }
    }

    assert_eq!(rejected, 1);
    assert_eq!(cents(service.get_balance(wallet.id).await.unwrap()), 1_000);
}

#[tokio::test]
async fn test_timed_out_step_is_rolled_back() {
    let wallets = InMemoryWalletStore::new();
    let log = FlakyLog::new(wallets.clone());
    let config = WalletConfig::default().with_step_timeout(Duration::from_millis(50));
    let service = WalletService::with_config(
        wallets,
        log.clone(),
        InMemoryWithdrawStore::new(),
        config,
    );
    let a = wallet_with(&service, 500).await;

    // The post commits, then its reply stalls past the step deadline.
    log.stall(Duration::from_millis(500));
    let err = service
        .consume(Consume::new(a, Money::from_cents(100), "slow"))
        .await
        .unwrap_err();
    log.stall(Duration::ZERO);

    assert!(matches!(
        err,
        WalletError::SagaExecutionFailed {
            step: "debit_wallet",
            ..
        }
    ));
    assert!(!err.requires_reconciliation());
    assert_eq!(cents(service.get_balance(a).await.unwrap()), 500);

    let debits: Vec<_> = history(&service, a)
        .await
        .into_iter()
        .filter(|t| t.tx_type == TransactionType::Consume)
        .collect();
    assert_eq!(debits.len(), 1);
    assert_eq!(debits[0].status, TransactionStatus::Failed);
    assert!(service.reconcile(a).await.unwrap().consistent);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_rejected_posts_racing_debits_leave_ledger_consistent() {
    let wallets = InMemoryWalletStore::new();
    let log = FlakyLog::new(wallets.clone());
    let service = Arc::new(WalletService::new(
        wallets,
        log.clone(),
        InMemoryWithdrawStore::new(),
    ));
    let wallet_id = wallet_with(service.as_ref(), 300).await;
    log.reject(TransactionType::Recharge);

    let mut recharges = Vec::new();
    let mut consumes = Vec::new();
    for _ in 0..10 {
        let recharge_service = service.clone();
        recharges.push(tokio::spawn(async move {
            recharge_service
                .recharge(Recharge::new(wallet_id, Money::from_cents(100), "card"))
                .await
        }));
        let consume_service = service.clone();
        consumes.push(tokio::spawn(async move {
            consume_service
                .consume(Consume::new(wallet_id, Money::from_cents(50), "race"))
                .await
        }));
    }

    for handle in recharges {
        let err = handle.await.unwrap().unwrap_err();
        assert!(!err.requires_reconciliation(), "unexpected error: {err}");
    }
    let mut succeeded = 0;
    for handle in consumes {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(WalletError::InsufficientBalance { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    // No recharge ever landed, so only six debits fit.
    assert_eq!(succeeded, 6);
    assert_eq!(cents(service.get_balance(wallet_id).await.unwrap()), 0);

    let mut running = 0;
    for tx in history(&service, wallet_id).await {
        running += tx.amount.cents();
        assert_eq!(tx.balance_after.cents(), running);
    }
    assert!(service.reconcile(wallet_id).await.unwrap().consistent);
}

#[tokio::test]
async fn test_events_follow_committed_operations() {
    let publisher = Arc::new(InMemoryEventPublisher::new());
    let service = service().with_publisher(publisher.clone());
    let a = wallet_with(&service, 300).await;
    let b = wallet_with(&service, 0).await;

    service
        .transfer(Transfer::new(a, b, Money::from_cents(100), "gift"))
        .await
        .unwrap();
    service
        .transfer(Transfer::new(a, b, Money::from_cents(900), "too much"))
        .await
        .unwrap_err();

    let events = publisher.events().await;
    let transfers: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            WalletEvent::Transferred { amount, .. } => Some(*amount),
            _ => None,
        })
        .collect();
    assert_eq!(transfers, [Money::from_cents(100)]);
    assert_eq!(
        publisher.event_types().await,
        [
            "wallet.created",
            "wallet.recharged",
            "wallet.created",
            "wallet.transferred",
        ]
    );
}

/// Transaction log that can reject one transaction type or stall after posting.
#[derive(Clone)]
struct FlakyLog {
    inner: InMemoryTransactionLog,
    reject: Arc<Mutex<Option<TransactionType>>>,
    stall_ms: Arc<AtomicU64>,
}

impl FlakyLog {
    fn new(wallets: InMemoryWalletStore) -> Self {
        Self {
            inner: InMemoryTransactionLog::new(wallets),
            reject: Arc::default(),
            stall_ms: Arc::default(),
        }
    }

    fn rejecting(wallets: InMemoryWalletStore, tx_type: TransactionType) -> Self {
        let log = Self::new(wallets);
        log.reject(tx_type);
        log
    }

    fn reject(&self, tx_type: TransactionType) {
        *self.reject.lock().unwrap() = Some(tx_type);
    }

    fn stall(&self, delay: Duration) {
        self.stall_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransactionLog for FlakyLog {
    async fn post(
        &self,
        transaction: Transaction,
        options: AdjustOptions,
    ) -> ledger::Result<Transaction> {
        if *self.reject.lock().unwrap() == Some(transaction.tx_type) {
            return Err(LedgerError::Unavailable("transaction log".to_string()));
        }
        let posted = self.inner.post(transaction, options).await?;
        let stall = self.stall_ms.load(Ordering::SeqCst);
        if stall > 0 {
            tokio::time::sleep(Duration::from_millis(stall)).await;
        }
        Ok(posted)
    }

    async fn void(&self, id: TransactionId) -> ledger::Result<bool> {
        self.inner.void(id).await
    }

    async fn get_transaction(&self, id: TransactionId) -> ledger::Result<Option<Transaction>> {
        self.inner.get_transaction(id).await
    }

    async fn find_by_operation(
        &self,
        wallet_id: WalletId,
        tx_type: TransactionType,
        operation_id: OperationId,
    ) -> ledger::Result<Option<Transaction>> {
        self.inner
            .find_by_operation(wallet_id, tx_type, operation_id)
            .await
    }

    async fn list_for_wallet(
        &self,
        wallet_id: WalletId,
        query: &TransactionQuery,
    ) -> ledger::Result<Vec<Transaction>> {
        self.inner.list_for_wallet(wallet_id, query).await
    }
}
