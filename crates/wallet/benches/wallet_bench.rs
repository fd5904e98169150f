use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use wallet::{
    Consume, CreateWallet, InMemoryWalletService, Money, Recharge, Transfer, UserId, WalletConfig,
    WalletId,
};

fn setup(rt: &tokio::runtime::Runtime, wallets: usize) -> (InMemoryWalletService, Vec<WalletId>) {
    let service = InMemoryWalletService::in_memory(WalletConfig::default());
    let ids = rt.block_on(async {
        let mut ids = Vec::with_capacity(wallets);
        for _ in 0..wallets {
            let wallet = service
                .create_wallet(CreateWallet::new(UserId::new()))
                .await
                .unwrap();
            service
                .recharge(Recharge::new(
                    wallet.id,
                    Money::from_cents(1_000_000_000),
                    "bench",
                ))
                .await
                .unwrap();
            ids.push(wallet.id);
        }
        ids
    });
    (service, ids)
}

fn bench_recharge(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let (service, ids) = setup(&rt, 1);

    c.bench_function("wallet/recharge", |b| {
        b.iter(|| {
            rt.block_on(async {
                service
                    .recharge(Recharge::new(ids[0], Money::from_cents(100), "bench"))
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_consume(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let (service, ids) = setup(&rt, 1);

    c.bench_function("wallet/consume", |b| {
        b.iter(|| {
            rt.block_on(async {
                service
                    .consume(Consume::new(ids[0], Money::from_cents(1), "bench"))
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_transfer(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let (service, ids) = setup(&rt, 2);

    c.bench_function("wallet/transfer", |b| {
        b.iter(|| {
            rt.block_on(async {
                service
                    .transfer(Transfer::new(ids[0], ids[1], Money::from_cents(1), "bench"))
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_concurrent_transfers(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let (service, ids) = setup(&rt, 16);
    let service = Arc::new(service);

    c.bench_function("wallet/concurrent_transfers_16_wallets", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut handles = Vec::with_capacity(ids.len());
                for (i, from) in ids.iter().enumerate() {
                    let service = service.clone();
                    let from = *from;
                    let to = ids[(i + 1) % ids.len()];
                    handles.push(tokio::spawn(async move {
                        service
                            .transfer(Transfer::new(from, to, Money::from_cents(1), "bench"))
                            .await
                            .unwrap();
                    }));
                }
                for handle in handles {
                    handle.await.unwrap();
                }
            });
        });
    });
}

criterion_group!(
    benches,
    bench_recharge,
    bench_consume,
    bench_transfer,
    bench_concurrent_transfers
);
criterion_main!(benches);
