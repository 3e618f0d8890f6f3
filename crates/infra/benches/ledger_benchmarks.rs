use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use std::sync::{Arc, Barrier};
use std::thread;

use chrono::Utc;
use stockledger_core::{ActorId, AggregateId};
use stockledger_infra::{InMemoryStockStore, LedgerContext, StockLedger};
use stockledger_inventory::{Lot, MovementReference, ProductId, StockKey, Warehouse, WarehouseId};

fn setup(initial: i64) -> (StockLedger<Arc<InMemoryStockStore>>, StockKey) {
    let warehouse = Warehouse::new(WarehouseId::new(AggregateId::new()), "Almacén Principal");
    let key = StockKey::new(ProductId::new(AggregateId::new()), warehouse.id, Lot::unlotted());
    let ledger = StockLedger::new(Arc::new(InMemoryStockStore::with_warehouses([warehouse])));
    ledger.increase(&key, initial, None, &ctx()).unwrap();
    (ledger, key)
}

fn ctx() -> LedgerContext {
    LedgerContext::new(MovementReference::note("bench"), ActorId::new(), Utc::now())
}

/// One reserve + release round trip on a single record, no contention.
fn bench_reserve_release_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("reserve_release_latency");

    group.bench_function("single_record", |b| {
        let (ledger, key) = setup(1_000_000);
        b.iter(|| {
            ledger.reserve(&key, black_box(1), &ctx()).unwrap();
            ledger.release(&key, black_box(1), &ctx()).unwrap();
        });
    });

    group.finish();
}

/// N threads reserving against the same record; each thread does one
/// reserve + release per iteration.
fn bench_contended_reservations(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended_reservations");
    group.sample_size(20);

    for threads in [2usize, 4, 8].iter() {
        group.throughput(Throughput::Elements(*threads as u64 * 100));
        group.bench_with_input(BenchmarkId::new("threads", threads), threads, |b, &threads| {
            let (ledger, key) = setup(1_000_000);
            b.iter(|| {
                let barrier = Arc::new(Barrier::new(threads));
                let workers: Vec<_> = (0..threads)
                    .map(|_| {
                        let ledger = ledger.clone();
                        let key = key.clone();
                        let barrier = barrier.clone();
                        thread::spawn(move || {
                            barrier.wait();
                            for _ in 0..100 {
                                ledger.reserve(&key, 1, &ctx()).unwrap();
                                ledger.release(&key, 1, &ctx()).unwrap();
                            }
                        })
                    })
                    .collect();
                for worker in workers {
                    worker.join().unwrap();
                }
            });
        });
    }

    group.finish();
}

/// Replay cost of the movement ledger as history grows.
fn bench_reconcile(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile");

    for movements in [10usize, 100, 1000].iter() {
        let (ledger, key) = setup(1);
        for _ in 1..*movements {
            ledger.increase(&key, 1, None, &ctx()).unwrap();
        }
        let id = ledger.record(&key).unwrap().unwrap().record_id();

        group.throughput(Throughput::Elements(*movements as u64));
        group.bench_with_input(BenchmarkId::new("movements", movements), movements, |b, _| {
            b.iter(|| black_box(ledger.reconcile(id).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_reserve_release_latency,
    bench_contended_reservations,
    bench_reconcile
);
criterion_main!(benches);
