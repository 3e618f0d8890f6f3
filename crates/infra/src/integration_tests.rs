//! End-to-end tests of the stock engine against the in-memory store.
//!
//! DocumentEvent → Router → ReceivingPipeline / ReservationStateMachine
//!               → StockLedger → MovementRecorder → StockStore
//!
//! Verifies:
//! - Receipts are atomic per purchase and applied once per purchase
//! - Quote reservations are all-or-nothing across lines
//! - Concurrent reservations never double-spend a unit
//! - The movement ledger reproduces every record's counters

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use chrono::{NaiveDate, Utc};

use stockledger_accounting::{PayableStatus, PaymentTerms};
use stockledger_core::{ActorId, AggregateId};
use stockledger_events::{EventBus, EventEnvelope, InMemoryEventBus};
use stockledger_inventory::{
    Lot, MovementKind, MovementReference, ProductId, StockKey, Warehouse, WarehouseId,
};
use stockledger_purchasing::{
    PaymentType, PurchaseDocument, PurchaseId, PurchaseLine, PurchaseReceived, PurchaseStatus,
};
use stockledger_sales::{
    QuoteCreated, QuoteDocument, QuoteId, QuoteLine, QuoteSource, QuoteStatus,
    QuoteStatusChanged, ReservationPolicy, ReservationStatus,
};

use crate::dispatcher::{DispatchOutcome, DocumentEvent, DocumentEventRouter};
use crate::error::LedgerError;
use crate::ledger::{LedgerContext, StockLedger, in_transaction};
use crate::payables::PayableTracker;
use crate::receiving::{PreferredNameResolver, ReceiptOutcome, ReceivingPipeline, ReceivingPolicy};
use crate::reservations::{FefoSourceResolver, ReservationOutcome, ReservationStateMachine};
use crate::store::{InMemoryStockStore, StockStore};
use crate::workers::{DocumentEventWorker, RetryPolicy};

type Store = Arc<InMemoryStockStore>;
type Router = DocumentEventRouter<Store, PreferredNameResolver<Store>, FefoSourceResolver<Store>>;

struct Engine {
    store: Store,
    ledger: StockLedger<Store>,
    payables: PayableTracker<Store>,
    router: Router,
    main_warehouse: WarehouseId,
}

fn engine() -> Engine {
    stockledger_observability::init_for_tests();

    let north = Warehouse::new(WarehouseId::new(AggregateId::new()), "Bodega Norte");
    let main = Warehouse::new(WarehouseId::new(AggregateId::new()), "Almacén Principal");
    let main_warehouse = main.id;
    let store: Store = Arc::new(InMemoryStockStore::with_warehouses([north, main]));

    let ledger = StockLedger::new(store.clone());
    let payables = PayableTracker::new(store.clone(), PaymentTerms::default());
    let receiving = ReceivingPipeline::new(
        ledger.clone(),
        PreferredNameResolver::new(store.clone(), ReceivingPolicy::default()),
        payables.clone(),
    );
    let reservations = ReservationStateMachine::new(
        ledger.clone(),
        FefoSourceResolver::new(store.clone()),
        ReservationPolicy::default(),
    );

    Engine {
        store,
        ledger,
        payables,
        router: DocumentEventRouter::new(receiving, reservations),
        main_warehouse,
    }
}

fn ctx() -> LedgerContext {
    LedgerContext::new(MovementReference::note("integration"), ActorId::new(), Utc::now())
}

fn product() -> ProductId {
    ProductId::new(AggregateId::new())
}

fn purchase(payment_type: PaymentType, lines: Vec<(ProductId, i64)>) -> PurchaseDocument {
    PurchaseDocument {
        id: PurchaseId::new(AggregateId::new()),
        number: "OC-2024-001".to_string(),
        status: PurchaseStatus::Received,
        payment_type,
        total: 500,
        date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        lines: lines
            .into_iter()
            .enumerate()
            .map(|(i, (product_id, quantity))| PurchaseLine {
                line_no: i as u32 + 1,
                product_id,
                quantity,
                lot: Lot::unlotted(),
                expiration_date: None,
            })
            .collect(),
    }
}

fn received(document: &PurchaseDocument) -> DocumentEvent {
    PurchaseReceived {
        document: document.clone(),
        actor: ActorId::new(),
        occurred_at: Utc::now(),
    }
    .into()
}

fn external_quote(lines: Vec<(ProductId, i64)>) -> QuoteDocument {
    QuoteDocument {
        id: QuoteId::new(AggregateId::new()),
        number: "PF-0042".to_string(),
        status: QuoteStatus::Pending,
        source: QuoteSource::ExternalApp,
        lines: lines
            .into_iter()
            .enumerate()
            .map(|(i, (product_id, quantity))| QuoteLine {
                line_no: i as u32 + 1,
                product_id,
                quantity,
            })
            .collect(),
    }
}

fn quote_created(quote: &QuoteDocument) -> DocumentEvent {
    QuoteCreated {
        quote: quote.clone(),
        actor: ActorId::new(),
        occurred_at: Utc::now(),
    }
    .into()
}

fn quote_moved(quote: &QuoteDocument, from: QuoteStatus, to: QuoteStatus) -> DocumentEvent {
    let mut quote = quote.clone();
    quote.status = to;
    QuoteStatusChanged {
        quote,
        old_status: from,
        new_status: to,
        actor: ActorId::new(),
        occurred_at: Utc::now(),
    }
    .into()
}

fn unlotted(e: &Engine, product_id: ProductId) -> StockKey {
    StockKey::new(product_id, e.main_warehouse, Lot::unlotted())
}

fn counters(e: &Engine, key: &StockKey) -> (i64, i64) {
    e.ledger
        .record(key)
        .unwrap()
        .map_or((0, 0), |r| (r.quantity(), r.reserved()))
}

#[test]
fn reserve_then_consume_depletes_stock() {
    let e = engine();
    let key = unlotted(&e, product());
    e.ledger.increase(&key, 10, None, &ctx()).unwrap();

    let record = e.ledger.reserve(&key, 4, &ctx()).unwrap();
    assert_eq!((record.reserved(), record.available()), (4, 6));

    e.ledger.consume(&key, 4, &ctx()).unwrap();
    assert_eq!(counters(&e, &key), (6, 0));
}

#[test]
fn over_reserve_fails_and_changes_nothing() {
    let e = engine();
    let key = unlotted(&e, product());
    e.ledger.increase(&key, 5, None, &ctx()).unwrap();

    assert_eq!(
        e.ledger.reserve(&key, 6, &ctx()).unwrap_err(),
        LedgerError::InsufficientStock {
            requested: 6,
            available: 5
        }
    );
    assert_eq!(counters(&e, &key), (5, 0));
}

#[test]
fn partially_reservable_quote_is_rolled_back() {
    let e = engine();
    let (a, b) = (product(), product());
    let key_a = unlotted(&e, a);
    e.ledger.increase(&key_a, 3, None, &ctx()).unwrap();

    let quote = external_quote(vec![(a, 3), (b, 1)]);
    let err = e.router.dispatch(&quote_created(&quote)).unwrap_err();
    assert_eq!(
        err,
        LedgerError::InsufficientStock {
            requested: 1,
            available: 0
        }
    );

    assert_eq!(counters(&e, &key_a), (3, 0));
    let rows = e.store.reservations_for_quote(quote.id).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, ReservationStatus::Released);

    let kinds: Vec<MovementKind> = e
        .ledger
        .history(rows[0].stock_record_id)
        .unwrap()
        .iter()
        .map(|m| m.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![MovementKind::Receipt, MovementKind::Reserve, MovementKind::Release]
    );
}

#[test]
fn credit_purchase_receipt_is_applied_once() {
    let e = engine();
    let (a, b) = (product(), product());
    let doc = purchase(PaymentType::Credit, vec![(a, 7), (b, 3)]);

    let first = e.router.dispatch(&received(&doc)).unwrap();
    let DispatchOutcome::Receipt(ReceiptOutcome::Applied { records, payable }) = first else {
        panic!("expected an applied receipt");
    };
    assert_eq!(records.len(), 2);
    let payable = payable.unwrap();
    assert_eq!(payable.original_amount(), 500);
    assert_eq!(payable.remaining_balance(), 500);
    assert_eq!(payable.due_date(), NaiveDate::from_ymd_opt(2024, 1, 31).unwrap());

    assert_eq!(counters(&e, &unlotted(&e, a)), (7, 0));
    assert_eq!(counters(&e, &unlotted(&e, b)), (3, 0));
    for record in &records {
        let history = e.ledger.history(record.record_id()).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, MovementKind::Receipt);
        assert_eq!(history[0].reference.document_number, "OC-2024-001");
    }

    assert_eq!(
        e.router.dispatch(&received(&doc)).unwrap(),
        DispatchOutcome::Receipt(ReceiptOutcome::AlreadyApplied)
    );
    assert_eq!(counters(&e, &unlotted(&e, a)), (7, 0));
    assert_eq!(e.store.payables().unwrap().len(), 1);
}

#[test]
fn cash_purchase_creates_no_payable() {
    let e = engine();
    let doc = purchase(PaymentType::Cash, vec![(product(), 2)]);

    let outcome = e.router.dispatch(&received(&doc)).unwrap();
    assert!(matches!(
        outcome,
        DispatchOutcome::Receipt(ReceiptOutcome::Applied { payable: None, .. })
    ));
    assert!(e.payables.get(doc.id).unwrap().is_none());
}

#[test]
fn receipt_without_warehouses_is_fatal_and_writes_nothing() {
    let store: Store = Arc::new(InMemoryStockStore::new());
    let ledger = StockLedger::new(store.clone());
    let pipeline = ReceivingPipeline::new(
        ledger.clone(),
        PreferredNameResolver::new(store.clone(), ReceivingPolicy::default()),
        PayableTracker::new(store.clone(), PaymentTerms::default()),
    );
    let doc = purchase(PaymentType::Credit, vec![(product(), 2)]);
    let event = PurchaseReceived {
        document: doc.clone(),
        actor: ActorId::new(),
        occurred_at: Utc::now(),
    };

    assert_eq!(
        pipeline.receive(&event).unwrap_err(),
        LedgerError::NoWarehouseConfigured
    );
    assert!(store.all_records().unwrap().is_empty());
    assert!(store.payable_for_purchase(doc.id).unwrap().is_none());
}

#[test]
fn failed_unit_of_work_rolls_back_every_write() {
    let e = engine();
    let key = unlotted(&e, product());

    let result: Result<(), LedgerError> = in_transaction(&e.store, |tx| {
        e.ledger.increase_in(tx, &key, 5, None, &ctx())?;
        Err(LedgerError::ReservationInconsistency("forced".to_string()))
    });

    assert!(result.is_err());
    assert!(e.ledger.record(&key).unwrap().is_none());
}

#[test]
fn quote_lifecycle_reserve_approve_convert() {
    let e = engine();
    let p = product();
    let key = unlotted(&e, p);
    e.ledger.increase(&key, 10, None, &ctx()).unwrap();
    let quote = external_quote(vec![(p, 4)]);

    assert_eq!(
        e.router.dispatch(&quote_created(&quote)).unwrap(),
        DispatchOutcome::Reservation(ReservationOutcome::Reserved { lines: 1 })
    );
    assert_eq!(counters(&e, &key), (10, 4));

    e.router
        .dispatch(&quote_moved(&quote, QuoteStatus::Pending, QuoteStatus::Approved))
        .unwrap();
    assert_eq!(counters(&e, &key), (10, 4));

    let convert = quote_moved(&quote, QuoteStatus::Approved, QuoteStatus::Converted);
    assert_eq!(
        e.router.dispatch(&convert).unwrap(),
        DispatchOutcome::Reservation(ReservationOutcome::Consumed { rows: 1 })
    );
    assert_eq!(counters(&e, &key), (6, 0));

    // Redelivered conversion consumes nothing more.
    assert_eq!(
        e.router.dispatch(&convert).unwrap(),
        DispatchOutcome::Reservation(ReservationOutcome::Consumed { rows: 0 })
    );
    assert_eq!(counters(&e, &key), (6, 0));
}

#[test]
fn expiry_releases_reservations() {
    let e = engine();
    let p = product();
    let key = unlotted(&e, p);
    e.ledger.increase(&key, 5, None, &ctx()).unwrap();
    let quote = external_quote(vec![(p, 5)]);

    e.router.dispatch(&quote_created(&quote)).unwrap();
    assert_eq!(counters(&e, &key), (5, 5));

    e.router
        .dispatch(&quote_moved(&quote, QuoteStatus::Pending, QuoteStatus::Expired))
        .unwrap();
    assert_eq!(counters(&e, &key), (5, 0));
}

#[test]
fn redelivered_quote_creation_after_conversion_keeps_stock_free() {
    let e = engine();
    let p = product();
    let key = unlotted(&e, p);
    e.ledger.increase(&key, 10, None, &ctx()).unwrap();
    let quote = external_quote(vec![(p, 4)]);
    let create = quote_created(&quote);
    let convert = quote_moved(&quote, QuoteStatus::Approved, QuoteStatus::Converted);

    e.router.dispatch(&create).unwrap();
    e.router.dispatch(&convert).unwrap();
    assert_eq!(counters(&e, &key), (6, 0));

    assert_eq!(
        e.router.dispatch(&create).unwrap(),
        DispatchOutcome::Reservation(ReservationOutcome::AlreadyReserved)
    );
    e.router.dispatch(&convert).unwrap();
    assert_eq!(counters(&e, &key), (6, 0));
}

#[test]
fn concurrent_duplicate_quote_deliveries_reserve_once() {
    for _ in 0..20 {
        let e = engine();
        let p = product();
        let key = unlotted(&e, p);
        e.ledger.increase(&key, 10, None, &ctx()).unwrap();
        let quote = external_quote(vec![(p, 4)]);
        let create = quote_created(&quote);

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let router = e.router.clone();
                let create = create.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    router.dispatch(&create)
                })
            })
            .collect();
        let mut outcomes: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();
        outcomes.sort_by_key(|o| matches!(o, DispatchOutcome::Reservation(ReservationOutcome::AlreadyReserved)));

        assert_eq!(
            outcomes,
            vec![
                DispatchOutcome::Reservation(ReservationOutcome::Reserved { lines: 1 }),
                DispatchOutcome::Reservation(ReservationOutcome::AlreadyReserved),
            ]
        );
        assert_eq!(counters(&e, &key), (10, 4));
        assert_eq!(e.store.reservations_for_quote(quote.id).unwrap().len(), 1);

        e.router
            .dispatch(&quote_moved(&quote, QuoteStatus::Pending, QuoteStatus::Rejected))
            .unwrap();
        assert_eq!(counters(&e, &key), (10, 0));
    }
}

#[test]
fn concurrent_reservations_never_double_spend() {
    let e = engine();
    let key = unlotted(&e, product());
    e.ledger.increase(&key, 5, None, &ctx()).unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let ledger = e.ledger.clone();
            let key = key.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                ledger.reserve(&key, 3, &ctx())
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let successes = results.iter().filter(|r| r.is_ok()).count();
    let shortfalls = results
        .iter()
        .filter(|r| matches!(r, Err(LedgerError::InsufficientStock { .. })))
        .count();

    assert_eq!((successes, shortfalls), (1, 1));
    assert_eq!(counters(&e, &key), (5, 3));
}

#[test]
fn movement_ledger_reproduces_counters() {
    let e = engine();
    let key = unlotted(&e, product());
    let record = e.ledger.increase(&key, 20, None, &ctx()).unwrap();
    e.ledger.reserve(&key, 8, &ctx()).unwrap();
    e.ledger.consume(&key, 5, &ctx()).unwrap();
    e.ledger.release(&key, 10, &ctx()).unwrap();
    e.ledger.adjust_to(&key, 11, &ctx()).unwrap();
    e.ledger.increase(&key, 4, None, &ctx()).unwrap();

    let history = e.ledger.history(record.record_id()).unwrap();
    let quantity: i64 = history
        .iter()
        .filter(|m| {
            matches!(
                m.kind,
                MovementKind::Receipt | MovementKind::Consume | MovementKind::Adjustment
            )
        })
        .map(|m| m.delta)
        .sum();
    assert_eq!(quantity, 15);
    assert_eq!(counters(&e, &key), (15, 0));
    assert!(e.ledger.reconcile(record.record_id()).unwrap().is_consistent());
}

#[test]
fn worker_applies_events_from_the_bus() {
    let e = engine();
    let bus: Arc<InMemoryEventBus<EventEnvelope<DocumentEvent>>> = Arc::new(InMemoryEventBus::new());
    let router = e.router.clone();
    let worker = DocumentEventWorker::spawn(
        "document-events-test",
        &*bus,
        RetryPolicy::default(),
        move |envelope| router.handle_envelope(envelope),
    )
    .unwrap();

    let p = product();
    let doc = purchase(PaymentType::Credit, vec![(p, 9)]);
    bus.publish(received(&doc).into_envelope()).unwrap();
    bus.publish(received(&doc).into_envelope()).unwrap();

    let key = unlotted(&e, p);
    let mut waited = Duration::ZERO;
    while counters(&e, &key) != (9, 0) && waited < Duration::from_secs(2) {
        thread::sleep(Duration::from_millis(10));
        waited += Duration::from_millis(10);
    }
    worker.shutdown();

    assert_eq!(counters(&e, &key), (9, 0));
    let payable = e.payables.get(doc.id).unwrap().unwrap();
    assert_eq!(payable.status(), PayableStatus::Pending);
}
