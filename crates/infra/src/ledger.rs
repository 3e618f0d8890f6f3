//! The stock ledger: the only writer of stock numbers.
//!
//! Each primitive (`increase`, `reserve`, `release`, `consume`, `adjust_to`)
//! runs in its own transaction:
//!
//! ```text
//! begin
//!   ↓
//! lock the stock record (create it first for receipts)
//!   ↓
//! StockRecord::handle(command)   -- pure decision, may reject
//!   ↓
//! apply changes, save record (version checked)
//!   ↓
//! MovementRecorder::record for every change
//!   ↓
//! commit (or roll back everything on any error)
//! ```
//!
//! The `*_in` variants do the same work inside a caller-owned transaction so
//! multi-record flows (receiving a purchase, converting a quote) can group
//! several primitives into one atomic unit.

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{info, instrument, warn};

use stockledger_core::{ActorId, Aggregate, AggregateRoot, DomainError, ExpectedVersion};
use stockledger_inventory::{
    LedgerBalance, MovementEntry, MovementReference, NewMovement, ProductId, StockCommand,
    StockKey, StockRecord, StockRecordId, WarehouseId, replay, sort_fefo,
};

use crate::error::LedgerError;
use crate::recorder::MovementRecorder;
use crate::store::{StockStore, StockTx};

/// Who and what a ledger operation is attributed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerContext {
    pub reference: MovementReference,
    pub actor: ActorId,
    pub at: DateTime<Utc>,
}

impl LedgerContext {
    pub fn new(reference: MovementReference, actor: ActorId, at: DateTime<Utc>) -> Self {
        Self {
            reference,
            actor,
            at,
        }
    }
}

/// A product whose on-hand total across all records is at or below its minimum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LowStock {
    pub product_id: ProductId,
    pub on_hand: i64,
    pub minimum: i64,
}

/// Result of replaying a record's movements against its stored counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub stock_record_id: StockRecordId,
    pub stored: LedgerBalance,
    pub replayed: LedgerBalance,
    pub movement_count: usize,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        self.stored == self.replayed
    }
}

#[derive(Debug, Clone)]
pub struct StockLedger<S> {
    store: S,
    recorder: MovementRecorder,
}

impl<S> StockLedger<S>
where
    S: StockStore,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            recorder: MovementRecorder::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run `f` in one transaction: commit on `Ok`, roll back on `Err`.
    pub fn transaction<T, F>(&self, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&mut dyn StockTx) -> Result<T, LedgerError>,
    {
        in_transaction(&self.store, f)
    }

    #[instrument(skip(self, ctx), fields(key = %key, document = %ctx.reference.document_number), err)]
    pub fn increase(
        &self,
        key: &StockKey,
        quantity: i64,
        expiration_date: Option<NaiveDate>,
        ctx: &LedgerContext,
    ) -> Result<StockRecord, LedgerError> {
        let record =
            self.transaction(|tx| self.increase_in(tx, key, quantity, expiration_date, ctx))?;
        info!(quantity = record.quantity(), "stock increased");
        Ok(record)
    }

    #[instrument(skip(self, ctx), fields(key = %key, document = %ctx.reference.document_number), err)]
    pub fn reserve(
        &self,
        key: &StockKey,
        quantity: i64,
        ctx: &LedgerContext,
    ) -> Result<StockRecord, LedgerError> {
        let record = self.transaction(|tx| self.reserve_in(tx, key, quantity, ctx))?;
        info!(reserved = record.reserved(), available = record.available(), "stock reserved");
        Ok(record)
    }

    /// Release up to `quantity` reserved units. `None` when the record does not exist.
    #[instrument(skip(self, ctx), fields(key = %key, document = %ctx.reference.document_number), err)]
    pub fn release(
        &self,
        key: &StockKey,
        quantity: i64,
        ctx: &LedgerContext,
    ) -> Result<Option<StockRecord>, LedgerError> {
        self.transaction(|tx| self.release_in(tx, key, quantity, ctx))
    }

    #[instrument(skip(self, ctx), fields(key = %key, document = %ctx.reference.document_number), err)]
    pub fn consume(
        &self,
        key: &StockKey,
        quantity: i64,
        ctx: &LedgerContext,
    ) -> Result<StockRecord, LedgerError> {
        let record = self.transaction(|tx| self.consume_in(tx, key, quantity, ctx))?;
        info!(quantity = record.quantity(), reserved = record.reserved(), "stock consumed");
        Ok(record)
    }

    /// Set on-hand quantity to a physically counted value (manual correction).
    #[instrument(skip(self, ctx), fields(key = %key, document = %ctx.reference.document_number), err)]
    pub fn adjust_to(
        &self,
        key: &StockKey,
        counted: i64,
        ctx: &LedgerContext,
    ) -> Result<StockRecord, LedgerError> {
        let record = self.transaction(|tx| self.adjust_to_in(tx, key, counted, ctx))?;
        info!(quantity = record.quantity(), "stock adjusted");
        Ok(record)
    }

    pub fn increase_in(
        &self,
        tx: &mut dyn StockTx,
        key: &StockKey,
        quantity: i64,
        expiration_date: Option<NaiveDate>,
        ctx: &LedgerContext,
    ) -> Result<StockRecord, LedgerError> {
        ensure_positive(quantity)?;
        let record = tx.lock_or_create_record(key, ctx.at)?;
        self.apply_in(
            tx,
            record,
            StockCommand::Increase {
                quantity,
                expiration_date,
                occurred_at: ctx.at,
            },
            ctx,
        )
    }

    pub fn reserve_in(
        &self,
        tx: &mut dyn StockTx,
        key: &StockKey,
        quantity: i64,
        ctx: &LedgerContext,
    ) -> Result<StockRecord, LedgerError> {
        ensure_positive(quantity)?;
        let record = tx
            .lock_record(key)?
            .ok_or(LedgerError::InsufficientStock {
                requested: quantity,
                available: 0,
            })?;
        self.apply_in(
            tx,
            record,
            StockCommand::Reserve {
                quantity,
                occurred_at: ctx.at,
            },
            ctx,
        )
    }

    pub fn release_in(
        &self,
        tx: &mut dyn StockTx,
        key: &StockKey,
        quantity: i64,
        ctx: &LedgerContext,
    ) -> Result<Option<StockRecord>, LedgerError> {
        ensure_positive(quantity)?;
        let Some(record) = tx.lock_record(key)? else {
            return Ok(None);
        };
        self.apply_in(
            tx,
            record,
            StockCommand::Release {
                quantity,
                occurred_at: ctx.at,
            },
            ctx,
        )
        .map(Some)
    }

    pub fn consume_in(
        &self,
        tx: &mut dyn StockTx,
        key: &StockKey,
        quantity: i64,
        ctx: &LedgerContext,
    ) -> Result<StockRecord, LedgerError> {
        ensure_positive(quantity)?;
        let record = tx.lock_record(key)?.ok_or_else(|| {
            LedgerError::ReservationInconsistency(format!(
                "cannot consume {quantity} from {key}: no stock record"
            ))
        })?;
        self.apply_in(
            tx,
            record,
            StockCommand::Consume {
                quantity,
                occurred_at: ctx.at,
            },
            ctx,
        )
    }

    pub fn adjust_to_in(
        &self,
        tx: &mut dyn StockTx,
        key: &StockKey,
        counted: i64,
        ctx: &LedgerContext,
    ) -> Result<StockRecord, LedgerError> {
        let record = tx
            .lock_record(key)?
            .ok_or_else(|| DomainError::not_found(format!("stock record {key}")))?;
        self.apply_in(
            tx,
            record,
            StockCommand::AdjustTo {
                counted,
                occurred_at: ctx.at,
            },
            ctx,
        )
    }

    fn apply_in(
        &self,
        tx: &mut dyn StockTx,
        record: StockRecord,
        command: StockCommand,
        ctx: &LedgerContext,
    ) -> Result<StockRecord, LedgerError> {
        let expected = ExpectedVersion::Exact(record.version());
        let changes = record.handle(&command)?;
        if changes.is_empty() {
            return Ok(record);
        }

        let mut current = record;
        let mut movements = Vec::with_capacity(changes.len());
        for change in &changes {
            let before = current.clone();
            current.apply(change);
            movements.push(NewMovement::from_change(
                &before,
                &current,
                change,
                ctx.reference.clone(),
                ctx.actor,
            ));
        }

        tx.save_record(&current, expected)?;
        for movement in movements {
            self.recorder.record(tx, movement)?;
        }
        Ok(current)
    }

    pub fn record(&self, key: &StockKey) -> Result<Option<StockRecord>, LedgerError> {
        Ok(self.store.record(key)?)
    }

    /// Movements of one record, oldest first.
    pub fn history(&self, stock_record_id: StockRecordId) -> Result<Vec<MovementEntry>, LedgerError> {
        Ok(self.store.movements(stock_record_id)?)
    }

    /// Sum of available units of `product`, optionally within one warehouse.
    pub fn available_for_product(
        &self,
        product_id: ProductId,
        warehouse_id: Option<WarehouseId>,
    ) -> Result<i64, LedgerError> {
        Ok(self
            .store
            .records_for_product(product_id)?
            .iter()
            .filter(|r| warehouse_id.is_none_or(|w| r.key().warehouse_id == w))
            .map(StockRecord::available)
            .sum())
    }

    /// Lots holding stock of `product`, first-expired-first-out.
    pub fn lots_by_expiry(
        &self,
        product_id: ProductId,
        warehouse_id: Option<WarehouseId>,
    ) -> Result<Vec<StockRecord>, LedgerError> {
        let mut lots: Vec<StockRecord> = self
            .store
            .records_for_product(product_id)?
            .into_iter()
            .filter(|r| r.quantity() > 0)
            .filter(|r| warehouse_id.is_none_or(|w| r.key().warehouse_id == w))
            .collect();
        sort_fefo(&mut lots);
        Ok(lots)
    }

    /// Stocked lots that expire between `today` and `today + days`.
    pub fn expiring_within(&self, today: NaiveDate, days: i64) -> Result<Vec<StockRecord>, LedgerError> {
        self.stocked_where(|r| r.expires_within(today, days))
    }

    /// Stocked lots whose expiration date is before `today`.
    pub fn expired(&self, today: NaiveDate) -> Result<Vec<StockRecord>, LedgerError> {
        self.stocked_where(|r| r.is_expired(today))
    }

    /// Products at or below their minimum on-hand level.
    ///
    /// Minimums belong to the product catalogue, so the caller passes them in.
    /// A product with no stock record counts as zero on hand.
    pub fn low_stock(
        &self,
        minimums: impl IntoIterator<Item = (ProductId, i64)>,
    ) -> Result<Vec<LowStock>, LedgerError> {
        let mut low = Vec::new();
        for (product_id, minimum) in minimums {
            let on_hand: i64 = self
                .store
                .records_for_product(product_id)?
                .iter()
                .map(StockRecord::quantity)
                .sum();
            if on_hand <= minimum {
                low.push(LowStock {
                    product_id,
                    on_hand,
                    minimum,
                });
            }
        }
        Ok(low)
    }

    fn stocked_where(
        &self,
        predicate: impl Fn(&StockRecord) -> bool,
    ) -> Result<Vec<StockRecord>, LedgerError> {
        let mut records: Vec<StockRecord> = self
            .store
            .all_records()?
            .into_iter()
            .filter(|r| r.quantity() > 0 && predicate(r))
            .collect();
        sort_fefo(&mut records);
        Ok(records)
    }

    /// Replay the movement ledger of one record and compare with its counters.
    #[instrument(skip(self), err)]
    pub fn reconcile(&self, stock_record_id: StockRecordId) -> Result<Reconciliation, LedgerError> {
        let record = self
            .store
            .record_by_id(stock_record_id)?
            .ok_or_else(|| DomainError::not_found(format!("stock record {stock_record_id}")))?;
        let movements = self.store.movements(stock_record_id)?;

        let reconciliation = Reconciliation {
            stock_record_id,
            stored: LedgerBalance {
                quantity: record.quantity(),
                reserved: record.reserved(),
            },
            replayed: replay(&movements),
            movement_count: movements.len(),
        };

        if !reconciliation.is_consistent() {
            warn!(
                key = %record.key(),
                stored = ?reconciliation.stored,
                replayed = ?reconciliation.replayed,
                "stock record disagrees with its movement ledger"
            );
        }
        Ok(reconciliation)
    }
}

/// Run `f` in one transaction of `store`: commit on `Ok`, roll back on `Err`.
pub fn in_transaction<S, T, F>(store: &S, f: F) -> Result<T, LedgerError>
where
    S: StockStore + ?Sized,
    F: FnOnce(&mut dyn StockTx) -> Result<T, LedgerError>,
{
    let mut tx = store.begin()?;
    match f(tx.as_mut()) {
        Ok(value) => {
            tx.commit()?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback() {
                warn!(error = %rollback_err, "rollback failed after: {err}");
            }
            Err(err)
        }
    }
}

fn ensure_positive(quantity: i64) -> Result<(), LedgerError> {
    if quantity <= 0 {
        return Err(LedgerError::InvalidQuantity { quantity });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use stockledger_core::AggregateId;
    use stockledger_inventory::{Lot, MovementKind, Warehouse};

    use crate::store::InMemoryStockStore;

    fn ledger() -> (StockLedger<Arc<InMemoryStockStore>>, WarehouseId) {
        let warehouse = Warehouse::new(WarehouseId::new(AggregateId::new()), "Almacén Principal");
        let id = warehouse.id;
        let store = Arc::new(InMemoryStockStore::with_warehouses([warehouse]));
        (StockLedger::new(store), id)
    }

    fn ctx() -> LedgerContext {
        LedgerContext::new(MovementReference::note("unit test"), ActorId::new(), Utc::now())
    }

    fn key(warehouse_id: WarehouseId) -> StockKey {
        StockKey::new(ProductId::new(AggregateId::new()), warehouse_id, Lot::unlotted())
    }

    #[test]
    fn reserve_then_consume() {
        let (ledger, w) = ledger();
        let k = key(w);
        ledger.increase(&k, 10, None, &ctx()).unwrap();

        let r = ledger.reserve(&k, 4, &ctx()).unwrap();
        assert_eq!((r.reserved(), r.available()), (4, 6));

        let r = ledger.consume(&k, 4, &ctx()).unwrap();
        assert_eq!((r.quantity(), r.reserved()), (6, 0));
    }

    #[test]
    fn failed_reserve_leaves_state_and_ledger_untouched() {
        let (ledger, w) = ledger();
        let k = key(w);
        let record = ledger.increase(&k, 5, None, &ctx()).unwrap();

        let err = ledger.reserve(&k, 6, &ctx()).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientStock {
                requested: 6,
                available: 5
            }
        );

        let after = ledger.record(&k).unwrap().unwrap();
        assert_eq!((after.quantity(), after.reserved()), (5, 0));
        assert_eq!(ledger.history(record.record_id()).unwrap().len(), 1);
    }

    #[test]
    fn reserving_unknown_stock_is_insufficient() {
        let (ledger, w) = ledger();
        assert_eq!(
            ledger.reserve(&key(w), 1, &ctx()).unwrap_err(),
            LedgerError::InsufficientStock {
                requested: 1,
                available: 0
            }
        );
    }

    #[test]
    fn non_positive_quantities_are_rejected_before_writing() {
        let (ledger, w) = ledger();
        let k = key(w);
        assert_eq!(
            ledger.increase(&k, 0, None, &ctx()).unwrap_err(),
            LedgerError::InvalidQuantity { quantity: 0 }
        );
        assert!(ledger.record(&k).unwrap().is_none());
        assert!(matches!(
            ledger.release(&k, -2, &ctx()),
            Err(LedgerError::InvalidQuantity { quantity: -2 })
        ));
    }

    #[test]
    fn double_release_is_clamped_and_records_one_movement() {
        let (ledger, w) = ledger();
        let k = key(w);
        let record = ledger.increase(&k, 8, None, &ctx()).unwrap();
        ledger.reserve(&k, 3, &ctx()).unwrap();

        let once = ledger.release(&k, 5, &ctx()).unwrap().unwrap();
        let twice = ledger.release(&k, 5, &ctx()).unwrap().unwrap();
        assert_eq!(once.reserved(), 0);
        assert_eq!(twice.reserved(), 0);

        let kinds: Vec<MovementKind> = ledger
            .history(record.record_id())
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
    fn releasing_unknown_record_is_a_no_op() {
        let (ledger, w) = ledger();
        assert_eq!(ledger.release(&key(w), 2, &ctx()).unwrap(), None);
    }

    #[test]
    fn consuming_unreserved_stock_is_an_inconsistency() {
        let (ledger, w) = ledger();
        let k = key(w);
        ledger.increase(&k, 5, None, &ctx()).unwrap();
        assert!(matches!(
            ledger.consume(&k, 1, &ctx()),
            Err(LedgerError::ReservationInconsistency(_))
        ));
    }

    #[test]
    fn adjustment_is_recorded_with_signed_delta() {
        let (ledger, w) = ledger();
        let k = key(w);
        let record = ledger.increase(&k, 10, None, &ctx()).unwrap();

        let adjusted = ledger.adjust_to(&k, 7, &ctx()).unwrap();
        assert_eq!(adjusted.quantity(), 7);

        let history = ledger.history(record.record_id()).unwrap();
        let last = history.last().unwrap();
        assert_eq!(last.kind, MovementKind::Adjustment);
        assert_eq!(last.delta, -3);
        assert_eq!((last.quantity_before, last.quantity_after), (10, 7));

        assert!(matches!(
            ledger.adjust_to(&key(w), 1, &ctx()),
            Err(LedgerError::Domain(DomainError::NotFound(_)))
        ));
    }

    #[test]
    fn reconcile_replays_the_ledger() {
        let (ledger, w) = ledger();
        let k = key(w);
        let record = ledger.increase(&k, 10, None, &ctx()).unwrap();
        ledger.reserve(&k, 6, &ctx()).unwrap();
        ledger.consume(&k, 2, &ctx()).unwrap();
        ledger.release(&k, 1, &ctx()).unwrap();
        ledger.adjust_to(&k, 12, &ctx()).unwrap();

        let rec = ledger.reconcile(record.record_id()).unwrap();
        assert!(rec.is_consistent());
        assert_eq!(
            rec.stored,
            LedgerBalance {
                quantity: 12,
                reserved: 3
            }
        );
        assert_eq!(rec.movement_count, 5);
    }

    #[test]
    fn overflowing_receipt_is_rejected_and_not_recorded() {
        let (ledger, w) = ledger();
        let k = key(w);
        let record = ledger.increase(&k, 1, None, &ctx()).unwrap();

        assert_eq!(
            ledger.increase(&k, i64::MAX, None, &ctx()).unwrap_err(),
            LedgerError::QuantityOverflow {
                on_hand: 1,
                quantity: i64::MAX
            }
        );
        assert_eq!(ledger.record(&k).unwrap().unwrap().quantity(), 1);
        assert_eq!(ledger.history(record.record_id()).unwrap().len(), 1);
    }

    #[test]
    fn low_stock_compares_on_hand_totals_with_minimums() {
        let (ledger, w) = ledger();
        let product = ProductId::new(AggregateId::new());
        let plenty = ProductId::new(AggregateId::new());
        let missing = ProductId::new(AggregateId::new());

        ledger
            .increase(&StockKey::new(product, w, Lot::new("A")), 2, None, &ctx())
            .unwrap();
        let lot_b = StockKey::new(product, w, Lot::new("B"));
        ledger.increase(&lot_b, 3, None, &ctx()).unwrap();
        ledger.reserve(&lot_b, 3, &ctx()).unwrap();
        ledger
            .increase(&StockKey::new(plenty, w, Lot::unlotted()), 50, None, &ctx())
            .unwrap();

        let low = ledger
            .low_stock([(product, 5), (plenty, 10), (missing, 0)])
            .unwrap();
        assert_eq!(
            low,
            vec![
                LowStock {
                    product_id: product,
                    on_hand: 5,
                    minimum: 5
                },
                LowStock {
                    product_id: missing,
                    on_hand: 0,
                    minimum: 0
                },
            ]
        );
    }

    #[test]
    fn expiry_queries_order_lots_fefo() {
        let (ledger, w) = ledger();
        let product = ProductId::new(AggregateId::new());
        let today = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let lot = |name: &str| StockKey::new(product, w, Lot::new(name));

        ledger
            .increase(&lot("late"), 2, NaiveDate::from_ymd_opt(2024, 5, 20), &ctx())
            .unwrap();
        ledger
            .increase(&lot("soon"), 3, NaiveDate::from_ymd_opt(2024, 5, 5), &ctx())
            .unwrap();
        ledger
            .increase(&lot("gone"), 1, NaiveDate::from_ymd_opt(2024, 4, 1), &ctx())
            .unwrap();
        ledger.increase(&lot(""), 4, None, &ctx()).unwrap();

        let order: Vec<String> = ledger
            .lots_by_expiry(product, Some(w))
            .unwrap()
            .iter()
            .map(|r| r.key().lot.as_str().to_string())
            .collect();
        assert_eq!(order, vec!["gone", "soon", "late", ""]);

        assert_eq!(ledger.available_for_product(product, None).unwrap(), 10);

        let expiring: Vec<_> = ledger.expiring_within(today, 7).unwrap();
        assert_eq!(expiring.len(), 1);
        assert_eq!(expiring[0].key().lot.as_str(), "soon");

        let expired = ledger.expired(today).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].key().lot.as_str(), "gone");
    }
}
