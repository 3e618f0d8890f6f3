use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use stockledger_accounting::Payable;
use stockledger_core::{AggregateId, AggregateRoot, ExpectedVersion};
use stockledger_inventory::{
    MovementEntry, NewMovement, ProductId, StockKey, StockRecord, StockRecordId, Warehouse,
};
use stockledger_purchasing::PurchaseId;
use stockledger_sales::{QuoteId, QuoteReservation};

use super::r#trait::{StockStore, StockTx, StoreError};

/// One reservation row per (quote, line, stock record).
type ReservationKey = (QuoteId, u32, StockRecordId);

fn reservation_key(reservation: &QuoteReservation) -> ReservationKey {
    (
        reservation.quote_id,
        reservation.line_no,
        reservation.stock_record_id,
    )
}

fn of_quote<'a>(
    rows: &'a BTreeMap<ReservationKey, QuoteReservation>,
    quote_id: QuoteId,
) -> impl Iterator<Item = (&'a ReservationKey, &'a QuoteReservation)> {
    rows.iter().filter(move |((q, _, _), _)| *q == quote_id)
}

#[derive(Debug, Default)]
struct State {
    warehouses: Vec<Warehouse>,
    records: BTreeMap<StockKey, StockRecord>,
    movements: Vec<MovementEntry>,
    receipts: HashMap<PurchaseId, DateTime<Utc>>,
    payables: HashMap<PurchaseId, Payable>,
    quote_claims: HashMap<QuoteId, DateTime<Utc>>,
    reservations: BTreeMap<ReservationKey, QuoteReservation>,
}

impl State {
    fn record_key(&self, id: StockRecordId) -> Option<&StockKey> {
        self.records
            .values()
            .find(|r| r.record_id() == id)
            .map(|r| r.key())
    }
}

/// Changes made inside one transaction, applied to [`State`] on commit.
#[derive(Debug, Default)]
struct Staged {
    records: BTreeMap<StockKey, StockRecord>,
    movements: Vec<MovementEntry>,
    receipts: HashMap<PurchaseId, DateTime<Utc>>,
    payables: HashMap<PurchaseId, Payable>,
    /// `None` marks a claim dropped in this transaction.
    quote_claims: HashMap<QuoteId, Option<DateTime<Utc>>>,
    reservations: BTreeMap<ReservationKey, QuoteReservation>,
}

/// In-memory stock store.
///
/// Intended for tests/dev. A transaction holds the store mutex for its whole
/// lifetime, so transactions are fully serialized (a superset of row locking).
#[derive(Debug, Default)]
pub struct InMemoryStockStore {
    state: Mutex<State>,
}

impl InMemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with `warehouses`, in order.
    pub fn with_warehouses(warehouses: impl IntoIterator<Item = Warehouse>) -> Self {
        let state = State {
            warehouses: warehouses.into_iter().collect(),
            ..State::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl StockStore for InMemoryStockStore {
    fn begin(&self) -> Result<Box<dyn StockTx + '_>, StoreError> {
        Ok(Box::new(InMemoryTx {
            guard: self.lock()?,
            staged: Staged::default(),
        }))
    }

    fn record(&self, key: &StockKey) -> Result<Option<StockRecord>, StoreError> {
        Ok(self.lock()?.records.get(key).cloned())
    }

    fn record_by_id(&self, id: StockRecordId) -> Result<Option<StockRecord>, StoreError> {
        Ok(self
            .lock()?
            .records
            .values()
            .find(|r| r.record_id() == id)
            .cloned())
    }

    fn records_for_product(&self, product_id: ProductId) -> Result<Vec<StockRecord>, StoreError> {
        Ok(self
            .lock()?
            .records
            .values()
            .filter(|r| r.key().product_id == product_id)
            .cloned()
            .collect())
    }

    fn all_records(&self) -> Result<Vec<StockRecord>, StoreError> {
        Ok(self.lock()?.records.values().cloned().collect())
    }

    fn movements(&self, stock_record_id: StockRecordId) -> Result<Vec<MovementEntry>, StoreError> {
        Ok(self
            .lock()?
            .movements
            .iter()
            .filter(|m| m.stock_record_id == stock_record_id)
            .cloned()
            .collect())
    }

    fn warehouses(&self) -> Result<Vec<Warehouse>, StoreError> {
        Ok(self.lock()?.warehouses.clone())
    }

    fn register_warehouse(&self, warehouse: &Warehouse) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if state.warehouses.iter().any(|w| w.id == warehouse.id) {
            return Err(StoreError::Conflict(format!(
                "warehouse {} already registered",
                warehouse.id
            )));
        }
        state.warehouses.push(warehouse.clone());
        Ok(())
    }

    fn payable_for_purchase(&self, purchase_id: PurchaseId) -> Result<Option<Payable>, StoreError> {
        Ok(self.lock()?.payables.get(&purchase_id).cloned())
    }

    fn payables(&self) -> Result<Vec<Payable>, StoreError> {
        let mut payables: Vec<Payable> = self.lock()?.payables.values().cloned().collect();
        payables.sort_by_key(|p| (p.due_date(), p.created_at()));
        Ok(payables)
    }

    fn reservations_for_quote(&self, quote_id: QuoteId) -> Result<Vec<QuoteReservation>, StoreError> {
        Ok(of_quote(&self.lock()?.reservations, quote_id)
            .map(|(_, r)| r.clone())
            .collect())
    }
}

struct InMemoryTx<'a> {
    guard: MutexGuard<'a, State>,
    staged: Staged,
}

impl InMemoryTx<'_> {
    fn current_record(&self, key: &StockKey) -> Option<&StockRecord> {
        self.staged
            .records
            .get(key)
            .or_else(|| self.guard.records.get(key))
    }

    fn current_payable(&self, purchase_id: PurchaseId) -> Option<&Payable> {
        self.staged
            .payables
            .get(&purchase_id)
            .or_else(|| self.guard.payables.get(&purchase_id))
    }

    fn quote_claimed(&self, quote_id: QuoteId) -> bool {
        match self.staged.quote_claims.get(&quote_id) {
            Some(claim) => claim.is_some(),
            None => self.guard.quote_claims.contains_key(&quote_id),
        }
    }

    fn current_reservation(&self, key: &ReservationKey) -> Option<&QuoteReservation> {
        self.staged
            .reservations
            .get(key)
            .or_else(|| self.guard.reservations.get(key))
    }

    fn record_exists(&self, id: StockRecordId) -> bool {
        self.staged.records.values().any(|r| r.record_id() == id)
            || self.guard.record_key(id).is_some()
    }
}

impl StockTx for InMemoryTx<'_> {
    fn lock_record(&mut self, key: &StockKey) -> Result<Option<StockRecord>, StoreError> {
        Ok(self.current_record(key).cloned())
    }

    fn lock_or_create_record(
        &mut self,
        key: &StockKey,
        at: DateTime<Utc>,
    ) -> Result<StockRecord, StoreError> {
        if let Some(existing) = self.current_record(key) {
            return Ok(existing.clone());
        }

        let record = StockRecord::open(StockRecordId::new(AggregateId::new()), key.clone(), at);
        self.staged.records.insert(key.clone(), record.clone());
        Ok(record)
    }

    fn save_record(
        &mut self,
        record: &StockRecord,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let current = self
            .current_record(record.key())
            .ok_or_else(|| StoreError::NotFound(format!("stock record {}", record.key())))?;

        if current.record_id() != record.record_id() {
            return Err(StoreError::Conflict(format!(
                "stock record {} has a different id",
                record.key()
            )));
        }
        if !expected.matches(current.version()) {
            return Err(StoreError::Conflict(format!(
                "stock record {}: expected {expected:?}, found {}",
                record.key(),
                current.version()
            )));
        }

        self.staged
            .records
            .insert(record.key().clone(), record.clone());
        Ok(())
    }

    fn append_movement(&mut self, movement: NewMovement) -> Result<MovementEntry, StoreError> {
        if !self.record_exists(movement.stock_record_id) {
            return Err(StoreError::NotFound(format!(
                "stock record {} for movement",
                movement.stock_record_id
            )));
        }

        let id = (self.guard.movements.len() + self.staged.movements.len()) as i64 + 1;
        let entry = movement.into_entry(id);
        self.staged.movements.push(entry.clone());
        Ok(entry)
    }

    fn claim_receipt(
        &mut self,
        purchase_id: PurchaseId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        if self.guard.receipts.contains_key(&purchase_id)
            || self.staged.receipts.contains_key(&purchase_id)
        {
            return Ok(false);
        }
        self.staged.receipts.insert(purchase_id, at);
        Ok(true)
    }

    fn lock_payable(&mut self, purchase_id: PurchaseId) -> Result<Option<Payable>, StoreError> {
        Ok(self.current_payable(purchase_id).cloned())
    }

    fn insert_payable(&mut self, payable: &Payable) -> Result<(), StoreError> {
        if self.current_payable(payable.purchase_id()).is_some() {
            return Err(StoreError::Conflict(format!(
                "purchase {} already has a payable",
                payable.purchase_id()
            )));
        }
        self.staged
            .payables
            .insert(payable.purchase_id(), payable.clone());
        Ok(())
    }

    fn save_payable(
        &mut self,
        payable: &Payable,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let current = self
            .current_payable(payable.purchase_id())
            .ok_or_else(|| StoreError::NotFound(format!("payable {}", payable.payable_id())))?;

        if !expected.matches(current.version()) {
            return Err(StoreError::Conflict(format!(
                "payable {}: expected {expected:?}, found {}",
                payable.payable_id(),
                current.version()
            )));
        }

        self.staged
            .payables
            .insert(payable.purchase_id(), payable.clone());
        Ok(())
    }

    fn claim_quote(&mut self, quote_id: QuoteId, at: DateTime<Utc>) -> Result<bool, StoreError> {
        if self.quote_claimed(quote_id) {
            return Ok(false);
        }
        self.staged.quote_claims.insert(quote_id, Some(at));
        Ok(true)
    }

    fn release_quote_claim(&mut self, quote_id: QuoteId) -> Result<(), StoreError> {
        self.staged.quote_claims.insert(quote_id, None);
        Ok(())
    }

    fn lock_reservations(&mut self, quote_id: QuoteId) -> Result<Vec<QuoteReservation>, StoreError> {
        let mut merged: BTreeMap<ReservationKey, QuoteReservation> =
            of_quote(&self.guard.reservations, quote_id)
                .map(|(k, r)| (*k, r.clone()))
                .collect();
        for (k, r) in of_quote(&self.staged.reservations, quote_id) {
            merged.insert(*k, r.clone());
        }
        Ok(merged.into_values().collect())
    }

    fn insert_reservation(&mut self, reservation: &QuoteReservation) -> Result<(), StoreError> {
        let key = reservation_key(reservation);
        if self.current_reservation(&key).is_some() {
            return Err(StoreError::Conflict(format!(
                "quote {} line {} already reserves stock record {}",
                reservation.quote_id, reservation.line_no, reservation.stock_record_id
            )));
        }
        self.staged.reservations.insert(key, reservation.clone());
        Ok(())
    }

    fn save_reservation(&mut self, reservation: &QuoteReservation) -> Result<(), StoreError> {
        let key = reservation_key(reservation);
        if self.current_reservation(&key).is_none() {
            return Err(StoreError::NotFound(format!(
                "reservation of quote {} line {} on stock record {}",
                reservation.quote_id, reservation.line_no, reservation.stock_record_id
            )));
        }
        self.staged.reservations.insert(key, reservation.clone());
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let InMemoryTx { mut guard, staged } = *self;

        guard.records.extend(staged.records);
        guard.movements.extend(staged.movements);
        guard.receipts.extend(staged.receipts);
        guard.payables.extend(staged.payables);
        for (quote_id, claim) in staged.quote_claims {
            match claim {
                Some(at) => guard.quote_claims.insert(quote_id, at),
                None => guard.quote_claims.remove(&quote_id),
            };
        }
        guard.reservations.extend(staged.reservations);
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
