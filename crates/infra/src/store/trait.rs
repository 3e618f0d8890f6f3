use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use stockledger_accounting::Payable;
use stockledger_core::ExpectedVersion;
use stockledger_inventory::{
    MovementEntry, NewMovement, ProductId, StockKey, StockRecord, StockRecordId, Warehouse,
};
use stockledger_purchasing::PurchaseId;
use stockledger_sales::{QuoteId, QuoteReservation};

/// Storage operation error.
///
/// These are infrastructure failures as opposed to stock rule violations:
///
/// - **Conflict**: a version check or uniqueness constraint failed
/// - **NotFound**: a row the caller expected to exist is missing
/// - **Backend**: connection loss, lock timeout, any other driver failure
/// - **Poisoned**: an in-memory lock was poisoned by a panicking writer
/// - **Serialization**: a stored row could not be mapped back to a domain value
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage conflict: {0}")]
    Conflict(String),

    #[error("row not found: {0}")]
    NotFound(String),

    #[error("storage backend failure: {0}")]
    Backend(String),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("stored value could not be decoded: {0}")]
    Serialization(String),
}

/// Read side of the store plus the entry point for transactions.
///
/// Reads outside a transaction see committed state only and take no locks.
/// Callers must not call these while holding a [`StockTx`] from the same
/// store: implementations are allowed to serialize transactions with a lock
/// the reads also need.
pub trait StockStore: Send + Sync {
    /// Start a unit of work.
    fn begin(&self) -> Result<Box<dyn StockTx + '_>, StoreError>;

    fn record(&self, key: &StockKey) -> Result<Option<StockRecord>, StoreError>;

    fn record_by_id(&self, id: StockRecordId) -> Result<Option<StockRecord>, StoreError>;

    fn records_for_product(&self, product_id: ProductId) -> Result<Vec<StockRecord>, StoreError>;

    fn all_records(&self) -> Result<Vec<StockRecord>, StoreError>;

    /// Movements of one record in sequence order.
    fn movements(&self, stock_record_id: StockRecordId) -> Result<Vec<MovementEntry>, StoreError>;

    /// Warehouses in registration order.
    fn warehouses(&self) -> Result<Vec<Warehouse>, StoreError>;

    fn register_warehouse(&self, warehouse: &Warehouse) -> Result<(), StoreError>;

    fn payable_for_purchase(&self, purchase_id: PurchaseId) -> Result<Option<Payable>, StoreError>;

    fn payables(&self) -> Result<Vec<Payable>, StoreError>;

    /// Reservation rows of one quote, ordered by line number.
    fn reservations_for_quote(&self, quote_id: QuoteId) -> Result<Vec<QuoteReservation>, StoreError>;
}

/// A unit of work. Dropping it without `commit` discards every change.
pub trait StockTx {
    /// Load and lock the record for `key`, if it exists.
    fn lock_record(&mut self, key: &StockKey) -> Result<Option<StockRecord>, StoreError>;

    /// Load and lock the record for `key`, creating an empty one first if needed.
    fn lock_or_create_record(
        &mut self,
        key: &StockKey,
        at: DateTime<Utc>,
    ) -> Result<StockRecord, StoreError>;

    /// Write back a record previously locked in this transaction.
    fn save_record(
        &mut self,
        record: &StockRecord,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError>;

    /// Append one ledger row; the store assigns its sequence id.
    fn append_movement(&mut self, movement: NewMovement) -> Result<MovementEntry, StoreError>;

    /// Insert the receipt guard for `purchase_id`. `false` when it already exists.
    fn claim_receipt(&mut self, purchase_id: PurchaseId, at: DateTime<Utc>)
    -> Result<bool, StoreError>;

    fn lock_payable(&mut self, purchase_id: PurchaseId) -> Result<Option<Payable>, StoreError>;

    /// Insert a new payable. Fails with `Conflict` if the purchase already has one.
    fn insert_payable(&mut self, payable: &Payable) -> Result<(), StoreError>;

    fn save_payable(&mut self, payable: &Payable, expected: ExpectedVersion)
    -> Result<(), StoreError>;

    /// Insert the reservation claim for `quote_id`. `false` when the quote was
    /// already claimed, committed or not.
    fn claim_quote(&mut self, quote_id: QuoteId, at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Drop the claim so the quote can be reserved again.
    fn release_quote_claim(&mut self, quote_id: QuoteId) -> Result<(), StoreError>;

    /// Load and lock the reservation rows of one quote, ordered by line number.
    fn lock_reservations(&mut self, quote_id: QuoteId) -> Result<Vec<QuoteReservation>, StoreError>;

    /// Insert a new row. Fails with `Conflict` if `(quote_id, line_no,
    /// stock_record_id)` already exists.
    fn insert_reservation(&mut self, reservation: &QuoteReservation) -> Result<(), StoreError>;

    /// Update an existing row. Fails with `NotFound` if it was never inserted.
    fn save_reservation(&mut self, reservation: &QuoteReservation) -> Result<(), StoreError>;

    fn commit(self: Box<Self>) -> Result<(), StoreError>;

    fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

impl<S> StockStore for Arc<S>
where
    S: StockStore + ?Sized,
{
    fn begin(&self) -> Result<Box<dyn StockTx + '_>, StoreError> {
        (**self).begin()
    }

    fn record(&self, key: &StockKey) -> Result<Option<StockRecord>, StoreError> {
        (**self).record(key)
    }

    fn record_by_id(&self, id: StockRecordId) -> Result<Option<StockRecord>, StoreError> {
        (**self).record_by_id(id)
    }

    fn records_for_product(&self, product_id: ProductId) -> Result<Vec<StockRecord>, StoreError> {
        (**self).records_for_product(product_id)
    }

    fn all_records(&self) -> Result<Vec<StockRecord>, StoreError> {
        (**self).all_records()
    }

    fn movements(&self, stock_record_id: StockRecordId) -> Result<Vec<MovementEntry>, StoreError> {
        (**self).movements(stock_record_id)
    }

    fn warehouses(&self) -> Result<Vec<Warehouse>, StoreError> {
        (**self).warehouses()
    }

    fn register_warehouse(&self, warehouse: &Warehouse) -> Result<(), StoreError> {
        (**self).register_warehouse(warehouse)
    }

    fn payable_for_purchase(&self, purchase_id: PurchaseId) -> Result<Option<Payable>, StoreError> {
        (**self).payable_for_purchase(purchase_id)
    }

    fn payables(&self) -> Result<Vec<Payable>, StoreError> {
        (**self).payables()
    }

    fn reservations_for_quote(&self, quote_id: QuoteId) -> Result<Vec<QuoteReservation>, StoreError> {
        (**self).reservations_for_quote(quote_id)
    }
}
