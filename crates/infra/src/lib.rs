//! Infrastructure layer of the stock engine: storage, transactions and the
//! services that turn document events into stock changes.
//!
//! ```text
//! DocumentEvent ─→ DocumentEventRouter ─┬─→ ReceivingPipeline ──────┐
//!                                      └─→ ReservationStateMachine ─┤
//!                                                                   ↓
//!                              StockLedger ─→ MovementRecorder ─→ StockStore
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod ledger;
pub mod payables;
pub mod receiving;
pub mod recorder;
pub mod reservations;
pub mod store;
pub mod workers;

#[cfg(test)]
mod integration_tests;

pub use config::{DatabaseConfig, LedgerConfig};
pub use dispatcher::{DispatchOutcome, DocumentEvent, DocumentEventRouter};
pub use error::LedgerError;
pub use ledger::{LedgerContext, LowStock, Reconciliation, StockLedger, in_transaction};
pub use payables::PayableTracker;
pub use receiving::{
    FixedWarehouseResolver, PreferredNameResolver, ReceiptOutcome, ReceivingPipeline,
    ReceivingPolicy, WarehouseResolver,
};
pub use recorder::MovementRecorder;
pub use reservations::{
    Allocation, FefoSourceResolver, ReservationOutcome, ReservationSourceResolver,
    ReservationStateMachine,
};
pub use store::{InMemoryStockStore, PostgresStockStore, StockStore, StockTx, StoreError};
pub use workers::{DocumentEventWorker, RetryPolicy, TransientFailure, WorkerHandle};
