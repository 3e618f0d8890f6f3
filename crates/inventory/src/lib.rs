//! Inventory domain module: stock records and the movement ledger.
//!
//! This crate contains business rules for on-hand/reserved stock, implemented
//! purely as deterministic domain logic (no IO, no storage). Persisting records
//! and movements atomically is the infra crate's job.

pub mod ids;
pub mod movement;
pub mod stock;
pub mod warehouse;

pub use ids::{ProductId, StockRecordId, WarehouseId};
pub use movement::{LedgerBalance, MovementEntry, MovementKind, MovementReference, NewMovement, replay};
pub use stock::{Lot, StockChange, StockCommand, StockError, StockKey, StockRecord, sort_fefo};
pub use warehouse::Warehouse;
