//! Storage boundary for stock records, the movement ledger and the rows the
//! pipelines maintain alongside them (receipt guards, payables, quote
//! reservations).
//!
//! Every mutation goes through a [`StockTx`]: a unit of work that locks the
//! rows it reads for update and is either committed as a whole or rolled back.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryStockStore;
pub use postgres::PostgresStockStore;
pub use r#trait::{StockStore, StockTx, StoreError};
