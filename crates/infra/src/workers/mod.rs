//! Background consumers of the document event bus.

pub mod document_worker;

pub use document_worker::{DocumentEventWorker, RetryPolicy, TransientFailure, WorkerHandle};
