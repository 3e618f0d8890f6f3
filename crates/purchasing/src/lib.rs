//! Purchasing domain module: purchase documents as observed by the stock engine.
//!
//! Purchase documents are owned by the document-management layer; this crate
//! only models the snapshot it hands over when a purchase is received, already
//! typed (no string status or payment codes).

pub mod document;
pub mod events;

pub use document::{PaymentType, PurchaseDocument, PurchaseId, PurchaseLine, PurchaseStatus};
pub use events::PurchaseReceived;
