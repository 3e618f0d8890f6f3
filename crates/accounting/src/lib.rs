//! Accounts-payable module: obligations raised by received credit purchases.
//!
//! Pure domain logic only: no IO, no persistence concerns.

pub mod payable;

pub use payable::{Payable, PayableCommand, PayableEvent, PayableId, PayableStatus, PaymentTerms};
