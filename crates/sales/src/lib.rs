//! Sales domain module: quote documents ("proformas"), the reservation action
//! each of their status transitions implies, and per-line reservation
//! bookkeeping.
//!
//! Pure domain logic; the stock side effects are carried out by the infra
//! crate's reservation state machine.

pub mod events;
pub mod quote;
pub mod reservation;

pub use events::{QuoteCreated, QuoteDeleted, QuoteStatusChanged};
pub use quote::{
    QuoteDocument, QuoteId, QuoteLine, QuoteSource, QuoteStatus, ReservationAction,
    action_on_created, action_on_transition,
};
pub use reservation::{QuoteReservation, ReservationPolicy, ReservationStatus};
