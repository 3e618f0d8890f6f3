//! Document events and the mechanics used to deliver them.
//!
//! Business crates define their own typed events (purchase received, quote
//! status changed, ...) and implement [`Event`] for them. Delivery happens
//! through an [`EventBus`]; there is no implicit diffing of document state.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::execute;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
