//! Event publishing/subscription abstraction (mechanics only).
//!
//! The bus distributes document events (purchase received, quote status
//! changed, ...) from the document-management layer to the stock engine.
//!
//! - **Transport-agnostic**: in-memory channels today, a broker later
//! - **At-least-once delivery**: events may arrive more than once; every
//!   consumer in this workspace is idempotent
//! - **No persistence**: the bus is for distribution, not storage

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

/// A subscription to an event stream.
///
/// Each subscription gets a copy of every event published after it was
/// created (broadcast semantics). Subscriptions are meant to be drained by a
/// single thread.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Domain-agnostic event bus (pub/sub abstraction).
///
/// ```text
/// Document subsystem → EventBus (publish) → DocumentEventWorker → ReceivingPipeline
///                                                             └─ ReservationStateMachine
/// ```
///
/// `publish()` can fail (bus closed, lock poisoned); failures are surfaced to
/// the publisher, which may retry. Retrying is safe because consumers are
/// idempotent.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
