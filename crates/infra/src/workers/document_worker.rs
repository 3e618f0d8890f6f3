use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info, warn};

use stockledger_events::{EventBus, EventEnvelope, Subscription};

use crate::dispatcher::DocumentEvent;
use crate::error::LedgerError;

/// Handler failures that may go away when the same delivery is handled again.
pub trait TransientFailure {
    fn is_transient(&self) -> bool;
}

impl TransientFailure for LedgerError {
    fn is_transient(&self) -> bool {
        LedgerError::is_transient(self)
    }
}

/// How often a transiently failing delivery is handled again before the
/// worker gives up on it. The delay doubles per attempt up to `max_backoff_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(
            self.initial_backoff_ms
                .saturating_mul(factor)
                .min(self.max_backoff_ms),
        )
    }
}

/// Handle to stop and join a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Ask the worker to stop and wait until it has.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Thread that drains a bus subscription of document events.
///
/// Delivery is at-least-once: the handler must be idempotent. A transient
/// failure is retried with backoff per [`RetryPolicy`]; any other failure,
/// or one that outlives its retries, is logged and the loop moves on.
#[derive(Debug)]
pub struct DocumentEventWorker;

impl DocumentEventWorker {
    pub fn spawn<B, H, T, E>(
        name: &'static str,
        bus: &B,
        retry: RetryPolicy,
        mut handler: H,
    ) -> io::Result<WorkerHandle>
    where
        B: EventBus<EventEnvelope<DocumentEvent>> + ?Sized,
        H: FnMut(EventEnvelope<DocumentEvent>) -> Result<T, E> + Send + 'static,
        E: core::fmt::Display + TransientFailure,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub = bus.subscribe();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(name, sub, shutdown_rx, retry, &mut handler))?;

        info!(worker = name, "document event worker started");
        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

enum Delivery {
    Done,
    Shutdown,
}

fn run<H, T, E>(
    name: &'static str,
    sub: Subscription<EventEnvelope<DocumentEvent>>,
    shutdown_rx: mpsc::Receiver<()>,
    retry: RetryPolicy,
    handler: &mut H,
) where
    H: FnMut(EventEnvelope<DocumentEvent>) -> Result<T, E>,
    E: core::fmt::Display + TransientFailure,
{
    let tick = Duration::from_millis(250);

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match sub.recv_timeout(tick) {
            Ok(envelope) => {
                if let Delivery::Shutdown = deliver(name, envelope, &shutdown_rx, retry, handler) {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    info!(worker = name, "document event worker stopped");
}

fn deliver<H, T, E>(
    name: &'static str,
    envelope: EventEnvelope<DocumentEvent>,
    shutdown_rx: &mpsc::Receiver<()>,
    retry: RetryPolicy,
    handler: &mut H,
) -> Delivery
where
    H: FnMut(EventEnvelope<DocumentEvent>) -> Result<T, E>,
    E: core::fmt::Display + TransientFailure,
{
    let event_id = envelope.event_id();
    let mut attempt = 0;

    loop {
        let err = match handler(envelope.clone()) {
            Ok(_) => {
                if attempt > 0 {
                    info!(worker = name, %event_id, retries = attempt, "document event handled after retry");
                }
                return Delivery::Done;
            }
            Err(err) => err,
        };

        if !err.is_transient() {
            warn!(worker = name, %event_id, error = %err, "document event handler failed");
            return Delivery::Done;
        }
        if attempt >= retry.max_retries {
            error!(worker = name, %event_id, retries = attempt, error = %err, "document event dropped after retries");
            return Delivery::Done;
        }

        attempt += 1;
        let delay = retry.backoff(attempt);
        warn!(worker = name, %event_id, attempt, ?delay, error = %err, "transient handler failure; retrying");
        // Sleep on the shutdown channel so a stop request cuts the backoff short.
        match shutdown_rx.recv_timeout(delay) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return Delivery::Shutdown,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }
}
