use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use stockledger_core::{AggregateId, DomainError};
use stockledger_events::{Event, EventEnvelope};
use stockledger_purchasing::PurchaseReceived;
use stockledger_sales::{QuoteCreated, QuoteDeleted, QuoteStatusChanged};

use crate::error::LedgerError;
use crate::receiving::{ReceiptOutcome, ReceivingPipeline, WarehouseResolver};
use crate::reservations::{ReservationOutcome, ReservationSourceResolver, ReservationStateMachine};
use crate::store::StockStore;

/// Every document event the stock engine consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum DocumentEvent {
    PurchaseReceived(PurchaseReceived),
    QuoteCreated(QuoteCreated),
    QuoteStatusChanged(QuoteStatusChanged),
    QuoteDeleted(QuoteDeleted),
}

impl DocumentEvent {
    /// Id of the purchase or quote the event is about.
    pub fn document_id(&self) -> AggregateId {
        match self {
            DocumentEvent::PurchaseReceived(e) => e.document.id.0,
            DocumentEvent::QuoteCreated(e) => e.quote.id.0,
            DocumentEvent::QuoteStatusChanged(e) => e.quote.id.0,
            DocumentEvent::QuoteDeleted(e) => e.quote.id.0,
        }
    }

    /// Wrap for publishing on a bus.
    pub fn into_envelope(self) -> EventEnvelope<DocumentEvent> {
        EventEnvelope::wrap(self.document_id(), self)
    }

    /// Decode an envelope whose payload arrived as untyped JSON, selecting the
    /// variant by the envelope's event type.
    pub fn from_json_envelope(
        envelope: &EventEnvelope<serde_json::Value>,
    ) -> Result<DocumentEvent, DomainError> {
        let payload = envelope.payload().clone();
        let decoded = match envelope.event_type() {
            PURCHASE_RECEIVED => serde_json::from_value::<PurchaseReceived>(payload).map(Into::into),
            QUOTE_CREATED => serde_json::from_value::<QuoteCreated>(payload).map(Into::into),
            QUOTE_STATUS_CHANGED => {
                serde_json::from_value::<QuoteStatusChanged>(payload).map(Into::into)
            }
            QUOTE_DELETED => serde_json::from_value::<QuoteDeleted>(payload).map(Into::into),
            other => {
                return Err(DomainError::validation(format!(
                    "unsupported document event type: {other}"
                )));
            }
        };
        decoded.map_err(|e| {
            DomainError::validation(format!(
                "malformed {} payload: {e}",
                envelope.event_type()
            ))
        })
    }
}

const PURCHASE_RECEIVED: &str = "purchasing.document.received";
const QUOTE_CREATED: &str = "sales.quote.created";
const QUOTE_STATUS_CHANGED: &str = "sales.quote.status_changed";
const QUOTE_DELETED: &str = "sales.quote.deleted";

impl Event for DocumentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DocumentEvent::PurchaseReceived(e) => e.event_type(),
            DocumentEvent::QuoteCreated(e) => e.event_type(),
            DocumentEvent::QuoteStatusChanged(e) => e.event_type(),
            DocumentEvent::QuoteDeleted(e) => e.event_type(),
        }
    }

    fn version(&self) -> u32 {
        match self {
            DocumentEvent::PurchaseReceived(e) => e.version(),
            DocumentEvent::QuoteCreated(e) => e.version(),
            DocumentEvent::QuoteStatusChanged(e) => e.version(),
            DocumentEvent::QuoteDeleted(e) => e.version(),
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            DocumentEvent::PurchaseReceived(e) => e.occurred_at,
            DocumentEvent::QuoteCreated(e) => e.occurred_at,
            DocumentEvent::QuoteStatusChanged(e) => e.occurred_at,
            DocumentEvent::QuoteDeleted(e) => e.occurred_at,
        }
    }
}

impl From<PurchaseReceived> for DocumentEvent {
    fn from(value: PurchaseReceived) -> Self {
        DocumentEvent::PurchaseReceived(value)
    }
}

impl From<QuoteCreated> for DocumentEvent {
    fn from(value: QuoteCreated) -> Self {
        DocumentEvent::QuoteCreated(value)
    }
}

impl From<QuoteStatusChanged> for DocumentEvent {
    fn from(value: QuoteStatusChanged) -> Self {
        DocumentEvent::QuoteStatusChanged(value)
    }
}

impl From<QuoteDeleted> for DocumentEvent {
    fn from(value: QuoteDeleted) -> Self {
        DocumentEvent::QuoteDeleted(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Receipt(ReceiptOutcome),
    Reservation(ReservationOutcome),
}

/// Sends each document event to the component that owns its stock effect.
#[derive(Debug, Clone)]
pub struct DocumentEventRouter<S, W, R> {
    receiving: ReceivingPipeline<S, W>,
    reservations: ReservationStateMachine<S, R>,
}

impl<S, W, R> DocumentEventRouter<S, W, R>
where
    S: StockStore,
    W: WarehouseResolver,
    R: ReservationSourceResolver,
{
    pub fn new(receiving: ReceivingPipeline<S, W>, reservations: ReservationStateMachine<S, R>) -> Self {
        Self {
            receiving,
            reservations,
        }
    }

    pub fn dispatch(&self, event: &DocumentEvent) -> Result<DispatchOutcome, LedgerError> {
        match event {
            DocumentEvent::PurchaseReceived(e) => self.receiving.receive(e).map(DispatchOutcome::Receipt),
            DocumentEvent::QuoteCreated(e) => {
                self.reservations.on_created(e).map(DispatchOutcome::Reservation)
            }
            DocumentEvent::QuoteStatusChanged(e) => self
                .reservations
                .on_status_changed(e)
                .map(DispatchOutcome::Reservation),
            DocumentEvent::QuoteDeleted(e) => {
                self.reservations.on_deleted(e).map(DispatchOutcome::Reservation)
            }
        }
    }

    /// Dispatch one bus delivery. Failures are logged with the envelope id so
    /// a redelivery can be correlated; handlers are idempotent, so replaying
    /// the same envelope is safe.
    pub fn handle_envelope(
        &self,
        envelope: EventEnvelope<DocumentEvent>,
    ) -> Result<DispatchOutcome, LedgerError> {
        debug!(
            event_id = %envelope.event_id(),
            event_type = envelope.event_type(),
            document = %envelope.document_id(),
            "dispatching document event"
        );
        self.dispatch(envelope.payload()).inspect_err(|err| {
            warn!(
                event_id = %envelope.event_id(),
                event_type = envelope.event_type(),
                transient = err.is_transient(),
                error = %err,
                "document event rejected"
            );
        })
    }
}
