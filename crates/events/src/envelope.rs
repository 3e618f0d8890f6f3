use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockledger_core::AggregateId;

use crate::Event;

/// Envelope for an event travelling over a bus.
///
/// Notes:
/// - `event_id` is unique per delivery attempt *source*, so redelivery of the
///   same envelope keeps the same id.
/// - `document_id` identifies the purchase/quote document the event is about.
/// - `payload` is the typed domain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    event_type: String,
    document_id: AggregateId,
    occurred_at: DateTime<Utc>,
    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        event_type: impl Into<String>,
        document_id: AggregateId,
        occurred_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            event_type: event_type.into(),
            document_id,
            occurred_at,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn document_id(&self) -> AggregateId {
        self.document_id
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}

impl<E: Event> EventEnvelope<E> {
    /// Wrap a typed event, taking type name and business time from the event itself.
    pub fn wrap(document_id: AggregateId, event: E) -> Self {
        Self::new(
            Uuid::now_v7(),
            event.event_type(),
            document_id,
            event.occurred_at(),
            event,
        )
    }
}
