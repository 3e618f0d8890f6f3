use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::ActorId;
use stockledger_events::Event;

use crate::quote::{QuoteDocument, QuoteStatus};

/// A quote was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteCreated {
    pub quote: QuoteDocument,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// A quote moved from `old_status` to `new_status`. `quote` reflects the new state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteStatusChanged {
    pub quote: QuoteDocument,
    pub old_status: QuoteStatus,
    pub new_status: QuoteStatus,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// A quote was permanently deleted, whatever its status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteDeleted {
    pub quote: QuoteDocument,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

impl Event for QuoteCreated {
    fn event_type(&self) -> &'static str {
        "sales.quote.created"
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

impl Event for QuoteStatusChanged {
    fn event_type(&self) -> &'static str {
        "sales.quote.status_changed"
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

impl Event for QuoteDeleted {
    fn event_type(&self) -> &'static str {
        "sales.quote.deleted"
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}
