use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::ActorId;
use stockledger_events::Event;

use crate::document::PurchaseDocument;

/// Raised by the document layer when a purchase transitions into `Received`.
///
/// Carries the full document so the receiving pipeline never has to query
/// further business rules. Redelivery of the same event is expected and safe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseReceived {
    pub document: PurchaseDocument,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

impl Event for PurchaseReceived {
    fn event_type(&self) -> &'static str {
        "purchasing.document.received"
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}
