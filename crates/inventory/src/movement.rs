//! The movement ledger: an append-only trail of every stock change.
//!
//! Deltas are signed and always expressed on the counter the movement kind moves:
//!
//! | kind         | `quantity` delta | `reserved` delta |
//! |--------------|------------------|------------------|
//! | `Receipt`    | `+q`             | 0                |
//! | `Reserve`    | 0                | `+q`             |
//! | `Release`    | 0                | `-q`             |
//! | `Consume`    | `-q`             | `-q`             |
//! | `Adjustment` | `counted - old`  | 0                |
//!
//! Replaying a record's movements in order reproduces its current counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{ActorId, AggregateId, DomainError};

use crate::ids::StockRecordId;
use crate::stock::{StockChange, StockRecord};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementKind {
    Receipt,
    Reserve,
    Release,
    Consume,
    Adjustment,
}

impl MovementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MovementKind::Receipt => "RECEIPT",
            MovementKind::Reserve => "RESERVE",
            MovementKind::Release => "RELEASE",
            MovementKind::Consume => "CONSUME",
            MovementKind::Adjustment => "ADJUSTMENT",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "RECEIPT" => Ok(MovementKind::Receipt),
            "RESERVE" => Ok(MovementKind::Reserve),
            "RELEASE" => Ok(MovementKind::Release),
            "CONSUME" => Ok(MovementKind::Consume),
            "ADJUSTMENT" => Ok(MovementKind::Adjustment),
            other => Err(DomainError::validation(format!(
                "unknown movement kind: {other}"
            ))),
        }
    }
}

impl core::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Document a movement originated from (purchase, quote, manual count...).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MovementReference {
    pub document_id: Option<AggregateId>,
    pub document_number: String,
}

impl MovementReference {
    pub fn document(document_id: AggregateId, document_number: impl Into<String>) -> Self {
        Self {
            document_id: Some(document_id),
            document_number: document_number.into(),
        }
    }

    /// A reference with only a free-text description (e.g. "physical count").
    pub fn note(description: impl Into<String>) -> Self {
        Self {
            document_id: None,
            document_number: description.into(),
        }
    }
}

/// A movement about to be appended; the store assigns the sequence id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMovement {
    pub stock_record_id: StockRecordId,
    pub kind: MovementKind,
    pub delta: i64,
    pub quantity_before: i64,
    pub quantity_after: i64,
    pub reserved_before: i64,
    pub reserved_after: i64,
    pub reference: MovementReference,
    pub actor: ActorId,
    pub recorded_at: DateTime<Utc>,
}

impl NewMovement {
    /// Describe `change` as applied to a record going from `before` to `after`.
    pub fn from_change(
        before: &StockRecord,
        after: &StockRecord,
        change: &StockChange,
        reference: MovementReference,
        actor: ActorId,
    ) -> Self {
        use stockledger_events::Event;

        Self {
            stock_record_id: after.record_id(),
            kind: change.kind(),
            delta: change.delta(),
            quantity_before: before.quantity(),
            quantity_after: after.quantity(),
            reserved_before: before.reserved(),
            reserved_after: after.reserved(),
            reference,
            actor,
            recorded_at: change.occurred_at(),
        }
    }

    pub fn into_entry(self, id: i64) -> MovementEntry {
        MovementEntry {
            id,
            stock_record_id: self.stock_record_id,
            kind: self.kind,
            delta: self.delta,
            quantity_before: self.quantity_before,
            quantity_after: self.quantity_after,
            reserved_before: self.reserved_before,
            reserved_after: self.reserved_after,
            reference: self.reference,
            actor: self.actor,
            recorded_at: self.recorded_at,
        }
    }
}

/// A persisted ledger row. `id` is a store-assigned, strictly increasing sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementEntry {
    pub id: i64,
    pub stock_record_id: StockRecordId,
    pub kind: MovementKind,
    pub delta: i64,
    pub quantity_before: i64,
    pub quantity_after: i64,
    pub reserved_before: i64,
    pub reserved_after: i64,
    pub reference: MovementReference,
    pub actor: ActorId,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerBalance {
    pub quantity: i64,
    pub reserved: i64,
}

/// Fold movements (in sequence order) into the counters they imply.
pub fn replay(entries: &[MovementEntry]) -> LedgerBalance {
    entries
        .iter()
        .fold(LedgerBalance::default(), |mut acc, entry| {
            match entry.kind {
                MovementKind::Receipt | MovementKind::Adjustment => acc.quantity += entry.delta,
                MovementKind::Reserve | MovementKind::Release => acc.reserved += entry.delta,
                MovementKind::Consume => {
                    acc.quantity += entry.delta;
                    acc.reserved += entry.delta;
                }
            }
            acc
        })
}
