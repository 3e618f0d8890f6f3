use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockledger_core::{Aggregate, AggregateRoot};
use stockledger_events::Event;

use crate::ids::{ProductId, StockRecordId, WarehouseId};
use crate::movement::MovementKind;

/// Lot (batch) label. The empty string means "unlotted".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Lot(String);

impl Lot {
    pub fn new(label: impl AsRef<str>) -> Self {
        Self(label.as_ref().trim().to_string())
    }

    pub fn unlotted() -> Self {
        Self(String::new())
    }

    pub fn is_unlotted(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<Option<String>> for Lot {
    fn from(value: Option<String>) -> Self {
        value.map(Lot::new).unwrap_or_default()
    }
}

impl core::fmt::Display for Lot {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.is_unlotted() {
            f.write_str("<unlotted>")
        } else {
            f.write_str(&self.0)
        }
    }
}

/// Identity of a stock record: one per (product, warehouse, lot).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockKey {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub lot: Lot,
}

impl StockKey {
    pub fn new(product_id: ProductId, warehouse_id: WarehouseId, lot: Lot) -> Self {
        Self {
            product_id,
            warehouse_id,
            lot,
        }
    }
}

impl core::fmt::Display for StockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}@{}/{}", self.product_id, self.warehouse_id, self.lot)
    }
}

/// Stock rule violations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StockError {
    #[error("quantity must be positive (got {quantity})")]
    InvalidQuantity { quantity: i64 },

    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i64, available: i64 },

    #[error("reservation inconsistency: {0}")]
    ReservationInconsistency(String),

    #[error("receiving {quantity} onto {on_hand} on hand overflows the counter")]
    QuantityOverflow { on_hand: i64, quantity: i64 },
}

/// Aggregate root: one stock record.
///
/// Invariant: `0 <= reserved <= quantity` at all times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    id: StockRecordId,
    key: StockKey,
    quantity: i64,
    reserved: i64,
    expiration_date: Option<NaiveDate>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: u64,
}

impl StockRecord {
    /// A freshly created, empty record (first receipt for its key).
    pub fn open(id: StockRecordId, key: StockKey, at: DateTime<Utc>) -> Self {
        Self {
            id,
            key,
            quantity: 0,
            reserved: 0,
            expiration_date: None,
            created_at: at,
            updated_at: at,
            version: 0,
        }
    }

    /// Rebuild a record loaded from storage, refusing rows that break the invariant.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: StockRecordId,
        key: StockKey,
        quantity: i64,
        reserved: i64,
        expiration_date: Option<NaiveDate>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        version: u64,
    ) -> Result<Self, StockError> {
        if reserved < 0 || reserved > quantity {
            return Err(StockError::ReservationInconsistency(format!(
                "stored record {id} has quantity={quantity}, reserved={reserved}"
            )));
        }
        Ok(Self {
            id,
            key,
            quantity,
            reserved,
            expiration_date,
            created_at,
            updated_at,
            version,
        })
    }

    pub fn record_id(&self) -> StockRecordId {
        self.id
    }

    pub fn key(&self) -> &StockKey {
        &self.key
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn reserved(&self) -> i64 {
        self.reserved
    }

    pub fn available(&self) -> i64 {
        self.quantity - self.reserved
    }

    pub fn expiration_date(&self) -> Option<NaiveDate> {
        self.expiration_date
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiration_date.is_some_and(|d| d < today)
    }

    /// Not yet expired, but expiring on or before `today + days`.
    pub fn expires_within(&self, today: NaiveDate, days: i64) -> bool {
        match self.expiration_date {
            Some(d) => d >= today && d <= today + chrono::Duration::days(days),
            None => false,
        }
    }
}

/// First-expired-first-out ordering: dated lots by expiry, undated lots last,
/// ties broken by arrival.
pub fn sort_fefo(records: &mut [StockRecord]) {
    records.sort_by(|a, b| {
        let a_exp = (a.expiration_date.is_none(), a.expiration_date);
        let b_exp = (b.expiration_date.is_none(), b.expiration_date);
        a_exp
            .cmp(&b_exp)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}

impl AggregateRoot for StockRecord {
    type Id = StockRecordId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Operations the ledger can perform on a single stock record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockCommand {
    Increase {
        quantity: i64,
        expiration_date: Option<NaiveDate>,
        occurred_at: DateTime<Utc>,
    },
    Reserve {
        quantity: i64,
        occurred_at: DateTime<Utc>,
    },
    Release {
        quantity: i64,
        occurred_at: DateTime<Utc>,
    },
    Consume {
        quantity: i64,
        occurred_at: DateTime<Utc>,
    },
    /// Set the on-hand quantity to a physically counted value.
    AdjustTo {
        counted: i64,
        occurred_at: DateTime<Utc>,
    },
}

/// A decided change to one stock record; each becomes exactly one ledger movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockChange {
    Received {
        quantity: i64,
        expiration_date: Option<NaiveDate>,
        occurred_at: DateTime<Utc>,
    },
    Reserved {
        quantity: i64,
        occurred_at: DateTime<Utc>,
    },
    Released {
        quantity: i64,
        occurred_at: DateTime<Utc>,
    },
    Consumed {
        quantity: i64,
        occurred_at: DateTime<Utc>,
    },
    Adjusted {
        delta: i64,
        occurred_at: DateTime<Utc>,
    },
}

impl StockChange {
    pub fn kind(&self) -> MovementKind {
        match self {
            StockChange::Received { .. } => MovementKind::Receipt,
            StockChange::Reserved { .. } => MovementKind::Reserve,
            StockChange::Released { .. } => MovementKind::Release,
            StockChange::Consumed { .. } => MovementKind::Consume,
            StockChange::Adjusted { .. } => MovementKind::Adjustment,
        }
    }

    /// Signed change on the counter this kind moves (see [`MovementKind`]).
    pub fn delta(&self) -> i64 {
        match self {
            StockChange::Received { quantity, .. } => *quantity,
            StockChange::Reserved { quantity, .. } => *quantity,
            StockChange::Released { quantity, .. } => -*quantity,
            StockChange::Consumed { quantity, .. } => -*quantity,
            StockChange::Adjusted { delta, .. } => *delta,
        }
    }
}

impl Event for StockChange {
    fn event_type(&self) -> &'static str {
        match self {
            StockChange::Received { .. } => "inventory.stock.received",
            StockChange::Reserved { .. } => "inventory.stock.reserved",
            StockChange::Released { .. } => "inventory.stock.released",
            StockChange::Consumed { .. } => "inventory.stock.consumed",
            StockChange::Adjusted { .. } => "inventory.stock.adjusted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockChange::Received { occurred_at, .. }
            | StockChange::Reserved { occurred_at, .. }
            | StockChange::Released { occurred_at, .. }
            | StockChange::Consumed { occurred_at, .. }
            | StockChange::Adjusted { occurred_at, .. } => *occurred_at,
        }
    }
}

impl Aggregate for StockRecord {
    type Command = StockCommand;
    type Event = StockChange;
    type Error = StockError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            StockChange::Received {
                quantity,
                expiration_date,
                ..
            } => {
                self.quantity += quantity;
                if expiration_date.is_some() {
                    self.expiration_date = *expiration_date;
                }
            }
            StockChange::Reserved { quantity, .. } => {
                self.reserved += quantity;
            }
            StockChange::Released { quantity, .. } => {
                self.reserved -= quantity;
            }
            StockChange::Consumed { quantity, .. } => {
                self.quantity -= quantity;
                self.reserved -= quantity;
            }
            StockChange::Adjusted { delta, .. } => {
                self.quantity += delta;
            }
        }

        self.updated_at = event.occurred_at();
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            StockCommand::Increase {
                quantity,
                expiration_date,
                occurred_at,
            } => {
                ensure_positive(*quantity)?;
                if self.quantity.checked_add(*quantity).is_none() {
                    return Err(StockError::QuantityOverflow {
                        on_hand: self.quantity,
                        quantity: *quantity,
                    });
                }
                Ok(vec![StockChange::Received {
                    quantity: *quantity,
                    expiration_date: *expiration_date,
                    occurred_at: *occurred_at,
                }])
            }
            StockCommand::Reserve {
                quantity,
                occurred_at,
            } => {
                ensure_positive(*quantity)?;
                if self.available() < *quantity {
                    return Err(StockError::InsufficientStock {
                        requested: *quantity,
                        available: self.available(),
                    });
                }
                Ok(vec![StockChange::Reserved {
                    quantity: *quantity,
                    occurred_at: *occurred_at,
                }])
            }
            StockCommand::Release {
                quantity,
                occurred_at,
            } => {
                ensure_positive(*quantity)?;
                // Clamped: releasing more than is reserved releases what is there.
                let effective = (*quantity).min(self.reserved);
                if effective == 0 {
                    return Ok(vec![]);
                }
                Ok(vec![StockChange::Released {
                    quantity: effective,
                    occurred_at: *occurred_at,
                }])
            }
            StockCommand::Consume {
                quantity,
                occurred_at,
            } => {
                ensure_positive(*quantity)?;
                if self.reserved < *quantity {
                    return Err(StockError::ReservationInconsistency(format!(
                        "cannot consume {quantity} from {}: only {} reserved",
                        self.key, self.reserved
                    )));
                }
                Ok(vec![StockChange::Consumed {
                    quantity: *quantity,
                    occurred_at: *occurred_at,
                }])
            }
            StockCommand::AdjustTo {
                counted,
                occurred_at,
            } => {
                if *counted < 0 {
                    return Err(StockError::InvalidQuantity { quantity: *counted });
                }
                // Both sides are non-negative, so the difference cannot overflow.
                let delta = counted - self.quantity;
                if delta == 0 {
                    return Err(StockError::InvalidQuantity { quantity: 0 });
                }
                if *counted < self.reserved {
                    return Err(StockError::ReservationInconsistency(format!(
                        "cannot adjust {} to {counted}: {} units are reserved",
                        self.key, self.reserved
                    )));
                }
                Ok(vec![StockChange::Adjusted {
                    delta,
                    occurred_at: *occurred_at,
                }])
            }
        }
    }
}

fn ensure_positive(quantity: i64) -> Result<(), StockError> {
    if quantity <= 0 {
        return Err(StockError::InvalidQuantity { quantity });
    }
    Ok(())
}
