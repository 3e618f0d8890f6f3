use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{Aggregate, AggregateId, AggregateRoot, DomainError};
use stockledger_events::Event;
use stockledger_purchasing::{PurchaseDocument, PurchaseId};

/// Payable identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayableId(pub AggregateId);

impl PayableId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PayableId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayableStatus {
    Pending,
    Partial,
    Paid,
    Cancelled,
}

impl PayableStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PayableStatus::Pending => "pending",
            PayableStatus::Partial => "partial",
            PayableStatus::Paid => "paid",
            PayableStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "pending" => Ok(PayableStatus::Pending),
            "partial" => Ok(PayableStatus::Partial),
            "paid" => Ok(PayableStatus::Paid),
            "cancelled" => Ok(PayableStatus::Cancelled),
            other => Err(DomainError::validation(format!(
                "unknown payable status: {other}"
            ))),
        }
    }

    pub fn is_open(self) -> bool {
        matches!(self, PayableStatus::Pending | PayableStatus::Partial)
    }
}

/// Supplier payment terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentTerms {
    pub due_in_days: i64,
}

impl Default for PaymentTerms {
    fn default() -> Self {
        Self { due_in_days: 30 }
    }
}

impl PaymentTerms {
    pub fn due_date(&self, document_date: NaiveDate) -> NaiveDate {
        document_date + Duration::days(self.due_in_days)
    }
}

/// Aggregate root: one accounts-payable obligation, at most one per purchase.
///
/// Amounts are in the smallest currency unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payable {
    id: PayableId,
    purchase_id: PurchaseId,
    original_amount: i64,
    remaining_balance: i64,
    due_date: NaiveDate,
    status: PayableStatus,
    created_at: DateTime<Utc>,
    version: u64,
}

impl Payable {
    /// Obligation for a received credit purchase: the full document total,
    /// due `terms.due_in_days` after the document date.
    pub fn for_credit_purchase(
        id: PayableId,
        document: &PurchaseDocument,
        terms: PaymentTerms,
        at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if !document.is_credit() {
            return Err(DomainError::validation(format!(
                "purchase {} is not a credit purchase",
                document.number
            )));
        }
        if document.total < 0 {
            return Err(DomainError::validation("payable amount cannot be negative"));
        }

        Ok(Self {
            id,
            purchase_id: document.id,
            original_amount: document.total,
            remaining_balance: document.total,
            due_date: terms.due_date(document.date),
            status: PayableStatus::Pending,
            created_at: at,
            version: 0,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: PayableId,
        purchase_id: PurchaseId,
        original_amount: i64,
        remaining_balance: i64,
        due_date: NaiveDate,
        status: PayableStatus,
        created_at: DateTime<Utc>,
        version: u64,
    ) -> Self {
        Self {
            id,
            purchase_id,
            original_amount,
            remaining_balance,
            due_date,
            status,
            created_at,
            version,
        }
    }

    pub fn payable_id(&self) -> PayableId {
        self.id
    }

    pub fn purchase_id(&self) -> PurchaseId {
        self.purchase_id
    }

    pub fn original_amount(&self) -> i64 {
        self.original_amount
    }

    pub fn remaining_balance(&self) -> i64 {
        self.remaining_balance
    }

    pub fn due_date(&self) -> NaiveDate {
        self.due_date
    }

    pub fn status(&self) -> PayableStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.status.is_open() && self.due_date < today
    }
}

impl AggregateRoot for Payable {
    type Id = PayableId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayableCommand {
    ApplyPayment {
        amount: i64,
        occurred_at: DateTime<Utc>,
    },
    Cancel {
        occurred_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayableEvent {
    PaymentApplied {
        amount: i64,
        remaining_balance: i64,
        occurred_at: DateTime<Utc>,
    },
    Cancelled {
        occurred_at: DateTime<Utc>,
    },
}

impl Event for PayableEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PayableEvent::PaymentApplied { .. } => "accounting.payable.payment_applied",
            PayableEvent::Cancelled { .. } => "accounting.payable.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PayableEvent::PaymentApplied { occurred_at, .. }
            | PayableEvent::Cancelled { occurred_at } => *occurred_at,
        }
    }
}

impl Aggregate for Payable {
    type Command = PayableCommand;
    type Event = PayableEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PayableEvent::PaymentApplied {
                remaining_balance, ..
            } => {
                self.remaining_balance = *remaining_balance;
                self.status = if *remaining_balance == 0 {
                    PayableStatus::Paid
                } else {
                    PayableStatus::Partial
                };
            }
            PayableEvent::Cancelled { .. } => {
                self.status = PayableStatus::Cancelled;
            }
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PayableCommand::ApplyPayment {
                amount,
                occurred_at,
            } => {
                if !self.status.is_open() {
                    return Err(DomainError::invariant(format!(
                        "payable {} is {} and accepts no payments",
                        self.id,
                        self.status.as_str()
                    )));
                }
                if *amount <= 0 {
                    return Err(DomainError::validation("payment amount must be positive"));
                }
                if *amount > self.remaining_balance {
                    return Err(DomainError::validation(format!(
                        "payment of {amount} exceeds remaining balance {}",
                        self.remaining_balance
                    )));
                }
                Ok(vec![PayableEvent::PaymentApplied {
                    amount: *amount,
                    remaining_balance: self.remaining_balance - amount,
                    occurred_at: *occurred_at,
                }])
            }
            PayableCommand::Cancel { occurred_at } => {
                if self.status != PayableStatus::Pending {
                    return Err(DomainError::invariant(
                        "only payables without payments can be cancelled",
                    ));
                }
                Ok(vec![PayableEvent::Cancelled {
                    occurred_at: *occurred_at,
                }])
            }
        }
    }
}
