use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use stockledger_core::{AggregateId, DomainError};
use stockledger_inventory::{Lot, ProductId};

/// Purchase document identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PurchaseId(pub AggregateId);

impl PurchaseId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PurchaseId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Purchase status lifecycle. Only the transition into `Received` matters to stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurchaseStatus {
    Draft,
    Received,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentType {
    Cash,
    Credit,
}

/// One received product line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseLine {
    pub line_no: u32,
    pub product_id: ProductId,
    pub quantity: i64,
    #[serde(default)]
    pub lot: Lot,
    #[serde(default)]
    pub expiration_date: Option<NaiveDate>,
}

/// Snapshot of a purchase document. `total` is in the smallest currency unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseDocument {
    pub id: PurchaseId,
    pub number: String,
    pub status: PurchaseStatus,
    pub payment_type: PaymentType,
    pub total: i64,
    pub date: NaiveDate,
    pub lines: Vec<PurchaseLine>,
}

impl PurchaseDocument {
    pub fn is_credit(&self) -> bool {
        self.payment_type == PaymentType::Credit
    }

    /// Structural checks run before any stock is touched.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.lines.is_empty() {
            return Err(DomainError::validation(format!(
                "purchase {} has no lines",
                self.number
            )));
        }

        if let Some(line) = self.lines.iter().find(|l| l.quantity <= 0) {
            return Err(DomainError::validation(format!(
                "purchase {} line {} has non-positive quantity {}",
                self.number, line.line_no, line.quantity
            )));
        }

        if self.total < 0 {
            return Err(DomainError::validation(format!(
                "purchase {} has negative total",
                self.number
            )));
        }

        Ok(())
    }
}
