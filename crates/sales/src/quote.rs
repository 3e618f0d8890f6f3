use serde::{Deserialize, Serialize};

use stockledger_core::{AggregateId, DomainError};
use stockledger_inventory::ProductId;

/// Quote document identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuoteId(pub AggregateId);

impl QuoteId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for QuoteId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Quote status lifecycle.
///
/// `Pending` is initial; `Rejected`, `Expired` and `Converted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
    Converted,
}

impl QuoteStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            QuoteStatus::Rejected | QuoteStatus::Expired | QuoteStatus::Converted
        )
    }
}

/// Where a quote was raised. Only external-app quotes reserve stock on creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteSource {
    Internal,
    ExternalApp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteLine {
    pub line_no: u32,
    pub product_id: ProductId,
    pub quantity: i64,
}

/// Snapshot of a quote as handed over by the document layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteDocument {
    pub id: QuoteId,
    pub number: String,
    pub status: QuoteStatus,
    pub source: QuoteSource,
    pub lines: Vec<QuoteLine>,
}

impl QuoteDocument {
    pub fn validate(&self) -> Result<(), DomainError> {
        if let Some(line) = self.lines.iter().find(|l| l.quantity <= 0) {
            return Err(DomainError::validation(format!(
                "quote {} line {} has non-positive quantity {}",
                self.number, line.line_no, line.quantity
            )));
        }

        let mut seen = std::collections::HashSet::new();
        if let Some(line) = self.lines.iter().find(|l| !seen.insert(l.line_no)) {
            return Err(DomainError::validation(format!(
                "quote {} repeats line number {}",
                self.number, line.line_no
            )));
        }

        Ok(())
    }
}

/// What the stock engine must do for a quote event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationAction {
    /// Reserve every line (all-or-nothing via compensation).
    Reserve,
    /// Push the reservation deadline out; quantities unchanged.
    Extend,
    /// Give reserved stock back.
    Release,
    /// Turn the reservation into a permanent depletion.
    Consume,
    None,
}

/// Action for a freshly created quote.
pub fn action_on_created(quote: &QuoteDocument) -> ReservationAction {
    match (quote.status, quote.source) {
        (QuoteStatus::Pending, QuoteSource::ExternalApp) => ReservationAction::Reserve,
        _ => ReservationAction::None,
    }
}

/// Action for a status change `from -> to`.
///
/// Leaving a terminal state is an invariant violation. Re-entering the same
/// terminal state (a redelivered event) is a no-op.
pub fn action_on_transition(
    from: QuoteStatus,
    to: QuoteStatus,
) -> Result<ReservationAction, DomainError> {
    if from.is_terminal() {
        if from == to {
            return Ok(ReservationAction::None);
        }
        return Err(DomainError::invariant(format!(
            "quote cannot leave terminal status {from:?} (attempted {to:?})"
        )));
    }

    Ok(match to {
        QuoteStatus::Approved => ReservationAction::Extend,
        QuoteStatus::Rejected | QuoteStatus::Expired => ReservationAction::Release,
        QuoteStatus::Converted => ReservationAction::Consume,
        QuoteStatus::Pending => ReservationAction::None,
    })
}
