use thiserror::Error;

use stockledger_core::DomainError;
use stockledger_inventory::StockError;

use crate::store::StoreError;

/// Errors surfaced by the stock engine's services.
///
/// Stock rule violations keep their own variants so callers can branch on
/// them; storage failures are propagated as-is inside `Storage`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Non-positive quantity; rejected before any write.
    #[error("invalid quantity: {quantity}")]
    InvalidQuantity { quantity: i64 },

    /// Reserve asked for more than is available. Never retried automatically.
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i64, available: i64 },

    /// Reservation state does not match what the operation expects.
    #[error("reservation inconsistency: {0}")]
    ReservationInconsistency(String),

    /// A receipt would push the on-hand counter past `i64::MAX`.
    #[error("receiving {quantity} onto {on_hand} on hand overflows the counter")]
    QuantityOverflow { on_hand: i64, quantity: i64 },

    /// No warehouse exists to receive into. Operational setup error.
    #[error("no warehouse configured to receive stock")]
    NoWarehouseConfigured,

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// An operation failed and so did the release that should have undone its
    /// partial effects. Reservations may be left behind; needs attention.
    #[error("{original}; compensating release also failed: {compensation}")]
    CompensationFailed {
        original: Box<LedgerError>,
        compensation: Box<LedgerError>,
    },
}

impl From<StockError> for LedgerError {
    fn from(value: StockError) -> Self {
        match value {
            StockError::InvalidQuantity { quantity } => LedgerError::InvalidQuantity { quantity },
            StockError::InsufficientStock {
                requested,
                available,
            } => LedgerError::InsufficientStock {
                requested,
                available,
            },
            StockError::ReservationInconsistency(msg) => LedgerError::ReservationInconsistency(msg),
            StockError::QuantityOverflow { on_hand, quantity } => {
                LedgerError::QuantityOverflow { on_hand, quantity }
            }
        }
    }
}

impl LedgerError {
    /// Backend failures and write conflicts may succeed on a retry of the
    /// whole operation; everything else is deterministic.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LedgerError::Storage(StoreError::Backend(_)) | LedgerError::Storage(StoreError::Conflict(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stock_errors_keep_their_shape() {
        let err: LedgerError = StockError::InsufficientStock {
            requested: 6,
            available: 5,
        }
        .into();
        assert_eq!(
            err,
            LedgerError::InsufficientStock {
                requested: 6,
                available: 5
            }
        );
        assert!(!err.is_transient());
    }

    #[test]
    fn compensation_failure_mentions_both_causes() {
        let err = LedgerError::CompensationFailed {
            original: Box::new(LedgerError::InsufficientStock {
                requested: 1,
                available: 0,
            }),
            compensation: Box::new(LedgerError::Storage(StoreError::Backend(
                "connection reset".to_string(),
            ))),
        };
        let text = err.to_string();
        assert!(text.contains("insufficient stock"));
        assert!(text.contains("connection reset"));
    }
}
