use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::DomainError;
use stockledger_inventory::{StockKey, StockRecordId};

use crate::quote::QuoteId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Active,
    Released,
    Consumed,
}

impl ReservationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Active => "active",
            ReservationStatus::Released => "released",
            ReservationStatus::Consumed => "consumed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "active" => Ok(ReservationStatus::Active),
            "released" => Ok(ReservationStatus::Released),
            "consumed" => Ok(ReservationStatus::Consumed),
            other => Err(DomainError::validation(format!(
                "unknown reservation status: {other}"
            ))),
        }
    }
}

/// Hold windows applied to quote reservations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationPolicy {
    /// Validity of a fresh reservation.
    pub hold_hours: i64,
    /// On approval the deadline becomes `approved_at + approval_extension_hours`.
    pub approval_extension_hours: i64,
}

impl Default for ReservationPolicy {
    fn default() -> Self {
        Self {
            hold_hours: 24,
            approval_extension_hours: 48,
        }
    }
}

impl ReservationPolicy {
    pub fn initial_deadline(&self, reserved_at: DateTime<Utc>) -> DateTime<Utc> {
        reserved_at + Duration::hours(self.hold_hours)
    }

    pub fn approval_deadline(&self, approved_at: DateTime<Utc>) -> DateTime<Utc> {
        approved_at + Duration::hours(self.approval_extension_hours)
    }
}

/// Bookkeeping for the stock one quote line holds in one stock record.
///
/// The quantities live in the stock record; this row remembers which record
/// was reserved against so release/consume hit the same lot. A line covered
/// by several lots has one row per lot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteReservation {
    pub quote_id: QuoteId,
    pub line_no: u32,
    pub stock_record_id: StockRecordId,
    pub key: StockKey,
    pub quantity: i64,
    pub status: ReservationStatus,
    pub reserved_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl QuoteReservation {
    pub fn open(
        quote_id: QuoteId,
        line_no: u32,
        stock_record_id: StockRecordId,
        key: StockKey,
        quantity: i64,
        reserved_at: DateTime<Utc>,
        policy: &ReservationPolicy,
    ) -> Self {
        Self {
            quote_id,
            line_no,
            stock_record_id,
            key,
            quantity,
            status: ReservationStatus::Active,
            reserved_at,
            expires_at: policy.initial_deadline(reserved_at),
            closed_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }

    /// Move the deadline out to `deadline`. Never shortens it.
    pub fn extend_until(&mut self, deadline: DateTime<Utc>) -> Result<(), DomainError> {
        self.ensure_active("extend")?;
        if deadline > self.expires_at {
            self.expires_at = deadline;
        }
        Ok(())
    }

    pub fn mark_released(&mut self, at: DateTime<Utc>) -> Result<(), DomainError> {
        self.ensure_active("release")?;
        self.status = ReservationStatus::Released;
        self.closed_at = Some(at);
        Ok(())
    }

    pub fn mark_consumed(&mut self, at: DateTime<Utc>) -> Result<(), DomainError> {
        self.ensure_active("consume")?;
        self.status = ReservationStatus::Consumed;
        self.closed_at = Some(at);
        Ok(())
    }

    fn ensure_active(&self, action: &str) -> Result<(), DomainError> {
        if !self.is_active() {
            return Err(DomainError::invariant(format!(
                "cannot {action} reservation for quote {} line {}: it is {}",
                self.quote_id,
                self.line_no,
                self.status.as_str()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockledger_core::AggregateId;
    use stockledger_inventory::{Lot, ProductId, WarehouseId};

    fn reservation(at: DateTime<Utc>) -> QuoteReservation {
        QuoteReservation::open(
            QuoteId::new(AggregateId::new()),
            1,
            StockRecordId::new(AggregateId::new()),
            StockKey::new(
                ProductId::new(AggregateId::new()),
                WarehouseId::new(AggregateId::new()),
                Lot::unlotted(),
            ),
            3,
            at,
            &ReservationPolicy::default(),
        )
    }

    #[test]
    fn fresh_reservation_holds_for_a_day() {
        let at = Utc::now();
        let r = reservation(at);
        assert!(r.is_active());
        assert_eq!(r.expires_at, at + Duration::hours(24));
    }

    #[test]
    fn approval_pushes_deadline_forward_only() {
        let at = Utc::now();
        let policy = ReservationPolicy::default();
        let mut r = reservation(at);

        r.extend_until(policy.approval_deadline(at + Duration::hours(2)))
            .unwrap();
        assert_eq!(r.expires_at, at + Duration::hours(50));

        r.extend_until(at + Duration::hours(1)).unwrap();
        assert_eq!(r.expires_at, at + Duration::hours(50));
    }

    #[test]
    fn closed_reservations_reject_further_actions() {
        let at = Utc::now();
        let mut r = reservation(at);
        r.mark_released(at).unwrap();
        assert_eq!(r.status, ReservationStatus::Released);
        assert!(matches!(
            r.mark_consumed(at),
            Err(DomainError::InvariantViolation(_))
        ));
        assert!(r.extend_until(at + Duration::hours(99)).is_err());
    }
}
