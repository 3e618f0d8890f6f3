use tracing::instrument;

use stockledger_inventory::{MovementEntry, MovementKind, NewMovement};

use crate::error::LedgerError;
use crate::store::StockTx;

/// Appends movement rows inside the transaction that made the change, so a
/// stock mutation and its audit entry commit or fail together.
#[derive(Debug, Clone, Copy, Default)]
pub struct MovementRecorder;

impl MovementRecorder {
    pub fn new() -> Self {
        Self
    }

    /// Append one movement. The row must describe its own counters
    /// consistently; a mismatch means the caller computed it wrongly and
    /// nothing is written.
    #[instrument(
        skip(self, tx, movement),
        fields(
            stock_record_id = %movement.stock_record_id,
            kind = %movement.kind,
            delta = movement.delta
        ),
        err
    )]
    pub fn record(
        &self,
        tx: &mut dyn StockTx,
        movement: NewMovement,
    ) -> Result<MovementEntry, LedgerError> {
        check_movement(&movement)?;
        Ok(tx.append_movement(movement)?)
    }
}

fn check_movement(m: &NewMovement) -> Result<(), LedgerError> {
    let sign_ok = match m.kind {
        MovementKind::Receipt | MovementKind::Reserve => m.delta > 0,
        MovementKind::Release | MovementKind::Consume => m.delta < 0,
        MovementKind::Adjustment => m.delta != 0,
    };
    if !sign_ok {
        return Err(LedgerError::InvalidQuantity { quantity: m.delta });
    }

    let (quantity_delta, reserved_delta) = match m.kind {
        MovementKind::Receipt | MovementKind::Adjustment => (m.delta, 0),
        MovementKind::Reserve | MovementKind::Release => (0, m.delta),
        MovementKind::Consume => (m.delta, m.delta),
    };
    if m.quantity_after - m.quantity_before != quantity_delta
        || m.reserved_after - m.reserved_before != reserved_delta
    {
        return Err(LedgerError::ReservationInconsistency(format!(
            "{} movement of {} does not match counters quantity {}->{}, reserved {}->{}",
            m.kind, m.delta, m.quantity_before, m.quantity_after, m.reserved_before, m.reserved_after
        )));
    }

    if m.reserved_after < 0 || m.reserved_after > m.quantity_after {
        return Err(LedgerError::ReservationInconsistency(format!(
            "movement would leave reserved={} with quantity={}",
            m.reserved_after, m.quantity_after
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stockledger_core::{ActorId, AggregateId};
    use stockledger_inventory::{MovementReference, StockRecordId};

    fn movement(kind: MovementKind, delta: i64, q: (i64, i64), r: (i64, i64)) -> NewMovement {
        NewMovement {
            stock_record_id: StockRecordId::new(AggregateId::new()),
            kind,
            delta,
            quantity_before: q.0,
            quantity_after: q.1,
            reserved_before: r.0,
            reserved_after: r.1,
            reference: MovementReference::note("check"),
            actor: ActorId::new(),
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn consistent_movements_pass() {
        assert!(check_movement(&movement(MovementKind::Receipt, 5, (0, 5), (0, 0))).is_ok());
        assert!(check_movement(&movement(MovementKind::Reserve, 2, (5, 5), (0, 2))).is_ok());
        assert!(check_movement(&movement(MovementKind::Consume, -2, (5, 3), (2, 0))).is_ok());
        assert!(check_movement(&movement(MovementKind::Adjustment, -1, (3, 2), (0, 0))).is_ok());
    }

    #[test]
    fn wrong_sign_or_counters_are_rejected() {
        assert!(matches!(
            check_movement(&movement(MovementKind::Release, 2, (5, 5), (2, 0))),
            Err(LedgerError::InvalidQuantity { .. })
        ));
        assert!(matches!(
            check_movement(&movement(MovementKind::Reserve, 2, (5, 5), (0, 3))),
            Err(LedgerError::ReservationInconsistency(_))
        ));
        assert!(matches!(
            check_movement(&movement(MovementKind::Reserve, 6, (5, 5), (0, 6))),
            Err(LedgerError::ReservationInconsistency(_))
        ));
    }
}
