//! Quote-driven reservation lifecycle.
//!
//! Reacts to quote events and drives the stock ledger:
//!
//! | Event                                | Ledger effect                           |
//! |--------------------------------------|-----------------------------------------|
//! | created, pending, external app       | reserve every line, compensate on error |
//! | → approved                           | push deadlines out, no ledger call      |
//! | → rejected / expired, or deleted     | release every active reservation        |
//! | → converted                          | consume every active reservation        |
//!
//! A quote is claimed once before anything is reserved, so a redelivered or
//! concurrent creation event never reserves twice, even after the quote was
//! converted or released. Each line is then reserved in its own transaction.
//! When a later line fails, the lines already reserved are released and the
//! claim is dropped before the error is returned, so a quote is never left
//! half-reserved and a retry starts from scratch.

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, instrument, warn};

use stockledger_core::ActorId;
use stockledger_inventory::{MovementReference, StockKey, StockRecord, sort_fefo};
use stockledger_sales::{
    QuoteCreated, QuoteDeleted, QuoteDocument, QuoteId, QuoteLine, QuoteReservation,
    QuoteStatusChanged, ReservationAction, ReservationPolicy, ReservationStatus,
    action_on_created, action_on_transition,
};

use crate::error::LedgerError;
use crate::ledger::{LedgerContext, StockLedger};
use crate::store::{StockStore, StockTx};

/// Units of one quote line taken from one stock record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub key: StockKey,
    pub quantity: i64,
}

/// Chooses which stock records a quote line reserves against.
pub trait ReservationSourceResolver: Send + Sync {
    /// Allocations covering the whole line quantity, or `InsufficientStock`.
    fn allocate(&self, line: &QuoteLine, today: NaiveDate) -> Result<Vec<Allocation>, LedgerError>;
}

/// First-expired-first-out: walks the unexpired lots of the product from the
/// soonest expiry and takes what each has available until the line is covered.
#[derive(Debug, Clone)]
pub struct FefoSourceResolver<S> {
    store: S,
}

impl<S> FefoSourceResolver<S>
where
    S: StockStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S> ReservationSourceResolver for FefoSourceResolver<S>
where
    S: StockStore,
{
    fn allocate(&self, line: &QuoteLine, today: NaiveDate) -> Result<Vec<Allocation>, LedgerError> {
        let mut candidates: Vec<StockRecord> = self
            .store
            .records_for_product(line.product_id)?
            .into_iter()
            .filter(|r| r.available() > 0 && !r.is_expired(today))
            .collect();
        sort_fefo(&mut candidates);

        let mut pending = line.quantity;
        let mut allocations = Vec::new();
        for record in &candidates {
            if pending == 0 {
                break;
            }
            let take = pending.min(record.available());
            allocations.push(Allocation {
                key: record.key().clone(),
                quantity: take,
            });
            pending -= take;
        }

        if pending > 0 {
            return Err(LedgerError::InsufficientStock {
                requested: line.quantity,
                available: line.quantity - pending,
            });
        }
        Ok(allocations)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationOutcome {
    /// The event requires no stock action.
    Skipped,
    /// The quote was already claimed by an earlier delivery; nothing was reserved again.
    AlreadyReserved,
    Reserved { lines: usize },
    /// Counts reservation rows; a line split across lots has one row per lot.
    Extended { rows: usize },
    Released { rows: usize },
    Consumed { rows: usize },
}

#[derive(Debug, Clone)]
pub struct ReservationStateMachine<S, R> {
    ledger: StockLedger<S>,
    resolver: R,
    policy: ReservationPolicy,
}

impl<S, R> ReservationStateMachine<S, R>
where
    S: StockStore,
    R: ReservationSourceResolver,
{
    pub fn new(ledger: StockLedger<S>, resolver: R, policy: ReservationPolicy) -> Self {
        Self {
            ledger,
            resolver,
            policy,
        }
    }

    pub fn policy(&self) -> ReservationPolicy {
        self.policy
    }

    /// Reservation rows of one quote, ordered by line number.
    pub fn reservations(&self, quote_id: QuoteId) -> Result<Vec<QuoteReservation>, LedgerError> {
        Ok(self.ledger.store().reservations_for_quote(quote_id)?)
    }

    #[instrument(skip(self, event), fields(quote = %event.quote.id, number = %event.quote.number), err)]
    pub fn on_created(&self, event: &QuoteCreated) -> Result<ReservationOutcome, LedgerError> {
        let quote = &event.quote;
        if action_on_created(quote) != ReservationAction::Reserve {
            debug!(status = ?quote.status, source = ?quote.source, "quote does not auto-reserve");
            return Ok(ReservationOutcome::Skipped);
        }
        quote.validate()?;

        let ctx = context(quote, event.actor, event.occurred_at);
        let claimed = self
            .ledger
            .transaction(|tx| Ok(tx.claim_quote(quote.id, ctx.at)?))?;
        if !claimed {
            debug!("quote already claimed for reservation");
            return Ok(ReservationOutcome::AlreadyReserved);
        }

        let today = event.occurred_at.date_naive();
        for line in &quote.lines {
            if let Err(err) = self.reserve_line(quote.id, line, today, &ctx) {
                warn!(line = line.line_no, error = %err, "line reservation failed; releasing quote");
                return Err(self.compensate(quote.id, &ctx, err));
            }
        }

        info!(lines = quote.lines.len(), "quote reserved");
        Ok(ReservationOutcome::Reserved {
            lines: quote.lines.len(),
        })
    }

    #[instrument(
        skip(self, event),
        fields(quote = %event.quote.id, from = ?event.old_status, to = ?event.new_status),
        err
    )]
    pub fn on_status_changed(
        &self,
        event: &QuoteStatusChanged,
    ) -> Result<ReservationOutcome, LedgerError> {
        let ctx = context(&event.quote, event.actor, event.occurred_at);
        let outcome = match action_on_transition(event.old_status, event.new_status)? {
            ReservationAction::Extend => self.extend_all(event.quote.id, event.occurred_at)?,
            ReservationAction::Release => ReservationOutcome::Released {
                rows: self.release_all(event.quote.id, &ctx)?,
            },
            ReservationAction::Consume => self.consume_all(event.quote.id, &ctx)?,
            ReservationAction::Reserve | ReservationAction::None => ReservationOutcome::Skipped,
        };
        info!(?outcome, "quote transition applied");
        Ok(outcome)
    }

    /// Deleting a quote releases whatever it still holds, whatever its status.
    #[instrument(skip(self, event), fields(quote = %event.quote.id), err)]
    pub fn on_deleted(&self, event: &QuoteDeleted) -> Result<ReservationOutcome, LedgerError> {
        let ctx = context(&event.quote, event.actor, event.occurred_at);
        let rows = self.release_all(event.quote.id, &ctx)?;
        if rows > 0 {
            info!(rows, "released reservations of deleted quote");
        }
        Ok(ReservationOutcome::Released { rows })
    }

    /// Reserve every allocation of one line in one transaction.
    fn reserve_line(
        &self,
        quote_id: QuoteId,
        line: &QuoteLine,
        today: NaiveDate,
        ctx: &LedgerContext,
    ) -> Result<(), LedgerError> {
        let allocations = self.resolver.allocate(line, today)?;
        self.ledger.transaction(|tx| {
            for allocation in &allocations {
                let record = self.ledger.reserve_in(tx, &allocation.key, allocation.quantity, ctx)?;
                let reservation = QuoteReservation::open(
                    quote_id,
                    line.line_no,
                    record.record_id(),
                    allocation.key.clone(),
                    allocation.quantity,
                    ctx.at,
                    &self.policy,
                );
                tx.insert_reservation(&reservation)?;
            }
            Ok(())
        })?;
        if allocations.len() > 1 {
            debug!(line = line.line_no, lots = allocations.len(), "line split across lots");
        }
        Ok(())
    }

    /// Undo a partial creation: release what was reserved and drop the claim
    /// in one transaction.
    fn compensate(&self, quote_id: QuoteId, ctx: &LedgerContext, original: LedgerError) -> LedgerError {
        let undone = self.ledger.transaction(|tx| {
            let released = self.release_rows(tx, quote_id, ctx)?;
            tx.release_quote_claim(quote_id)?;
            Ok(released)
        });
        match undone {
            Ok(rows) => {
                warn!(rows, "partial quote reservation rolled back");
                original
            }
            Err(compensation) => LedgerError::CompensationFailed {
                original: Box::new(original),
                compensation: Box::new(compensation),
            },
        }
    }

    /// Release every active reservation of the quote in one transaction.
    /// Returns how many rows were released; zero is not an error. The claim
    /// stays, so a later creation event does not reserve again.
    fn release_all(&self, quote_id: QuoteId, ctx: &LedgerContext) -> Result<usize, LedgerError> {
        self.ledger
            .transaction(|tx| self.release_rows(tx, quote_id, ctx))
    }

    fn release_rows(
        &self,
        tx: &mut dyn StockTx,
        quote_id: QuoteId,
        ctx: &LedgerContext,
    ) -> Result<usize, LedgerError> {
        let mut released = 0;
        for mut row in tx
            .lock_reservations(quote_id)?
            .into_iter()
            .filter(QuoteReservation::is_active)
        {
            self.ledger.release_in(tx, &row.key, row.quantity, ctx)?;
            row.mark_released(ctx.at)?;
            tx.save_reservation(&row)?;
            released += 1;
        }
        Ok(released)
    }

    fn extend_all(
        &self,
        quote_id: QuoteId,
        approved_at: DateTime<Utc>,
    ) -> Result<ReservationOutcome, LedgerError> {
        let deadline = self.policy.approval_deadline(approved_at);
        let rows = self.ledger.transaction(|tx| {
            let mut extended = 0;
            for mut row in tx
                .lock_reservations(quote_id)?
                .into_iter()
                .filter(QuoteReservation::is_active)
            {
                row.extend_until(deadline)?;
                tx.save_reservation(&row)?;
                extended += 1;
            }
            Ok(extended)
        })?;
        Ok(ReservationOutcome::Extended { rows })
    }

    /// Consume every reservation of the quote atomically.
    ///
    /// A quote that never reserved (internal source) and a redelivered
    /// conversion are no-ops. A released reservation means the stock went
    /// back to the pool before conversion, which is an inconsistency.
    fn consume_all(
        &self,
        quote_id: QuoteId,
        ctx: &LedgerContext,
    ) -> Result<ReservationOutcome, LedgerError> {
        let rows = self.ledger.transaction(|tx| {
            let rows = tx.lock_reservations(quote_id)?;
            if let Some(row) = rows.iter().find(|r| r.status == ReservationStatus::Released) {
                return Err(LedgerError::ReservationInconsistency(format!(
                    "quote {quote_id} line {} was released before conversion",
                    row.line_no
                )));
            }

            let mut consumed = 0;
            for mut row in rows.into_iter().filter(QuoteReservation::is_active) {
                self.ledger.consume_in(tx, &row.key, row.quantity, ctx)?;
                row.mark_consumed(ctx.at)?;
                tx.save_reservation(&row)?;
                consumed += 1;
            }
            Ok(consumed)
        })?;
        Ok(ReservationOutcome::Consumed { rows })
    }
}

fn context(quote: &QuoteDocument, actor: ActorId, at: DateTime<Utc>) -> LedgerContext {
    LedgerContext::new(
        MovementReference::document(quote.id.0, quote.number.clone()),
        actor,
        at,
    )
}
