//! Receiving pipeline: turns a received purchase into stock and, for credit
//! purchases, an accounts-payable obligation.
//!
//! ## Flow
//!
//! ```text
//! PurchaseReceived
//!   ↓
//! validate document, resolve a warehouse per line   (no transaction yet)
//!   ↓
//! begin
//!   claim receipt guard ── already claimed ──→ AlreadyApplied (no-op)
//!   increase stock for every line (RECEIPT movements)
//!   create payable if CREDIT
//! commit
//! ```
//!
//! The whole document is one transaction: either every line is received and
//! the payable exists, or nothing is written. The receipt guard makes
//! redelivery of the same event a no-op.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use stockledger_accounting::Payable;
use stockledger_core::DomainError;
use stockledger_inventory::{MovementReference, StockKey, StockRecord, Warehouse, WarehouseId};
use stockledger_purchasing::{PurchaseLine, PurchaseReceived, PurchaseStatus};

use crate::error::LedgerError;
use crate::ledger::{LedgerContext, StockLedger};
use crate::payables::PayableTracker;
use crate::store::StockStore;

/// Picks the warehouse a purchase line is received into.
pub trait WarehouseResolver: Send + Sync {
    fn resolve_receiving_warehouse(&self, line: &PurchaseLine) -> Result<WarehouseId, LedgerError>;
}

/// Configuration for [`PreferredNameResolver`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivingPolicy {
    /// Case-insensitive name fragments marking the preferred receiving warehouse.
    pub preferred_warehouse_keywords: Vec<String>,
}

impl Default for ReceivingPolicy {
    fn default() -> Self {
        Self {
            preferred_warehouse_keywords: vec!["principal".to_string(), "general".to_string()],
        }
    }
}

/// First active warehouse whose name contains a preferred keyword, else the
/// first active warehouse.
#[derive(Debug, Clone)]
pub struct PreferredNameResolver<S> {
    store: S,
    policy: ReceivingPolicy,
}

impl<S> PreferredNameResolver<S>
where
    S: StockStore,
{
    pub fn new(store: S, policy: ReceivingPolicy) -> Self {
        Self { store, policy }
    }

    fn pick(&self, warehouses: &[Warehouse]) -> Option<WarehouseId> {
        let active = || warehouses.iter().filter(|w| w.active);
        active()
            .find(|w| w.name_matches_any(&self.policy.preferred_warehouse_keywords))
            .or_else(|| active().next())
            .map(|w| w.id)
    }
}

impl<S> WarehouseResolver for PreferredNameResolver<S>
where
    S: StockStore,
{
    fn resolve_receiving_warehouse(&self, _line: &PurchaseLine) -> Result<WarehouseId, LedgerError> {
        let warehouses = self.store.warehouses()?;
        self.pick(&warehouses)
            .ok_or(LedgerError::NoWarehouseConfigured)
    }
}

/// Always receives into one warehouse.
#[derive(Debug, Clone, Copy)]
pub struct FixedWarehouseResolver(pub WarehouseId);

impl WarehouseResolver for FixedWarehouseResolver {
    fn resolve_receiving_warehouse(&self, _line: &PurchaseLine) -> Result<WarehouseId, LedgerError> {
        Ok(self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptOutcome {
    /// Stock was received; `payable` is set when one was created.
    Applied {
        records: Vec<StockRecord>,
        payable: Option<Payable>,
    },
    /// This purchase was received before; nothing was written.
    AlreadyApplied,
}

#[derive(Debug, Clone)]
pub struct ReceivingPipeline<S, W> {
    ledger: StockLedger<S>,
    resolver: W,
    payables: PayableTracker<S>,
}

impl<S, W> ReceivingPipeline<S, W>
where
    S: StockStore,
    W: WarehouseResolver,
{
    pub fn new(ledger: StockLedger<S>, resolver: W, payables: PayableTracker<S>) -> Self {
        Self {
            ledger,
            resolver,
            payables,
        }
    }

    #[instrument(
        skip(self, event),
        fields(
            purchase = %event.document.id,
            number = %event.document.number,
            lines = event.document.lines.len()
        ),
        err
    )]
    pub fn receive(&self, event: &PurchaseReceived) -> Result<ReceiptOutcome, LedgerError> {
        let document = &event.document;
        if document.status != PurchaseStatus::Received {
            return Err(DomainError::validation(format!(
                "purchase {} is {:?}, not received",
                document.number, document.status
            ))
            .into());
        }
        document.validate()?;

        let destinations = document
            .lines
            .iter()
            .map(|line| {
                let warehouse_id = self.resolver.resolve_receiving_warehouse(line)?;
                Ok(StockKey::new(line.product_id, warehouse_id, line.lot.clone()))
            })
            .collect::<Result<Vec<_>, LedgerError>>()?;

        let ctx = LedgerContext::new(
            MovementReference::document(document.id.0, document.number.clone()),
            event.actor,
            event.occurred_at,
        );

        let outcome = self.ledger.transaction(|tx| {
            if !tx.claim_receipt(document.id, event.occurred_at)? {
                return Ok(ReceiptOutcome::AlreadyApplied);
            }

            let mut records = Vec::with_capacity(destinations.len());
            for (line, key) in document.lines.iter().zip(&destinations) {
                records.push(self.ledger.increase_in(
                    tx,
                    key,
                    line.quantity,
                    line.expiration_date,
                    &ctx,
                )?);
            }

            let payable = self
                .payables
                .create_for_purchase_in(tx, document, event.occurred_at)?;
            Ok(ReceiptOutcome::Applied { records, payable })
        })?;

        match &outcome {
            ReceiptOutcome::Applied { records, payable } => info!(
                records = records.len(),
                payable = payable.is_some(),
                "purchase received"
            ),
            ReceiptOutcome::AlreadyApplied => debug!("purchase already received; skipping"),
        }
        Ok(outcome)
    }
}
