use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, instrument};

use stockledger_accounting::{Payable, PayableCommand, PayableId, PaymentTerms};
use stockledger_core::{AggregateId, AggregateRoot, DomainError, ExpectedVersion};
use stockledger_events::execute;
use stockledger_purchasing::{PurchaseDocument, PurchaseId};

use crate::error::LedgerError;
use crate::ledger::in_transaction;
use crate::store::{StockStore, StockTx};

/// Accounts-payable obligations derived from received credit purchases.
#[derive(Debug, Clone)]
pub struct PayableTracker<S> {
    store: S,
    terms: PaymentTerms,
}

impl<S> PayableTracker<S>
where
    S: StockStore,
{
    pub fn new(store: S, terms: PaymentTerms) -> Self {
        Self { store, terms }
    }

    pub fn terms(&self) -> PaymentTerms {
        self.terms
    }

    /// Create the payable of a received credit purchase inside `tx`.
    ///
    /// Returns the new payable, or `None` for cash purchases and for
    /// purchases that already have one.
    pub fn create_for_purchase_in(
        &self,
        tx: &mut dyn StockTx,
        document: &PurchaseDocument,
        at: DateTime<Utc>,
    ) -> Result<Option<Payable>, LedgerError> {
        if !document.is_credit() {
            return Ok(None);
        }

        if let Some(existing) = tx.lock_payable(document.id)? {
            debug!(
                purchase = %document.id,
                payable = %existing.payable_id(),
                "payable already exists"
            );
            return Ok(None);
        }

        let payable = Payable::for_credit_purchase(
            PayableId::new(AggregateId::new()),
            document,
            self.terms,
            at,
        )?;
        tx.insert_payable(&payable)?;
        Ok(Some(payable))
    }

    pub fn get(&self, purchase_id: PurchaseId) -> Result<Option<Payable>, LedgerError> {
        Ok(self.store.payable_for_purchase(purchase_id)?)
    }

    /// Apply a supplier payment. Overpayment and payments on settled or
    /// cancelled payables are rejected.
    #[instrument(skip(self), err)]
    pub fn apply_payment(
        &self,
        purchase_id: PurchaseId,
        amount: i64,
        at: DateTime<Utc>,
    ) -> Result<Payable, LedgerError> {
        let payable = self.update(
            purchase_id,
            PayableCommand::ApplyPayment {
                amount,
                occurred_at: at,
            },
        )?;
        info!(
            remaining = payable.remaining_balance(),
            status = payable.status().as_str(),
            "payment applied"
        );
        Ok(payable)
    }

    /// Cancel a payable that has received no payments.
    #[instrument(skip(self), err)]
    pub fn cancel(&self, purchase_id: PurchaseId, at: DateTime<Utc>) -> Result<Payable, LedgerError> {
        self.update(purchase_id, PayableCommand::Cancel { occurred_at: at })
    }

    /// Open payables past their due date, earliest due first.
    pub fn overdue(&self, today: NaiveDate) -> Result<Vec<Payable>, LedgerError> {
        Ok(self
            .store
            .payables()?
            .into_iter()
            .filter(|p| p.is_overdue(today))
            .collect())
    }

    fn update(&self, purchase_id: PurchaseId, command: PayableCommand) -> Result<Payable, LedgerError> {
        in_transaction(&self.store, |tx| {
            let mut payable = tx
                .lock_payable(purchase_id)?
                .ok_or_else(|| DomainError::not_found(format!("payable for purchase {purchase_id}")))?;
            let expected = ExpectedVersion::Exact(payable.version());

            execute(&mut payable, &command)?;
            tx.save_payable(&payable, expected)?;
            Ok(payable)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use stockledger_accounting::PayableStatus;
    use stockledger_purchasing::{PaymentType, PurchaseStatus};

    use crate::store::InMemoryStockStore;

    fn document(payment_type: PaymentType) -> PurchaseDocument {
        PurchaseDocument {
            id: PurchaseId::new(AggregateId::new()),
            number: "OC-7".to_string(),
            status: PurchaseStatus::Received,
            payment_type,
            total: 500,
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            lines: vec![],
        }
    }

    fn tracker() -> PayableTracker<Arc<InMemoryStockStore>> {
        PayableTracker::new(Arc::new(InMemoryStockStore::new()), PaymentTerms::default())
    }

    fn create(tracker: &PayableTracker<Arc<InMemoryStockStore>>, doc: &PurchaseDocument) -> Option<Payable> {
        in_transaction(&tracker.store, |tx| {
            tracker.create_for_purchase_in(tx, doc, Utc::now())
        })
        .unwrap()
    }

    #[test]
    fn creation_is_idempotent_per_purchase() {
        let tracker = tracker();
        let doc = document(PaymentType::Credit);

        let first = create(&tracker, &doc).unwrap();
        assert_eq!(first.due_date(), NaiveDate::from_ymd_opt(2024, 1, 31).unwrap());
        assert!(create(&tracker, &doc).is_none());
        assert_eq!(tracker.get(doc.id).unwrap(), Some(first));
    }

    #[test]
    fn cash_purchases_create_nothing() {
        let tracker = tracker();
        let doc = document(PaymentType::Cash);
        assert!(create(&tracker, &doc).is_none());
        assert!(tracker.get(doc.id).unwrap().is_none());
    }

    #[test]
    fn payments_settle_the_balance() {
        let tracker = tracker();
        let doc = document(PaymentType::Credit);
        create(&tracker, &doc);

        let partial = tracker.apply_payment(doc.id, 200, Utc::now()).unwrap();
        assert_eq!(partial.status(), PayableStatus::Partial);

        assert!(matches!(
            tracker.apply_payment(doc.id, 301, Utc::now()),
            Err(LedgerError::Domain(DomainError::Validation(_)))
        ));

        let paid = tracker.apply_payment(doc.id, 300, Utc::now()).unwrap();
        assert_eq!(paid.status(), PayableStatus::Paid);
        assert_eq!(paid.remaining_balance(), 0);
    }

    #[test]
    fn overdue_lists_only_open_payables_past_due() {
        let tracker = tracker();
        let open = document(PaymentType::Credit);
        let settled = document(PaymentType::Credit);
        create(&tracker, &open);
        create(&tracker, &settled);
        tracker.apply_payment(settled.id, 500, Utc::now()).unwrap();

        let feb = NaiveDate::from_ymd_opt(2024, 2, 15).unwrap();
        let overdue = tracker.overdue(feb).unwrap();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].purchase_id(), open.id);

        assert!(tracker.overdue(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()).unwrap().is_empty());
    }

    #[test]
    fn paying_unknown_purchase_is_not_found() {
        let tracker = tracker();
        assert!(matches!(
            tracker.apply_payment(PurchaseId::new(AggregateId::new()), 1, Utc::now()),
            Err(LedgerError::Domain(DomainError::NotFound(_)))
        ));
    }
}
