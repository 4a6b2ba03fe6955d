//! Transactional onboarding import.
//!
//! An import creates stores, then purchase lines, then sale lines, then asks
//! the backend to recompute daily cost aggregates. The first three steps are
//! all-or-nothing: each registers a compensating delete in a [`Saga`], and a
//! failure rolls back every completed step newest first before the original
//! error is returned. Aggregate recomputation is best-effort and never
//! triggers a rollback.

use std::collections::HashSet;
use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{Instrument, debug, error, info, info_span, warn};

use larder_types::{
    ImportBatch, ImportResult, ImportSummary, PurchaseLine, SaleLine, SaleRecord, Store,
};

use crate::error::{Error, RemoteError, RemoteErrorKind, Result};
use crate::retry::RetryPolicy;
use crate::saga::Saga;
use crate::traits::ImportBackend;

/// Runs [`ImportBatch`]es against an [`ImportBackend`].
#[derive(Clone)]
pub struct ImportWorkflow {
    backend: Arc<dyn ImportBackend>,
    compensation_retry: RetryPolicy,
}

impl std::fmt::Debug for ImportWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportWorkflow")
            .field("compensation_retry", &self.compensation_retry)
            .finish()
    }
}

impl ImportWorkflow {
    /// Create a workflow using the default compensation retry policy.
    pub fn new(backend: Arc<dyn ImportBackend>) -> Self {
        Self {
            backend,
            compensation_retry: RetryPolicy::for_compensation(),
        }
    }

    /// Use `policy` when retrying compensating deletes.
    #[must_use]
    pub fn with_compensation_retry(mut self, policy: RetryPolicy) -> Self {
        self.compensation_retry = policy;
        self
    }

    /// Import `batch`.
    ///
    /// On failure every entity created by this call has been deleted again,
    /// unless a compensation itself failed; such entities are logged at
    /// error level with "manual cleanup required".
    pub async fn run(&self, batch: &ImportBatch) -> Result<ImportResult> {
        validate_batch(batch)?;

        info!(
            "Importing {} store(s), {} invoice line(s), {} sale(s)",
            batch.store_drafts.len(),
            batch.invoice_line_count(),
            batch.sale_records.len()
        );

        let mut saga = Saga::new("import").with_retry(self.compensation_retry.clone());
        let stores = match self.write_entities(batch, &mut saga).await {
            Ok(stores) => {
                saga.commit();
                stores
            }
            Err(e) => {
                error!("Import failed: {}; rolling back {} step(s)", e, saga.len());
                let failures = saga.compensate().await;
                if !failures.is_empty() {
                    error!(
                        "Import rollback incomplete, manual cleanup required for: {}",
                        failures
                            .iter()
                            .map(|f| f.label.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    );
                }
                return Err(e);
            }
        };

        self.recompute_aggregates(batch, &stores).await;

        let summary = summarize(batch);
        info!(
            "Import complete: {} store(s), purchases {}, sales {}",
            stores.len(),
            summary.total_purchases,
            summary.total_sales
        );
        Ok(ImportResult { stores, summary })
    }

    async fn write_entities(&self, batch: &ImportBatch, saga: &mut Saga) -> Result<Vec<Store>> {
        let stores = self
            .create_stores(batch, saga)
            .instrument(info_span!("create_stores"))
            .await?;
        let primary = stores
            .first()
            .ok_or_else(|| Error::invalid_batch("no stores were created"))?;

        let purchases: Vec<PurchaseLine> = batch
            .invoice_records
            .iter()
            .flat_map(|invoice| {
                invoice
                    .lines
                    .iter()
                    .map(move |line| PurchaseLine::from_invoice(&primary.id, invoice, line))
            })
            .collect();
        if !purchases.is_empty() {
            let ids = self
                .backend
                .insert_purchase_lines(&purchases)
                .instrument(info_span!("insert_purchase_lines", count = purchases.len()))
                .await?;
            debug!("Inserted {} purchase line(s)", ids.len());
            let backend = Arc::clone(&self.backend);
            saga.register(format!("delete {} purchase line(s)", ids.len()), move || {
                let backend = Arc::clone(&backend);
                let ids = ids.clone();
                async move { already_removed(backend.delete_purchase_lines(&ids).await) }
            });
        }

        let sales: Vec<SaleLine> = batch
            .sale_records
            .iter()
            .map(|record| SaleLine::from_record(&match_store(&stores, record).id, record))
            .collect();
        if !sales.is_empty() {
            let ids = self
                .backend
                .insert_sale_lines(&sales)
                .instrument(info_span!("insert_sale_lines", count = sales.len()))
                .await?;
            debug!("Inserted {} sale line(s)", ids.len());
            let backend = Arc::clone(&self.backend);
            saga.register(format!("delete {} sale line(s)", ids.len()), move || {
                let backend = Arc::clone(&backend);
                let ids = ids.clone();
                async move { already_removed(backend.delete_sale_lines(&ids).await) }
            });
        }

        Ok(stores)
    }

    async fn create_stores(&self, batch: &ImportBatch, saga: &mut Saga) -> Result<Vec<Store>> {
        let mut stores = Vec::with_capacity(batch.store_drafts.len());
        for draft in &batch.store_drafts {
            let slug = draft.slug();
            let store = self.backend.create_store(draft, &slug).await?;
            debug!("Created store {} ({})", store.id, store.slug);

            let backend = Arc::clone(&self.backend);
            let id = store.id.clone();
            saga.register(format!("delete store {}", id), move || {
                let backend = Arc::clone(&backend);
                let id = id.clone();
                async move { already_removed(backend.delete_store(&id).await) }
            });
            stores.push(store);
        }
        Ok(stores)
    }

    async fn recompute_aggregates(&self, batch: &ImportBatch, stores: &[Store]) {
        let Some(period) = batch.sales_period() else {
            debug!("No sales imported, skipping daily cost recompute");
            return;
        };
        for store in stores {
            if let Err(e) = self
                .backend
                .recompute_daily_costs(&store.id, period.start, period.end)
                .await
            {
                warn!(
                    "Daily cost recompute failed for store {} ({} to {}): {}",
                    store.id, period.start, period.end, e
                );
            }
        }
    }
}

/// Reject batches that cannot be imported before any remote write.
fn validate_batch(batch: &ImportBatch) -> Result<()> {
    if batch.store_drafts.is_empty() {
        return Err(Error::invalid_batch("at least one store is required"));
    }

    let mut slugs = HashSet::new();
    for draft in &batch.store_drafts {
        if draft.name.trim().is_empty() {
            return Err(Error::invalid_batch("store name cannot be empty"));
        }
        let slug = draft.slug();
        if slug.is_empty() {
            return Err(Error::invalid_batch(format!(
                "store name '{}' has no usable characters",
                draft.name
            )));
        }
        if !slugs.insert(slug.clone()) {
            return Err(Error::invalid_batch(format!(
                "more than one store would use the slug '{}'",
                slug
            )));
        }
    }
    Ok(())
}

/// The store a sale belongs to: case-insensitive name match, else the first store.
fn match_store<'a>(stores: &'a [Store], record: &SaleRecord) -> &'a Store {
    let wanted = record
        .store_name
        .as_deref()
        .map(|name| name.trim().to_lowercase())
        .filter(|name| !name.is_empty());

    if let Some(ref wanted) = wanted
        && let Some(store) = stores
            .iter()
            .find(|s| s.name.trim().to_lowercase() == *wanted)
    {
        return store;
    }

    if stores.len() > 1 {
        warn!(
            "Sale of {} on {} has no matching store ({:?}), assigning to {}",
            record.product, record.sold_on, record.store_name, stores[0].name
        );
    }
    &stores[0]
}

/// A compensating delete that finds nothing to delete has done its job.
fn already_removed(result: std::result::Result<(), RemoteError>) -> Result<()> {
    match result {
        Err(e) if e.kind == RemoteErrorKind::Conflict => {
            debug!("Compensation target already gone: {}", e);
            Ok(())
        }
        other => other.map_err(Error::from),
    }
}

fn summarize(batch: &ImportBatch) -> ImportSummary {
    let total_purchases: Decimal = batch
        .invoice_records
        .iter()
        .flat_map(|invoice| invoice.lines.iter())
        .map(|line| line.total)
        .sum();
    let total_sales: Decimal = batch.sale_records.iter().map(|sale| sale.total).sum();

    ImportSummary {
        total_purchases,
        total_sales,
        period: batch.period(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{BackendStep, MockBackend};
    use larder_types::{InvoiceLine, InvoiceRecord, Period, StoreDraft};
    use rust_decimal_macros::dec;
    use time::macros::date;

    fn invoice(number: &str, issued_on: time::Date, totals: &[Decimal]) -> InvoiceRecord {
        InvoiceRecord {
            invoice_number: number.to_string(),
            supplier: "Metro".to_string(),
            issued_on,
            lines: totals
                .iter()
                .map(|total| InvoiceLine {
                    product: "Flour".to_string(),
                    quantity: dec!(1),
                    unit: "kg".to_string(),
                    unit_price: *total,
                    total: *total,
                })
                .collect(),
        }
    }

    fn sale(store: Option<&str>, sold_on: time::Date, total: Decimal) -> SaleRecord {
        SaleRecord {
            sold_on,
            store_name: store.map(str::to_string),
            product: "Baguette".to_string(),
            quantity: dec!(1),
            unit_price: total,
            total,
        }
    }

    fn batch() -> ImportBatch {
        ImportBatch {
            store_drafts: vec![StoreDraft::new("Main Street")],
            invoice_records: vec![
                invoice("INV-1", date!(2024 - 03 - 01), &[dec!(10.50), dec!(4.25)]),
                invoice("INV-2", date!(2024 - 03 - 04), &[dec!(20)]),
            ],
            sale_records: vec![
                sale(None, date!(2024 - 03 - 02), dec!(3.10)),
                sale(None, date!(2024 - 03 - 06), dec!(2.90)),
            ],
        }
    }

    fn workflow(backend: &Arc<MockBackend>) -> ImportWorkflow {
        ImportWorkflow::new(Arc::clone(backend) as Arc<dyn ImportBackend>)
            .with_compensation_retry(RetryPolicy::none())
    }

    #[tokio::test]
    async fn test_successful_import() {
        let backend = Arc::new(MockBackend::new());
        let result = workflow(&backend).run(&batch()).await.unwrap();

        assert_eq!(result.stores.len(), 1);
        assert_eq!(result.stores[0].slug, "main-street");
        assert_eq!(result.summary.total_purchases, dec!(34.75));
        assert_eq!(result.summary.total_sales, dec!(6.00));
        assert_eq!(
            result.summary.period,
            Some(Period {
                start: date!(2024 - 03 - 01),
                end: date!(2024 - 03 - 06),
            })
        );

        assert_eq!(backend.purchase_lines().len(), 3);
        assert!(
            backend
                .purchase_lines()
                .iter()
                .all(|l| l.store_id == result.stores[0].id)
        );
        assert_eq!(backend.sale_lines().len(), 2);

        let recomputes = backend.recomputes();
        assert_eq!(recomputes.len(), 1);
        assert_eq!(recomputes[0].start, date!(2024 - 03 - 02));
        assert_eq!(recomputes[0].end, date!(2024 - 03 - 06));
    }

    #[tokio::test]
    async fn test_sale_insert_failure_rolls_back_everything() {
        let backend = Arc::new(MockBackend::new());
        backend.fail_on(BackendStep::InsertSaleLines);

        let err = workflow(&backend).run(&batch()).await.unwrap_err();
        assert!(matches!(err, Error::Remote(_)));

        assert!(backend.stores().is_empty());
        assert!(backend.purchase_lines().is_empty());
        assert!(backend.sale_lines().is_empty());
    }

    #[tokio::test]
    async fn test_second_store_failure_removes_first_store() {
        let backend = Arc::new(MockBackend::new());
        backend.fail_store_creation_after(1);

        let mut b = batch();
        b.store_drafts.push(StoreDraft::new("Harbour"));

        assert!(workflow(&backend).run(&b).await.is_err());
        assert!(backend.stores().is_empty());
        assert!(backend.purchase_lines().is_empty());
    }

    #[tokio::test]
    async fn test_failed_compensation_keeps_original_error() {
        let backend = Arc::new(MockBackend::new());
        backend.fail_on(BackendStep::InsertSaleLines);
        backend.fail_on(BackendStep::DeletePurchaseLines);

        let err = workflow(&backend).run(&batch()).await.unwrap_err();
        match err {
            Error::Remote(e) => assert!(e.message.contains("InsertSaleLines")),
            other => panic!("unexpected error: {other}"),
        }

        // Compensation for purchases failed; the store was still removed.
        assert_eq!(backend.purchase_lines().len(), 3);
        assert!(backend.stores().is_empty());
    }

    #[tokio::test]
    async fn test_deleting_missing_entity_counts_as_compensated() {
        let backend = Arc::new(MockBackend::new());
        let mut saga = Saga::new("import").with_retry(RetryPolicy::none());
        let b = Arc::clone(&backend);
        saga.register("delete store store-404", move || {
            let b = Arc::clone(&b);
            async move { already_removed(b.delete_store(&"store-404".into()).await) }
        });

        assert!(saga.compensate().await.is_empty());
    }

    #[test]
    fn test_already_removed_keeps_other_failures() {
        assert!(already_removed(Ok(())).is_ok());
        assert!(already_removed(Err(RemoteError::conflict("gone"))).is_ok());
        assert!(matches!(
            already_removed(Err(RemoteError::transient("503"))),
            Err(Error::Remote(e)) if e.kind == RemoteErrorKind::Transient
        ));
        assert!(already_removed(Err(RemoteError::validation("bad id"))).is_err());
    }

    #[tokio::test]
    async fn test_recompute_failure_does_not_roll_back() {
        let backend = Arc::new(MockBackend::new());
        backend.fail_on(BackendStep::RecomputeDailyCosts);

        let result = workflow(&backend).run(&batch()).await.unwrap();
        assert_eq!(result.stores.len(), 1);
        assert_eq!(backend.stores().len(), 1);
        assert_eq!(backend.sale_lines().len(), 2);
    }

    #[tokio::test]
    async fn test_sales_matched_to_store_by_name() {
        let backend = Arc::new(MockBackend::new());
        let b = ImportBatch {
            store_drafts: vec![StoreDraft::new("Main Street"), StoreDraft::new("Harbour")],
            invoice_records: vec![],
            sale_records: vec![
                sale(Some("  harbour "), date!(2024 - 03 - 02), dec!(1)),
                sale(Some("MAIN STREET"), date!(2024 - 03 - 02), dec!(1)),
                sale(Some("Unknown"), date!(2024 - 03 - 02), dec!(1)),
            ],
        };

        let result = workflow(&backend).run(&b).await.unwrap();
        let main = &result.stores[0].id;
        let harbour = &result.stores[1].id;

        let sales = backend.sale_lines();
        assert_eq!(&sales[0].store_id, harbour);
        assert_eq!(&sales[1].store_id, main);
        assert_eq!(&sales[2].store_id, main);
        assert_eq!(backend.recomputes().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_batches_make_no_writes() {
        let backend = Arc::new(MockBackend::new());
        let wf = workflow(&backend);

        let empty = ImportBatch::default();
        assert!(matches!(wf.run(&empty).await, Err(Error::InvalidBatch(_))));

        let mut blank = batch();
        blank.store_drafts = vec![StoreDraft::new("   ")];
        assert!(matches!(wf.run(&blank).await, Err(Error::InvalidBatch(_))));

        let mut dup = batch();
        dup.store_drafts = vec![StoreDraft::new("Café Rouge"), StoreDraft::new("cafe rouge")];
        assert!(matches!(wf.run(&dup).await, Err(Error::InvalidBatch(_))));

        assert!(backend.stores().is_empty());
    }

    #[tokio::test]
    async fn test_batch_without_lines() {
        let backend = Arc::new(MockBackend::new());
        let b = ImportBatch {
            store_drafts: vec![StoreDraft::new("Solo")],
            ..ImportBatch::default()
        };

        let result = workflow(&backend).run(&b).await.unwrap();
        assert_eq!(result.summary.total_purchases, Decimal::ZERO);
        assert_eq!(result.summary.period, None);
        assert!(backend.recomputes().is_empty());
    }
}
