//! Sales service.

use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Utc};
use common::{BuyerId, InvoiceId, InvoiceStatus, Money, ProcessingBatchId, SaleId, UserId};
use serde::Serialize;
use store::{
    Animal, AnimalStore, BatchSale, BatchStore, Buyer, BuyerSelection, Invoice, InvoiceItem, NewBuyer,
    NewInvoice, NewInvoiceItem, NewSale, NewYield, ProcessingBatch, ProcessingYield,
    RecordedSale, SalesStore, StoreError, YieldOutcome, constraint,
};

use super::invoice::{INVOICE_TERMS, invoice_item_description, invoice_number};
use super::{RecordSale, RecordYield, SalesError};
use crate::documents::render::{self, PdfFile, PdfRenderer};
use crate::error::DomainError;
use crate::pipeline::{optional, required};

/// Result of a sale submission.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SaleOutcome {
    Recorded(RecordedSale),
    /// The batch was already sold; carries the existing sale.
    AlreadyRecorded(BatchSale),
}

impl SaleOutcome {
    pub fn sale(&self) -> &BatchSale {
        match self {
            SaleOutcome::Recorded(recorded) => &recorded.sale,
            SaleOutcome::AlreadyRecorded(sale) => sale,
        }
    }
}

/// Result of an invoice request.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", content = "invoice", rename_all = "snake_case")]
pub enum InvoiceOutcome {
    Generated(Invoice),
    /// The sale already had an invoice.
    Existing(Invoice),
}

impl InvoiceOutcome {
    pub fn invoice(&self) -> &Invoice {
        match self {
            InvoiceOutcome::Generated(invoice) | InvoiceOutcome::Existing(invoice) => invoice,
        }
    }
}

/// An invoice with everything needed to print it.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceView {
    pub invoice: Invoice,
    pub items: Vec<InvoiceItem>,
    pub buyer: Buyer,
    pub sale: BatchSale,
}

/// A processing batch with its members, yield, sale and invoice.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOverview {
    pub batch: ProcessingBatch,
    pub animals: Vec<Animal>,
    pub yield_record: Option<ProcessingYield>,
    pub sale: Option<BatchSale>,
    pub invoice: Option<Invoice>,
}

/// Service for yield, sale and invoice handling.
pub struct SalesService<S> {
    store: S,
    renderer: Arc<dyn PdfRenderer>,
    currency: String,
}

impl<S: AnimalStore + BatchStore + SalesStore> SalesService<S> {
    /// Creates a new sales service.
    pub fn new(store: S, renderer: Arc<dyn PdfRenderer>, currency: impl Into<String>) -> Self {
        Self {
            store,
            renderer,
            currency: currency.into(),
        }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    async fn processing_batch(&self, id: ProcessingBatchId) -> Result<ProcessingBatch, DomainError> {
        self.store
            .get_processing_batch(id)
            .await?
            .ok_or_else(|| DomainError::not_found("ProcessingBatch", id))
    }

    /// Everything known about a processing batch.
    pub async fn batch_overview(&self, id: ProcessingBatchId) -> Result<BatchOverview, DomainError> {
        let batch = self.processing_batch(id).await?;
        let animals = self.store.processing_members(id).await?;
        let yield_record = self.store.get_yield(id).await?;
        let sale = self.store.get_sale_for_batch(id).await?;
        let invoice = match &sale {
            Some(sale) => self.store.get_invoice_for_sale(sale.id).await?,
            None => None,
        };

        Ok(BatchOverview {
            batch,
            animals,
            yield_record,
            sale,
            invoice,
        })
    }

    /// Records the batch yield, moving every `processing` member to `processed`.
    #[tracing::instrument(skip(self))]
    pub async fn record_yield(&self, cmd: RecordYield) -> Result<YieldOutcome, DomainError> {
        let weight = cmd.total_carcass_weight_kg;
        if !(weight.is_finite() && weight > 0.0) {
            return Err(SalesError::InvalidCarcassWeight(weight).into());
        }
        self.processing_batch(cmd.batch_id).await?;

        let record = NewYield {
            processing_batch_id: cmd.batch_id,
            total_carcass_weight_kg: weight,
            parts_included_in_batch_sale: cmd.parts_included_in_batch_sale,
            parts_sold_separately: cmd.parts_sold_separately,
            parts_notes: optional(cmd.parts_notes),
            recorded_by: cmd.recorded_by,
        };

        match self.store.record_yield(record).await {
            Ok(outcome) => {
                tracing::info!(
                    batch_id = %cmd.batch_id,
                    processed = outcome.processed.len(),
                    "yield recorded"
                );
                Ok(outcome)
            }
            Err(err) if err.is_conflict_on(constraint::YIELD_PER_BATCH) => {
                Err(SalesError::YieldAlreadyRecorded(cmd.batch_id).into())
            }
            Err(err) => Err(err.into()),
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn create_buyer(&self, buyer: NewBuyer) -> Result<Buyer, DomainError> {
        let buyer = normalize_buyer(buyer)?;
        Ok(self.store.create_buyer(buyer).await?)
    }

    pub async fn get_buyer(&self, id: BuyerId) -> Result<Buyer, DomainError> {
        self.store
            .get_buyer(id)
            .await?
            .ok_or_else(|| DomainError::not_found("Buyer", id))
    }

    pub async fn list_buyers(&self) -> Result<Vec<Buyer>, DomainError> {
        Ok(self.store.list_buyers().await?)
    }

    /// Records the sale of a processing batch.
    ///
    /// Requires the yield to be recorded first. A batch that is already sold,
    /// whether found up front or by losing a race on insert, yields
    /// [`SaleOutcome::AlreadyRecorded`] with the existing sale.
    #[tracing::instrument(skip(self))]
    pub async fn record_sale(&self, cmd: RecordSale) -> Result<SaleOutcome, DomainError> {
        let batch_id = cmd.batch_id;
        self.processing_batch(batch_id).await?;

        if let Some(existing) = self.store.get_sale_for_batch(batch_id).await? {
            metrics::counter!("sales_duplicate_submissions").increment(1);
            return Ok(SaleOutcome::AlreadyRecorded(existing));
        }
        if self.store.get_yield(batch_id).await?.is_none() {
            return Err(SalesError::YieldRequired(batch_id).into());
        }
        if !cmd.price.is_positive() {
            return Err(SalesError::InvalidPrice.into());
        }

        let buyer = match cmd.buyer {
            BuyerSelection::Existing(id) => {
                self.get_buyer(id).await?;
                BuyerSelection::Existing(id)
            }
            BuyerSelection::New(new) => BuyerSelection::New(normalize_buyer(new)?),
        };

        let sale = NewSale {
            processing_batch_id: batch_id,
            buyer,
            sale_date: cmd.sale_date.unwrap_or_else(|| Utc::now().date_naive()),
            price: cmd.price,
            currency: optional(cmd.currency).unwrap_or_else(|| self.currency.clone()),
            notes: optional(cmd.notes),
            created_by: cmd.created_by,
        };

        match self.store.record_sale(sale).await {
            Ok(recorded) => {
                metrics::counter!("sales_recorded").increment(1);
                tracing::info!(
                    batch_id = %batch_id,
                    sale_id = %recorded.sale.id,
                    sold = recorded.sold.len(),
                    "sale recorded"
                );
                Ok(SaleOutcome::Recorded(recorded))
            }
            Err(err) if err.is_conflict_on(constraint::SALE_PER_BATCH) => {
                metrics::counter!("sales_duplicate_submissions").increment(1);
                tracing::info!(batch_id = %batch_id, "concurrent sale submission, using existing sale");
                let existing = self
                    .store
                    .get_sale_for_batch(batch_id)
                    .await?
                    .ok_or(err)?;
                Ok(SaleOutcome::AlreadyRecorded(existing))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get_sale(&self, id: SaleId) -> Result<BatchSale, DomainError> {
        self.store
            .get_sale(id)
            .await?
            .ok_or_else(|| DomainError::not_found("Sale", id))
    }

    /// Generates the invoice for a sale, or returns the one it already has.
    ///
    /// The invoice is issued immediately with one "1 lot" line at the sale
    /// price and no tax. If the allocated number is taken the generator tries
    /// once more with a fresh number.
    #[tracing::instrument(skip(self))]
    pub async fn generate_invoice(
        &self,
        sale_id: SaleId,
        created_by: Option<UserId>,
    ) -> Result<InvoiceOutcome, DomainError> {
        let sale = self.get_sale(sale_id).await?;
        if let Some(existing) = self.store.get_invoice_for_sale(sale_id).await? {
            return Ok(InvoiceOutcome::Existing(existing));
        }

        let batch = self.processing_batch(sale.processing_batch_id).await?;
        let yield_record = self.store.get_yield(batch.id).await?;
        let issue_date = Utc::now().date_naive();
        let item = NewInvoiceItem {
            description: invoice_item_description(&batch, yield_record.as_ref()),
            quantity: 1,
            unit_price: sale.price,
            line_total: sale.price,
        };

        let mut retried = false;
        loop {
            let number = self.allocate_invoice_number(issue_date).await?;
            let invoice = NewInvoice {
                invoice_number: number.clone(),
                sale_id,
                buyer_id: sale.buyer_id,
                issue_date,
                due_date: None,
                currency: sale.currency.clone(),
                subtotal: sale.price,
                tax: Money::zero(),
                total: sale.price,
                status: InvoiceStatus::Issued,
                notes: sale.notes.clone(),
                terms: Some(INVOICE_TERMS.to_string()),
                created_by,
            };

            match self.store.create_invoice(invoice, vec![item.clone()]).await {
                Ok(invoice) => {
                    metrics::counter!("invoices_generated").increment(1);
                    tracing::info!(sale_id = %sale_id, number = %invoice.invoice_number, "invoice generated");
                    return Ok(InvoiceOutcome::Generated(invoice));
                }
                Err(err) if err.is_conflict_on(constraint::INVOICE_NUMBER) => {
                    if retried {
                        return Err(SalesError::InvoiceNumberUnavailable.into());
                    }
                    metrics::counter!("invoice_number_retries").increment(1);
                    tracing::warn!(%number, "invoice number taken, retrying once");
                    retried = true;
                }
                Err(err) if err.is_conflict_on(constraint::INVOICE_PER_SALE) => {
                    let existing = self.store.get_invoice_for_sale(sale_id).await?.ok_or(err)?;
                    return Ok(InvoiceOutcome::Existing(existing));
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn allocate_invoice_number(&self, issue_date: NaiveDate) -> Result<String, StoreError> {
        let year = issue_date.year();
        let seq = self.store.next_sequence(&format!("invoice:{year}")).await?;
        Ok(invoice_number(year, seq))
    }

    pub async fn get_invoice(&self, id: InvoiceId) -> Result<InvoiceView, DomainError> {
        let invoice = self
            .store
            .get_invoice(id)
            .await?
            .ok_or_else(|| DomainError::not_found("Invoice", id))?;
        let items = self.store.invoice_items(id).await?;
        let buyer = self.get_buyer(invoice.buyer_id).await?;
        let sale = self.get_sale(invoice.sale_id).await?;

        Ok(InvoiceView {
            invoice,
            items,
            buyer,
            sale,
        })
    }

    /// Moves an invoice along `draft -> {issued, void}`, `issued -> {paid, void}`.
    #[tracing::instrument(skip(self))]
    pub async fn transition_invoice(
        &self,
        id: InvoiceId,
        target: InvoiceStatus,
    ) -> Result<Invoice, DomainError> {
        let current = self
            .store
            .get_invoice(id)
            .await?
            .ok_or_else(|| DomainError::not_found("Invoice", id))?;
        if !current.status.can_transition_to(target) {
            return Err(SalesError::InvalidInvoiceTransition {
                from: current.status,
                to: target,
            }
            .into());
        }

        match self
            .store
            .update_invoice_status(id, current.status, target, Utc::now())
            .await?
        {
            Some(updated) => Ok(updated),
            None => {
                // Someone else moved it first; report against the fresh status.
                let fresh = self
                    .store
                    .get_invoice(id)
                    .await?
                    .ok_or_else(|| DomainError::not_found("Invoice", id))?;
                Err(SalesError::InvalidInvoiceTransition {
                    from: fresh.status,
                    to: target,
                }
                .into())
            }
        }
    }

    /// Renders the invoice through the PDF port. Invoices are never persisted
    /// as files.
    #[tracing::instrument(skip(self))]
    pub async fn invoice_pdf(&self, id: InvoiceId) -> Result<PdfFile, DomainError> {
        let view = self.get_invoice(id).await?;
        let html = render::invoice_html(&view);
        let bytes = self.renderer.render(&html).await?;
        Ok(PdfFile {
            filename: format!("{}.pdf", view.invoice.invoice_number),
            content_type: self.renderer.content_type(),
            bytes,
        })
    }
}

fn normalize_buyer(buyer: NewBuyer) -> Result<NewBuyer, SalesError> {
    let name = required(buyer.name, "Buyer name").map_err(|_| SalesError::BuyerNameRequired)?;
    Ok(NewBuyer {
        name,
        phone: optional(buyer.phone),
        email: optional(buyer.email),
        address: optional(buyer.address),
        tax_pin: optional(buyer.tax_pin),
    })
}
