use async_trait::async_trait;
use common::{
    AggregationBatchId, AnimalId, BuyerId, DocumentId, FarmerId, InvoiceId, InvoiceStatus,
    ProcessingBatchId, SaleId, Species,
};
use chrono::{DateTime, Utc};

use crate::records::{
    AggregationBatch, AggregationIntake, AggregationOutcome, Animal, AnimalFilter, BatchSale,
    Buyer, Document, DocumentFilter, DocumentSignature, DocumentWrite, Farmer, Invoice,
    InvoiceItem, NewAggregationBatch, NewAnimal, NewBuyer, NewDocument, NewFarmer, NewInvoice,
    NewInvoiceItem, NewProcessingBatch, NewSale, NewYield, ProcessingBatch, ProcessingOutcome,
    ProcessingYield, RecordedSale, TokenState, YieldOutcome,
};
use crate::{Result, StoreError};

/// Farmers, animals and the named counters used for human-readable codes.
#[async_trait]
pub trait AnimalStore: Send + Sync {
    async fn create_farmer(&self, farmer: NewFarmer) -> Result<Farmer>;

    async fn get_farmer(&self, id: FarmerId) -> Result<Option<Farmer>>;

    async fn list_farmers(&self) -> Result<Vec<Farmer>>;

    /// Atomically increments the named counter and returns the new value.
    ///
    /// The first call for a name returns 1.
    async fn next_sequence(&self, name: &str) -> Result<i64>;

    /// Inserts a new animal in `on_farm`.
    ///
    /// Fails with a conflict on `animals_code_key` if the code is taken.
    async fn insert_animal(&self, animal: NewAnimal) -> Result<Animal>;

    async fn get_animal(&self, id: AnimalId) -> Result<Option<Animal>>;

    /// Lists animals matching the filter, oldest first.
    async fn list_animals(&self, filter: AnimalFilter) -> Result<Vec<Animal>>;
}

/// Aggregation and processing batches, and the yield that closes processing.
#[async_trait]
pub trait BatchStore: Send + Sync {
    /// Creates an aggregation batch and attaches every qualifying animal.
    ///
    /// An animal qualifies if it is of the batch species, `on_farm` and not yet
    /// in an aggregation batch, re-checked inside the transaction. Qualifying
    /// animals get their intake data stamped and move to `aggregated`; the rest
    /// are skipped. Returns `None`, with nothing persisted, when no animal
    /// qualifies.
    async fn create_aggregation_batch(
        &self,
        batch: NewAggregationBatch,
        intakes: Vec<AggregationIntake>,
    ) -> Result<Option<AggregationOutcome>>;

    async fn get_aggregation_batch(
        &self,
        id: AggregationBatchId,
    ) -> Result<Option<AggregationBatch>>;

    async fn list_aggregation_batches(
        &self,
        species: Option<Species>,
    ) -> Result<Vec<AggregationBatch>>;

    async fn aggregation_members(&self, id: AggregationBatchId) -> Result<Vec<Animal>>;

    /// Creates a processing batch and attaches every `aggregated` animal of the
    /// batch species, moving each to `processing`. Returns `None`, with nothing
    /// persisted, when no animal qualifies.
    async fn create_processing_batch(
        &self,
        batch: NewProcessingBatch,
        animal_ids: Vec<AnimalId>,
    ) -> Result<Option<ProcessingOutcome>>;

    async fn get_processing_batch(&self, id: ProcessingBatchId)
    -> Result<Option<ProcessingBatch>>;

    async fn list_processing_batches(
        &self,
        species: Option<Species>,
    ) -> Result<Vec<ProcessingBatch>>;

    async fn processing_members(&self, id: ProcessingBatchId) -> Result<Vec<Animal>>;

    /// Records the batch yield and moves its `processing` members to `processed`.
    ///
    /// Fails with a conflict on `processing_yields_batch_key` if the batch
    /// already has a yield.
    async fn record_yield(&self, record: NewYield) -> Result<YieldOutcome>;

    async fn get_yield(&self, batch_id: ProcessingBatchId) -> Result<Option<ProcessingYield>>;
}

/// Buyers, batch sales and invoices.
#[async_trait]
pub trait SalesStore: Send + Sync {
    async fn create_buyer(&self, buyer: NewBuyer) -> Result<Buyer>;

    async fn get_buyer(&self, id: BuyerId) -> Result<Option<Buyer>>;

    async fn list_buyers(&self) -> Result<Vec<Buyer>>;

    /// Records the sale of a processing batch in one transaction: creates the
    /// buyer if new, inserts the sale and moves `processed`/`processing`
    /// members to `sold`.
    ///
    /// Fails with a conflict on `processing_batch_sales_batch_key` if the batch
    /// was already sold.
    async fn record_sale(&self, sale: NewSale) -> Result<RecordedSale>;

    async fn get_sale(&self, id: SaleId) -> Result<Option<BatchSale>>;

    async fn get_sale_for_batch(&self, batch_id: ProcessingBatchId) -> Result<Option<BatchSale>>;

    /// Inserts an invoice with its items.
    ///
    /// Fails with a conflict on `invoices_number_key` or `invoices_sale_key`.
    async fn create_invoice(
        &self,
        invoice: NewInvoice,
        items: Vec<NewInvoiceItem>,
    ) -> Result<Invoice>;

    async fn get_invoice(&self, id: InvoiceId) -> Result<Option<Invoice>>;

    async fn get_invoice_for_sale(&self, sale_id: SaleId) -> Result<Option<Invoice>>;

    async fn invoice_items(&self, id: InvoiceId) -> Result<Vec<InvoiceItem>>;

    /// Moves the invoice from `expected` to `target`, stamping the matching
    /// timestamp. Returns `None` if the invoice is no longer in `expected`.
    async fn update_invoice_status(
        &self,
        id: InvoiceId,
        expected: InvoiceStatus,
        target: InvoiceStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Invoice>>;
}

/// Contract documents and their signatures.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Inserts a draft document, resolving its version with
    /// [`pick_document_version`](crate::pick_document_version).
    async fn insert_document(&self, document: NewDocument) -> Result<Document>;

    async fn get_document(&self, id: DocumentId) -> Result<Option<Document>>;

    /// Lists documents matching the filter, newest first.
    async fn list_documents(&self, filter: DocumentFilter) -> Result<Vec<Document>>;

    /// Finds the document whose active or consumed token hash equals `hash`.
    async fn find_by_token_hash(&self, hash: &str) -> Result<Option<(Document, TokenState)>>;

    /// Signatures recorded on a document, oldest first.
    async fn signatures(&self, id: DocumentId) -> Result<Vec<DocumentSignature>>;

    /// Locks the document row, lets `decide` inspect the locked state and
    /// applies the write it returns in the same transaction.
    ///
    /// `decide` sees the document and its signatures as they are under the
    /// lock, so checks made there cannot race with another writer. A second
    /// buyer signature is rejected with a conflict on
    /// `document_signatures_one_buyer` regardless of what `decide` returns.
    async fn update_document<T, E, F>(&self, id: DocumentId, decide: F) -> std::result::Result<T, E>
    where
        T: Send,
        E: From<StoreError> + Send,
        F: FnOnce(&Document, &[DocumentSignature]) -> std::result::Result<(DocumentWrite, T), E>
            + Send;
}

/// Every store concern behind one bound.
pub trait Store:
    AnimalStore + BatchStore + SalesStore + DocumentStore + Clone + Send + Sync + 'static
{
}

impl<T> Store for T where
    T: AnimalStore + BatchStore + SalesStore + DocumentStore + Clone + Send + Sync + 'static
{
}
