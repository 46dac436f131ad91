use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    AggregationBatchId, AnimalId, AnimalStatus, BuyerId, DocumentId, FarmerId, InvoiceId,
    InvoiceStatus, ProcessingBatchId, SaleId, SignerType, Species, YieldId,
};
use tokio::sync::RwLock;

use crate::error::constraint;
use crate::records::{
    AggregationBatch, AggregationIntake, AggregationOutcome, Animal, AnimalFilter, BatchSale,
    Buyer, BuyerSelection, Document, DocumentFilter, DocumentSignature, DocumentWrite, Farmer,
    Invoice, InvoiceItem, NewAggregationBatch, NewAnimal, NewBuyer, NewDocument, NewFarmer,
    NewInvoice, NewInvoiceItem, NewProcessingBatch, NewSale, NewYield, ProcessingBatch,
    ProcessingOutcome, ProcessingYield, RecordedSale, SigningLinkWrite, TokenState, YieldOutcome,
    pick_document_version,
};
use crate::store::{AnimalStore, BatchStore, DocumentStore, SalesStore};
use crate::{Result, StoreError};

/// In-memory store for tests and local runs.
///
/// All state sits behind one lock, so every mutating method is atomic with
/// respect to every other.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    sequences: HashMap<String, i64>,
    farmers: Vec<Farmer>,
    animals: Vec<Animal>,
    aggregation_batches: Vec<AggregationBatch>,
    processing_batches: Vec<ProcessingBatch>,
    processing_members: Vec<(ProcessingBatchId, AnimalId)>,
    yields: Vec<ProcessingYield>,
    buyers: Vec<Buyer>,
    sales: Vec<BatchSale>,
    invoices: Vec<Invoice>,
    invoice_items: Vec<InvoiceItem>,
    documents: Vec<Document>,
    signatures: Vec<DocumentSignature>,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn animal_mut(&mut self, id: AnimalId) -> Option<&mut Animal> {
        self.animals.iter_mut().find(|a| a.id == id)
    }

    fn members_of(&self, batch_id: ProcessingBatchId) -> Vec<AnimalId> {
        self.processing_members
            .iter()
            .filter(|(b, _)| *b == batch_id)
            .map(|(_, a)| *a)
            .collect()
    }

    /// Moves members of `batch_id` whose status is in `from` to `to`.
    fn advance_members(
        &mut self,
        batch_id: ProcessingBatchId,
        from: &[AnimalStatus],
        to: AnimalStatus,
    ) -> Vec<AnimalId> {
        let members = self.members_of(batch_id);
        let mut advanced = Vec::new();
        for animal in self.animals.iter_mut() {
            if members.contains(&animal.id) && from.contains(&animal.status) {
                animal.status = to;
                advanced.push(animal.id);
            }
        }
        advanced
    }

    fn insert_buyer(&mut self, buyer: NewBuyer) -> Buyer {
        let record = Buyer {
            id: BuyerId::new(self.next_id()),
            name: buyer.name,
            phone: buyer.phone,
            email: buyer.email,
            address: buyer.address,
            tax_pin: buyer.tax_pin,
            created_at: Utc::now(),
        };
        self.buyers.push(record.clone());
        record
    }
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears all state.
    pub async fn clear(&self) {
        *self.state.write().await = MemoryState::default();
    }
}

#[async_trait]
impl AnimalStore for InMemoryStore {
    async fn create_farmer(&self, farmer: NewFarmer) -> Result<Farmer> {
        let mut state = self.state.write().await;
        let record = Farmer {
            id: FarmerId::new(state.next_id()),
            name: farmer.name,
            phone: farmer.phone,
            county: farmer.county,
            ward: farmer.ward,
            village: farmer.village,
            created_at: Utc::now(),
        };
        state.farmers.push(record.clone());
        Ok(record)
    }

    async fn get_farmer(&self, id: FarmerId) -> Result<Option<Farmer>> {
        let state = self.state.read().await;
        Ok(state.farmers.iter().find(|f| f.id == id).cloned())
    }

    async fn list_farmers(&self) -> Result<Vec<Farmer>> {
        Ok(self.state.read().await.farmers.clone())
    }

    async fn next_sequence(&self, name: &str) -> Result<i64> {
        let mut state = self.state.write().await;
        let value = state.sequences.entry(name.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    async fn insert_animal(&self, animal: NewAnimal) -> Result<Animal> {
        let mut state = self.state.write().await;
        if state.farmers.iter().all(|f| f.id != animal.farmer_id) {
            return Err(StoreError::not_found("Farmer", animal.farmer_id));
        }
        if state.animals.iter().any(|a| a.code == animal.code) {
            return Err(StoreError::conflict(constraint::ANIMAL_CODE));
        }

        let record = Animal {
            id: AnimalId::new(),
            code: animal.code,
            species: animal.species,
            farmer_id: animal.farmer_id,
            sex: animal.sex,
            breed: animal.breed,
            estimated_dob: animal.estimated_dob,
            status: AnimalStatus::OnFarm,
            aggregation_batch_id: None,
            live_weight_kg: None,
            weight_method: None,
            purchase_price: None,
            purchase_currency: None,
            aggregated_at: None,
            aggregated_by: None,
            created_at: Utc::now(),
        };
        state.animals.push(record.clone());
        Ok(record)
    }

    async fn get_animal(&self, id: AnimalId) -> Result<Option<Animal>> {
        let state = self.state.read().await;
        Ok(state.animals.iter().find(|a| a.id == id).cloned())
    }

    async fn list_animals(&self, filter: AnimalFilter) -> Result<Vec<Animal>> {
        let state = self.state.read().await;
        Ok(state
            .animals
            .iter()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl BatchStore for InMemoryStore {
    async fn create_aggregation_batch(
        &self,
        batch: NewAggregationBatch,
        intakes: Vec<AggregationIntake>,
    ) -> Result<Option<AggregationOutcome>> {
        let mut state = self.state.write().await;
        let batch_id = AggregationBatchId::new(state.next_id());
        let now = Utc::now();

        let mut attached = Vec::new();
        let mut skipped = Vec::new();
        for intake in intakes {
            match state.animal_mut(intake.animal_id) {
                Some(animal) if animal.qualifies_for_aggregation(batch.species) => {
                    animal.aggregation_batch_id = Some(batch_id);
                    animal.live_weight_kg = intake.live_weight_kg;
                    animal.weight_method = Some(intake.weight_method);
                    animal.purchase_price = intake.purchase_price;
                    animal.purchase_currency = Some(intake.currency);
                    animal.aggregated_at = Some(now);
                    animal.aggregated_by = batch.created_by;
                    animal.status = AnimalStatus::Aggregated;
                    attached.push(animal.id);
                }
                _ => skipped.push(intake.animal_id),
            }
        }

        // Nothing was touched when no animal qualified.
        if attached.is_empty() {
            return Ok(None);
        }

        let record = AggregationBatch {
            id: batch_id,
            species: batch.species,
            site_name: batch.site_name,
            received_on: batch.received_on,
            is_locked: false,
            created_by: batch.created_by,
            created_at: now,
        };
        state.aggregation_batches.push(record.clone());

        Ok(Some(AggregationOutcome {
            batch: record,
            attached,
            skipped,
        }))
    }

    async fn get_aggregation_batch(
        &self,
        id: AggregationBatchId,
    ) -> Result<Option<AggregationBatch>> {
        let state = self.state.read().await;
        Ok(state.aggregation_batches.iter().find(|b| b.id == id).cloned())
    }

    async fn list_aggregation_batches(
        &self,
        species: Option<Species>,
    ) -> Result<Vec<AggregationBatch>> {
        let state = self.state.read().await;
        Ok(state
            .aggregation_batches
            .iter()
            .rev()
            .filter(|b| species.is_none_or(|s| s == b.species))
            .cloned()
            .collect())
    }

    async fn aggregation_members(&self, id: AggregationBatchId) -> Result<Vec<Animal>> {
        let state = self.state.read().await;
        Ok(state
            .animals
            .iter()
            .filter(|a| a.aggregation_batch_id == Some(id))
            .cloned()
            .collect())
    }

    async fn create_processing_batch(
        &self,
        batch: NewProcessingBatch,
        animal_ids: Vec<AnimalId>,
    ) -> Result<Option<ProcessingOutcome>> {
        let mut state = self.state.write().await;
        let batch_id = ProcessingBatchId::new(state.next_id());

        let mut attached = Vec::new();
        let mut skipped = Vec::new();
        for id in animal_ids {
            match state.animal_mut(id) {
                Some(animal) if animal.qualifies_for_processing(batch.species) => {
                    animal.status = AnimalStatus::Processing;
                    attached.push(id);
                }
                _ => skipped.push(id),
            }
        }

        if attached.is_empty() {
            return Ok(None);
        }

        let record = ProcessingBatch {
            id: batch_id,
            species: batch.species,
            facility: batch.facility,
            slaughter_date: batch.slaughter_date,
            halal_cert_ref: batch.halal_cert_ref,
            created_by: batch.created_by,
            created_at: Utc::now(),
        };
        state
            .processing_members
            .extend(attached.iter().map(|id| (batch_id, *id)));
        state.processing_batches.push(record.clone());

        Ok(Some(ProcessingOutcome {
            batch: record,
            attached,
            skipped,
        }))
    }

    async fn get_processing_batch(
        &self,
        id: ProcessingBatchId,
    ) -> Result<Option<ProcessingBatch>> {
        let state = self.state.read().await;
        Ok(state.processing_batches.iter().find(|b| b.id == id).cloned())
    }

    async fn list_processing_batches(
        &self,
        species: Option<Species>,
    ) -> Result<Vec<ProcessingBatch>> {
        let state = self.state.read().await;
        Ok(state
            .processing_batches
            .iter()
            .rev()
            .filter(|b| species.is_none_or(|s| s == b.species))
            .cloned()
            .collect())
    }

    async fn processing_members(&self, id: ProcessingBatchId) -> Result<Vec<Animal>> {
        let state = self.state.read().await;
        let members = state.members_of(id);
        Ok(state
            .animals
            .iter()
            .filter(|a| members.contains(&a.id))
            .cloned()
            .collect())
    }

    async fn record_yield(&self, record: NewYield) -> Result<YieldOutcome> {
        let mut state = self.state.write().await;
        let batch_id = record.processing_batch_id;
        if state.processing_batches.iter().all(|b| b.id != batch_id) {
            return Err(StoreError::not_found("ProcessingBatch", batch_id));
        }
        if state.yields.iter().any(|y| y.processing_batch_id == batch_id) {
            return Err(StoreError::conflict(constraint::YIELD_PER_BATCH));
        }

        let stored = ProcessingYield {
            id: YieldId::new(state.next_id()),
            processing_batch_id: batch_id,
            total_carcass_weight_kg: record.total_carcass_weight_kg,
            parts_included_in_batch_sale: record.parts_included_in_batch_sale,
            parts_sold_separately: record.parts_sold_separately,
            parts_notes: record.parts_notes,
            recorded_by: record.recorded_by,
            recorded_at: Utc::now(),
        };
        state.yields.push(stored.clone());
        let processed =
            state.advance_members(batch_id, &[AnimalStatus::Processing], AnimalStatus::Processed);

        Ok(YieldOutcome {
            record: stored,
            processed,
        })
    }

    async fn get_yield(&self, batch_id: ProcessingBatchId) -> Result<Option<ProcessingYield>> {
        let state = self.state.read().await;
        Ok(state
            .yields
            .iter()
            .find(|y| y.processing_batch_id == batch_id)
            .cloned())
    }
}

#[async_trait]
impl SalesStore for InMemoryStore {
    async fn create_buyer(&self, buyer: NewBuyer) -> Result<Buyer> {
        Ok(self.state.write().await.insert_buyer(buyer))
    }

    async fn get_buyer(&self, id: BuyerId) -> Result<Option<Buyer>> {
        let state = self.state.read().await;
        Ok(state.buyers.iter().find(|b| b.id == id).cloned())
    }

    async fn list_buyers(&self) -> Result<Vec<Buyer>> {
        Ok(self.state.read().await.buyers.clone())
    }

    async fn record_sale(&self, sale: NewSale) -> Result<RecordedSale> {
        let mut state = self.state.write().await;
        let batch_id = sale.processing_batch_id;
        if state.processing_batches.iter().all(|b| b.id != batch_id) {
            return Err(StoreError::not_found("ProcessingBatch", batch_id));
        }
        if state.sales.iter().any(|s| s.processing_batch_id == batch_id) {
            return Err(StoreError::conflict(constraint::SALE_PER_BATCH));
        }

        let buyer = match sale.buyer {
            BuyerSelection::Existing(id) => state
                .buyers
                .iter()
                .find(|b| b.id == id)
                .cloned()
                .ok_or_else(|| StoreError::not_found("Buyer", id))?,
            BuyerSelection::New(new) => state.insert_buyer(new),
        };

        let record = BatchSale {
            id: SaleId::new(state.next_id()),
            processing_batch_id: batch_id,
            buyer_id: buyer.id,
            sale_date: sale.sale_date,
            price: sale.price,
            currency: sale.currency,
            notes: sale.notes,
            created_by: sale.created_by,
            created_at: Utc::now(),
        };
        state.sales.push(record.clone());
        let sold = state.advance_members(
            batch_id,
            &[AnimalStatus::Processed, AnimalStatus::Processing],
            AnimalStatus::Sold,
        );

        Ok(RecordedSale {
            sale: record,
            buyer,
            sold,
        })
    }

    async fn get_sale(&self, id: SaleId) -> Result<Option<BatchSale>> {
        let state = self.state.read().await;
        Ok(state.sales.iter().find(|s| s.id == id).cloned())
    }

    async fn get_sale_for_batch(&self, batch_id: ProcessingBatchId) -> Result<Option<BatchSale>> {
        let state = self.state.read().await;
        Ok(state
            .sales
            .iter()
            .find(|s| s.processing_batch_id == batch_id)
            .cloned())
    }

    async fn create_invoice(
        &self,
        invoice: NewInvoice,
        items: Vec<NewInvoiceItem>,
    ) -> Result<Invoice> {
        let mut state = self.state.write().await;
        if state
            .invoices
            .iter()
            .any(|i| i.invoice_number == invoice.invoice_number)
        {
            return Err(StoreError::conflict(constraint::INVOICE_NUMBER));
        }
        if state.invoices.iter().any(|i| i.sale_id == invoice.sale_id) {
            return Err(StoreError::conflict(constraint::INVOICE_PER_SALE));
        }

        let now = Utc::now();
        let record = Invoice {
            id: InvoiceId::new(state.next_id()),
            invoice_number: invoice.invoice_number,
            sale_id: invoice.sale_id,
            buyer_id: invoice.buyer_id,
            issue_date: invoice.issue_date,
            due_date: invoice.due_date,
            currency: invoice.currency,
            subtotal: invoice.subtotal,
            tax: invoice.tax,
            total: invoice.total,
            status: invoice.status,
            notes: invoice.notes,
            terms: invoice.terms,
            issued_at: (invoice.status == InvoiceStatus::Issued).then_some(now),
            paid_at: None,
            voided_at: None,
            created_by: invoice.created_by,
            created_at: now,
        };

        for (position, item) in items.into_iter().enumerate() {
            let id = state.next_id();
            state.invoice_items.push(InvoiceItem {
                id,
                invoice_id: record.id,
                position: position as i32,
                description: item.description,
                quantity: item.quantity,
                unit_price: item.unit_price,
                line_total: item.line_total,
            });
        }
        state.invoices.push(record.clone());
        Ok(record)
    }

    async fn get_invoice(&self, id: InvoiceId) -> Result<Option<Invoice>> {
        let state = self.state.read().await;
        Ok(state.invoices.iter().find(|i| i.id == id).cloned())
    }

    async fn get_invoice_for_sale(&self, sale_id: SaleId) -> Result<Option<Invoice>> {
        let state = self.state.read().await;
        Ok(state.invoices.iter().find(|i| i.sale_id == sale_id).cloned())
    }

    async fn invoice_items(&self, id: InvoiceId) -> Result<Vec<InvoiceItem>> {
        let state = self.state.read().await;
        Ok(state
            .invoice_items
            .iter()
            .filter(|i| i.invoice_id == id)
            .cloned()
            .collect())
    }

    async fn update_invoice_status(
        &self,
        id: InvoiceId,
        expected: InvoiceStatus,
        target: InvoiceStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Invoice>> {
        let mut state = self.state.write().await;
        let invoice = state
            .invoices
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| StoreError::not_found("Invoice", id))?;
        if invoice.status != expected {
            return Ok(None);
        }
        invoice.apply_status(target, at);
        Ok(Some(invoice.clone()))
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn insert_document(&self, document: NewDocument) -> Result<Document> {
        let mut state = self.state.write().await;
        let doc_type = document.terms.doc_type();
        let taken: Vec<i32> = state
            .documents
            .iter()
            .filter(|d| d.buyer_id == document.buyer_id && d.doc_type == doc_type)
            .map(|d| d.version)
            .collect();

        let now = Utc::now();
        let record = Document {
            id: DocumentId::new(),
            buyer_id: document.buyer_id,
            doc_type,
            version: pick_document_version(document.requested_version, &taken),
            title: document.title,
            status: Default::default(),
            terms: document.terms,
            snapshot: None,
            sign_token_hash: None,
            sign_token_expires_at: None,
            sign_token_issued_at: None,
            consumed_token_hash: None,
            buyer_signed_at: None,
            buyer_signer_name: None,
            buyer_signer_email: None,
            created_by: document.created_by,
            created_at: now,
            updated_at: now,
        };
        state.documents.push(record.clone());
        Ok(record)
    }

    async fn get_document(&self, id: DocumentId) -> Result<Option<Document>> {
        let state = self.state.read().await;
        Ok(state.documents.iter().find(|d| d.id == id).cloned())
    }

    async fn list_documents(&self, filter: DocumentFilter) -> Result<Vec<Document>> {
        let state = self.state.read().await;
        Ok(state
            .documents
            .iter()
            .rev()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect())
    }

    async fn find_by_token_hash(&self, hash: &str) -> Result<Option<(Document, TokenState)>> {
        let state = self.state.read().await;
        Ok(state.documents.iter().find_map(|d| {
            if d.sign_token_hash.as_deref() == Some(hash) {
                Some((d.clone(), TokenState::Active))
            } else if d.consumed_token_hash.as_deref() == Some(hash) {
                Some((d.clone(), TokenState::Consumed))
            } else {
                None
            }
        }))
    }

    async fn signatures(&self, id: DocumentId) -> Result<Vec<DocumentSignature>> {
        let state = self.state.read().await;
        Ok(state
            .signatures
            .iter()
            .filter(|s| s.document_id == id)
            .cloned()
            .collect())
    }

    async fn update_document<T, E, F>(&self, id: DocumentId, decide: F) -> std::result::Result<T, E>
    where
        T: Send,
        E: From<StoreError> + Send,
        F: FnOnce(&Document, &[DocumentSignature]) -> std::result::Result<(DocumentWrite, T), E>
            + Send,
    {
        let mut state = self.state.write().await;
        let index = state
            .documents
            .iter()
            .position(|d| d.id == id)
            .ok_or_else(|| StoreError::not_found("Document", id))?;
        let signatures: Vec<DocumentSignature> = state
            .signatures
            .iter()
            .filter(|s| s.document_id == id)
            .cloned()
            .collect();

        let (write, value) = decide(&state.documents[index], &signatures)?;
        if write.is_empty() {
            return Ok(value);
        }

        if let Some(signature) = &write.signature
            && signature.signer_type == SignerType::Buyer
            && signatures.iter().any(|s| s.signer_type == SignerType::Buyer)
        {
            return Err(StoreError::conflict(constraint::ONE_BUYER_SIGNATURE).into());
        }
        if let Some(SigningLinkWrite::Issue { token_hash, .. }) =
            &write.signing_link
            && state
                .documents
                .iter()
                .any(|d| d.id != id && d.sign_token_hash.as_deref() == Some(token_hash))
        {
            return Err(StoreError::conflict(constraint::SIGN_TOKEN).into());
        }

        let now = Utc::now();
        state.documents[index].apply(&write, now);
        if let Some(signature) = write.signature {
            state.signatures.push(signature.into_record(id, now));
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use common::{
        ContractTerms, DocumentStatus, LetterOfIntentTerms, Money, Party, PaymentSplit, SignMethod,
    };

    use super::*;
    use crate::records::{BuyerSigned, NewSignature, SigningLinkWrite};

    async fn farmer(store: &InMemoryStore) -> Farmer {
        store
            .create_farmer(NewFarmer {
                name: "Wanjiru".to_string(),
                phone: "+254700000001".to_string(),
                county: "Nakuru".to_string(),
                ward: "Njoro".to_string(),
                village: None,
            })
            .await
            .unwrap()
    }

    async fn animal(store: &InMemoryStore, farmer: &Farmer, species: Species, code: &str) -> Animal {
        store
            .insert_animal(NewAnimal {
                code: code.to_string(),
                species,
                farmer_id: farmer.id,
                sex: Some("F".to_string()),
                breed: None,
                estimated_dob: None,
            })
            .await
            .unwrap()
    }

    fn intake(id: AnimalId) -> AggregationIntake {
        AggregationIntake {
            animal_id: id,
            live_weight_kg: Some(31.5),
            weight_method: "scale".to_string(),
            purchase_price: Some(Money::from_major(6_500)),
            currency: "KES".to_string(),
        }
    }

    fn aggregation_batch() -> NewAggregationBatch {
        NewAggregationBatch {
            species: Species::Goat,
            site_name: "Nakuru".to_string(),
            received_on: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            created_by: None,
        }
    }

    fn processing_batch() -> NewProcessingBatch {
        NewProcessingBatch {
            species: Species::Goat,
            facility: "Athi River".to_string(),
            slaughter_date: None,
            halal_cert_ref: None,
            created_by: None,
        }
    }

    fn loi_terms(buyer: &str) -> ContractTerms {
        ContractTerms::Loi(LetterOfIntentTerms {
            buyer: Party {
                name: buyer.to_string(),
                ..Party::default()
            },
            seller: Party::default(),
            product_name: "Goat carcass".to_string(),
            product_spec: String::new(),
            quantity_kg: 500,
            price_per_kg: Money::from_minor(700),
            currency: "USD".to_string(),
            incoterm: "CIF".to_string(),
            payment: PaymentSplit::new(0, 100),
            payment_notes: String::new(),
            issue_date: None,
            notes: String::new(),
        })
    }

    fn buyer_signature(name: &str) -> NewSignature {
        NewSignature {
            signer_type: SignerType::Buyer,
            sign_method: SignMethod::Typed,
            signer_name: name.to_string(),
            signer_email: None,
            signer_user_id: None,
            ip_address: None,
            user_agent: None,
            consent_text: "I agree".to_string(),
        }
    }

    #[tokio::test]
    async fn sequence_starts_at_one_per_name() {
        let store = InMemoryStore::new();
        assert_eq!(store.next_sequence("animal:GOAT:2025:1").await.unwrap(), 1);
        assert_eq!(store.next_sequence("animal:GOAT:2025:1").await.unwrap(), 2);
        assert_eq!(store.next_sequence("invoice:2025").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn duplicate_animal_code_conflicts() {
        let store = InMemoryStore::new();
        let farmer = farmer(&store).await;
        animal(&store, &farmer, Species::Goat, "RZ-GOAT-2025-1-001").await;

        let err = store
            .insert_animal(NewAnimal {
                code: "RZ-GOAT-2025-1-001".to_string(),
                species: Species::Goat,
                farmer_id: farmer.id,
                sex: None,
                breed: None,
                estimated_dob: None,
            })
            .await
            .unwrap_err();
        assert!(err.is_conflict_on(constraint::ANIMAL_CODE));
    }

    #[tokio::test]
    async fn aggregation_attaches_qualifying_and_skips_rest() {
        let store = InMemoryStore::new();
        let farmer = farmer(&store).await;
        let goat = animal(&store, &farmer, Species::Goat, "G1").await;
        let sheep = animal(&store, &farmer, Species::Sheep, "S1").await;

        let outcome = store
            .create_aggregation_batch(
                aggregation_batch(),
                vec![intake(goat.id), intake(sheep.id), intake(AnimalId::new())],
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome.attached, vec![goat.id]);
        assert_eq!(outcome.skipped.len(), 2);

        let stored = store.get_animal(goat.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AnimalStatus::Aggregated);
        assert_eq!(stored.aggregation_batch_id, Some(outcome.batch.id));
        assert_eq!(stored.purchase_price, Some(Money::from_major(6_500)));
        assert!(stored.aggregated_at.is_some());

        let untouched = store.get_animal(sheep.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, AnimalStatus::OnFarm);
    }

    #[tokio::test]
    async fn aggregation_with_no_qualifying_animal_persists_nothing() {
        let store = InMemoryStore::new();
        let farmer = farmer(&store).await;
        let sheep = animal(&store, &farmer, Species::Sheep, "S1").await;

        let outcome = store
            .create_aggregation_batch(aggregation_batch(), vec![intake(sheep.id)])
            .await
            .unwrap();

        assert!(outcome.is_none());
        assert!(store.list_aggregation_batches(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn animal_joins_only_one_aggregation_batch() {
        let store = InMemoryStore::new();
        let farmer = farmer(&store).await;
        let goat = animal(&store, &farmer, Species::Goat, "G1").await;

        store
            .create_aggregation_batch(aggregation_batch(), vec![intake(goat.id)])
            .await
            .unwrap()
            .unwrap();
        let second = store
            .create_aggregation_batch(aggregation_batch(), vec![intake(goat.id)])
            .await
            .unwrap();

        assert!(second.is_none());
    }

    #[tokio::test]
    async fn yield_then_sale_walks_members_to_sold() {
        let store = InMemoryStore::new();
        let farmer = farmer(&store).await;
        let goat = animal(&store, &farmer, Species::Goat, "G1").await;
        store
            .create_aggregation_batch(aggregation_batch(), vec![intake(goat.id)])
            .await
            .unwrap();
        let processing = store
            .create_processing_batch(processing_batch(), vec![goat.id])
            .await
            .unwrap()
            .unwrap();
        let batch_id = processing.batch.id;

        let recorded = store
            .record_yield(NewYield {
                processing_batch_id: batch_id,
                total_carcass_weight_kg: 14.2,
                parts_included_in_batch_sale: true,
                parts_sold_separately: false,
                parts_notes: None,
                recorded_by: None,
            })
            .await
            .unwrap();
        assert_eq!(recorded.processed, vec![goat.id]);

        let duplicate = store
            .record_yield(NewYield {
                processing_batch_id: batch_id,
                total_carcass_weight_kg: 1.0,
                parts_included_in_batch_sale: false,
                parts_sold_separately: false,
                parts_notes: None,
                recorded_by: None,
            })
            .await
            .unwrap_err();
        assert!(duplicate.is_conflict_on(constraint::YIELD_PER_BATCH));

        let sale = NewSale {
            processing_batch_id: batch_id,
            buyer: BuyerSelection::New(NewBuyer {
                name: "Gulf Foods".to_string(),
                ..NewBuyer::default()
            }),
            sale_date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            price: Money::from_major(120_000),
            currency: "KES".to_string(),
            notes: None,
            created_by: None,
        };
        let sold = store.record_sale(sale.clone()).await.unwrap();
        assert_eq!(sold.sold, vec![goat.id]);
        assert_eq!(sold.buyer.name, "Gulf Foods");

        let again = store.record_sale(sale).await.unwrap_err();
        assert!(again.is_conflict_on(constraint::SALE_PER_BATCH));
        // The rejected sale must not leave a second buyer behind.
        assert_eq!(store.list_buyers().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invoice_status_update_requires_expected_status() {
        let store = InMemoryStore::new();
        let buyer = store
            .create_buyer(NewBuyer {
                name: "Buyer".to_string(),
                ..NewBuyer::default()
            })
            .await
            .unwrap();
        let invoice = store
            .create_invoice(
                NewInvoice {
                    invoice_number: "RZ-INV-2025-0001".to_string(),
                    sale_id: SaleId::new(99),
                    buyer_id: buyer.id,
                    issue_date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
                    due_date: None,
                    currency: "KES".to_string(),
                    subtotal: Money::from_major(10),
                    tax: Money::zero(),
                    total: Money::from_major(10),
                    status: InvoiceStatus::Issued,
                    notes: None,
                    terms: None,
                    created_by: None,
                },
                vec![],
            )
            .await
            .unwrap();
        assert!(invoice.issued_at.is_some());

        let stale = store
            .update_invoice_status(invoice.id, InvoiceStatus::Draft, InvoiceStatus::Void, Utc::now())
            .await
            .unwrap();
        assert!(stale.is_none());

        let paid = store
            .update_invoice_status(invoice.id, InvoiceStatus::Issued, InvoiceStatus::Paid, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(paid.status, InvoiceStatus::Paid);
        assert!(paid.paid_at.is_some());
    }

    #[tokio::test]
    async fn document_version_is_bumped_when_taken() {
        let store = InMemoryStore::new();
        let buyer = BuyerId::new(7);
        let new_doc = NewDocument {
            buyer_id: buyer,
            title: "Letter of Intent".to_string(),
            terms: loi_terms("Buyer"),
            requested_version: Some(1),
            created_by: None,
        };

        let first = store.insert_document(new_doc.clone()).await.unwrap();
        let second = store.insert_document(new_doc).await.unwrap();

        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert_eq!(second.status, DocumentStatus::Draft);
    }

    #[tokio::test]
    async fn token_hash_lookup_distinguishes_active_and_consumed() {
        let store = InMemoryStore::new();
        let doc = store
            .insert_document(NewDocument {
                buyer_id: BuyerId::new(1),
                title: "Letter of Intent".to_string(),
                terms: loi_terms("Buyer"),
                requested_version: None,
                created_by: None,
            })
            .await
            .unwrap();

        let now = Utc::now();
        store
            .update_document(doc.id, |_, _| {
                Ok::<_, StoreError>((
                    DocumentWrite {
                        signing_link: Some(SigningLinkWrite::Issue {
                            token_hash: "abc".to_string(),
                            issued_at: now,
                            expires_at: now,
                        }),
                        ..DocumentWrite::default()
                    },
                    (),
                ))
            })
            .await
            .unwrap();
        let (_, state) = store.find_by_token_hash("abc").await.unwrap().unwrap();
        assert_eq!(state, TokenState::Active);

        store
            .update_document(doc.id, |_, _| {
                Ok::<_, StoreError>((
                    DocumentWrite {
                        status: Some(DocumentStatus::BuyerSigned),
                        signing_link: Some(SigningLinkWrite::Consume),
                        buyer_signed: Some(BuyerSigned {
                            at: now,
                            name: "Amina".to_string(),
                            email: None,
                        }),
                        signature: Some(buyer_signature("Amina")),
                        ..DocumentWrite::default()
                    },
                    (),
                ))
            })
            .await
            .unwrap();

        let (signed, state) = store.find_by_token_hash("abc").await.unwrap().unwrap();
        assert_eq!(state, TokenState::Consumed);
        assert_eq!(signed.status, DocumentStatus::BuyerSigned);
        assert!(signed.sign_token_hash.is_none());
        assert!(store.find_by_token_hash("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_buyer_signature_is_rejected() {
        let store = InMemoryStore::new();
        let doc = store
            .insert_document(NewDocument {
                buyer_id: BuyerId::new(1),
                title: "Letter of Intent".to_string(),
                terms: loi_terms("Buyer"),
                requested_version: None,
                created_by: None,
            })
            .await
            .unwrap();

        let sign = |name: &'static str| {
            move |_: &Document, _: &[DocumentSignature]| {
                Ok::<_, StoreError>((
                    DocumentWrite {
                        signature: Some(buyer_signature(name)),
                        ..DocumentWrite::default()
                    },
                    (),
                ))
            }
        };

        store.update_document(doc.id, sign("first")).await.unwrap();
        let err = store.update_document(doc.id, sign("second")).await.unwrap_err();

        assert!(err.is_conflict_on(constraint::ONE_BUYER_SIGNATURE));
        assert_eq!(store.signatures(doc.id).await.unwrap().len(), 1);
    }
}
