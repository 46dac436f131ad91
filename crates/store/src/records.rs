//! Record types mirroring the relational tables, plus the inputs used to
//! create and update them.

use chrono::{DateTime, NaiveDate, Utc};
use common::{
    AggregationBatchId, AnimalId, AnimalStatus, BuyerId, ContractTerms, DocType, DocumentId,
    DocumentStatus, FarmerId, InvoiceId, InvoiceStatus, Money, ProcessingBatchId, SaleId,
    SignMethod, SignatureId, SignerType, Species, UserId, YieldId,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Farmer {
    pub id: FarmerId,
    pub name: String,
    pub phone: String,
    pub county: String,
    pub ward: String,
    pub village: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewFarmer {
    pub name: String,
    pub phone: String,
    pub county: String,
    pub ward: String,
    pub village: Option<String>,
}

/// A single animal of any species.
///
/// `aggregation_batch_id` is `None` exactly while the animal is `on_farm`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Animal {
    pub id: AnimalId,
    pub code: String,
    pub species: Species,
    pub farmer_id: FarmerId,
    pub sex: Option<String>,
    pub breed: Option<String>,
    pub estimated_dob: Option<NaiveDate>,
    pub status: AnimalStatus,
    pub aggregation_batch_id: Option<AggregationBatchId>,
    pub live_weight_kg: Option<f64>,
    pub weight_method: Option<String>,
    pub purchase_price: Option<Money>,
    pub purchase_currency: Option<String>,
    pub aggregated_at: Option<DateTime<Utc>>,
    pub aggregated_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl Animal {
    /// True if the animal can join an aggregation batch of `species`.
    pub fn qualifies_for_aggregation(&self, species: Species) -> bool {
        self.species == species
            && self.status == AnimalStatus::OnFarm
            && self.aggregation_batch_id.is_none()
    }

    /// True if the animal can join a processing batch of `species`.
    pub fn qualifies_for_processing(&self, species: Species) -> bool {
        self.species == species && self.status == AnimalStatus::Aggregated
    }
}

#[derive(Debug, Clone)]
pub struct NewAnimal {
    pub code: String,
    pub species: Species,
    pub farmer_id: FarmerId,
    pub sex: Option<String>,
    pub breed: Option<String>,
    pub estimated_dob: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default)]
pub struct AnimalFilter {
    pub species: Option<Species>,
    pub status: Option<AnimalStatus>,
    pub farmer_id: Option<FarmerId>,
}

impl AnimalFilter {
    pub fn matches(&self, animal: &Animal) -> bool {
        self.species.is_none_or(|s| s == animal.species)
            && self.status.is_none_or(|s| s == animal.status)
            && self.farmer_id.is_none_or(|f| f == animal.farmer_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationBatch {
    pub id: AggregationBatchId,
    pub species: Species,
    pub site_name: String,
    pub received_on: NaiveDate,
    /// Modeled for future enforcement; batches take no new members after creation.
    pub is_locked: bool,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAggregationBatch {
    pub species: Species,
    pub site_name: String,
    pub received_on: NaiveDate,
    pub created_by: Option<UserId>,
}

/// Purchase data stamped on one animal as it is aggregated.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationIntake {
    pub animal_id: AnimalId,
    pub live_weight_kg: Option<f64>,
    pub weight_method: String,
    pub purchase_price: Option<Money>,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregationOutcome {
    pub batch: AggregationBatch,
    pub attached: Vec<AnimalId>,
    pub skipped: Vec<AnimalId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingBatch {
    pub id: ProcessingBatchId,
    pub species: Species,
    pub facility: String,
    pub slaughter_date: Option<NaiveDate>,
    pub halal_cert_ref: Option<String>,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewProcessingBatch {
    pub species: Species,
    pub facility: String,
    pub slaughter_date: Option<NaiveDate>,
    pub halal_cert_ref: Option<String>,
    pub created_by: Option<UserId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessingOutcome {
    pub batch: ProcessingBatch,
    pub attached: Vec<AnimalId>,
    pub skipped: Vec<AnimalId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingYield {
    pub id: YieldId,
    pub processing_batch_id: ProcessingBatchId,
    pub total_carcass_weight_kg: f64,
    pub parts_included_in_batch_sale: bool,
    pub parts_sold_separately: bool,
    pub parts_notes: Option<String>,
    pub recorded_by: Option<UserId>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewYield {
    pub processing_batch_id: ProcessingBatchId,
    pub total_carcass_weight_kg: f64,
    pub parts_included_in_batch_sale: bool,
    pub parts_sold_separately: bool,
    pub parts_notes: Option<String>,
    pub recorded_by: Option<UserId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct YieldOutcome {
    pub record: ProcessingYield,
    pub processed: Vec<AnimalId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Buyer {
    pub id: BuyerId,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub tax_pin: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewBuyer {
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub tax_pin: Option<String>,
}

/// Either an existing buyer or one to create inside the sale transaction.
#[derive(Debug, Clone)]
pub enum BuyerSelection {
    Existing(BuyerId),
    New(NewBuyer),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSale {
    pub id: SaleId,
    pub processing_batch_id: ProcessingBatchId,
    pub buyer_id: BuyerId,
    pub sale_date: NaiveDate,
    pub price: Money,
    pub currency: String,
    pub notes: Option<String>,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSale {
    pub processing_batch_id: ProcessingBatchId,
    pub buyer: BuyerSelection,
    pub sale_date: NaiveDate,
    pub price: Money,
    pub currency: String,
    pub notes: Option<String>,
    pub created_by: Option<UserId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordedSale {
    pub sale: BatchSale,
    pub buyer: Buyer,
    pub sold: Vec<AnimalId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub invoice_number: String,
    pub sale_id: SaleId,
    pub buyer_id: BuyerId,
    pub issue_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub currency: String,
    pub subtotal: Money,
    pub tax: Money,
    pub total: Money,
    pub status: InvoiceStatus,
    pub notes: Option<String>,
    pub terms: Option<String>,
    pub issued_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub voided_at: Option<DateTime<Utc>>,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl Invoice {
    /// Applies `target` and stamps the matching timestamp.
    pub fn apply_status(&mut self, target: InvoiceStatus, at: DateTime<Utc>) {
        self.status = target;
        match target {
            InvoiceStatus::Issued => self.issued_at = Some(at),
            InvoiceStatus::Paid => self.paid_at = Some(at),
            InvoiceStatus::Void => self.voided_at = Some(at),
            InvoiceStatus::Draft => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub id: i64,
    pub invoice_id: InvoiceId,
    pub position: i32,
    pub description: String,
    pub quantity: i64,
    pub unit_price: Money,
    pub line_total: Money,
}

#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub invoice_number: String,
    pub sale_id: SaleId,
    pub buyer_id: BuyerId,
    pub issue_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub currency: String,
    pub subtotal: Money,
    pub tax: Money,
    pub total: Money,
    pub status: InvoiceStatus,
    pub notes: Option<String>,
    pub terms: Option<String>,
    pub created_by: Option<UserId>,
}

#[derive(Debug, Clone)]
pub struct NewInvoiceItem {
    pub description: String,
    pub quantity: i64,
    pub unit_price: Money,
    pub line_total: Money,
}

/// Location and content hash of a stored PDF snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRef {
    pub storage_key: String,
    pub file_sha256: String,
}

/// A versioned contract document owned by one buyer.
///
/// Only the SHA-256 hash of a signing token is ever stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub buyer_id: BuyerId,
    pub doc_type: DocType,
    pub version: i32,
    pub title: String,
    pub status: DocumentStatus,
    pub terms: ContractTerms,
    pub snapshot: Option<SnapshotRef>,
    #[serde(skip_serializing)]
    pub sign_token_hash: Option<String>,
    pub sign_token_expires_at: Option<DateTime<Utc>>,
    pub sign_token_issued_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub consumed_token_hash: Option<String>,
    pub buyer_signed_at: Option<DateTime<Utc>>,
    pub buyer_signer_name: Option<String>,
    pub buyer_signer_email: Option<String>,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Applies a write in place. Used by the in-memory store and by tests; the
    /// PostgreSQL store applies the same fields in SQL.
    pub fn apply(&mut self, write: &DocumentWrite, at: DateTime<Utc>) {
        if let Some(status) = write.status {
            self.status = status;
        }
        if let Some(terms) = &write.terms {
            self.terms = terms.clone();
        }
        match &write.signing_link {
            Some(SigningLinkWrite::Issue {
                token_hash,
                issued_at,
                expires_at,
            }) => {
                self.sign_token_hash = Some(token_hash.clone());
                self.sign_token_issued_at = Some(*issued_at);
                self.sign_token_expires_at = Some(*expires_at);
            }
            Some(SigningLinkWrite::Consume) => {
                self.consumed_token_hash = self.sign_token_hash.take();
                self.sign_token_expires_at = None;
            }
            None => {}
        }
        if let Some(signed) = &write.buyer_signed {
            self.buyer_signed_at = Some(signed.at);
            self.buyer_signer_name = Some(signed.name.clone());
            self.buyer_signer_email = signed.email.clone();
        }
        if let Some(snapshot) = &write.snapshot {
            self.snapshot = Some(snapshot.clone());
        }
        self.updated_at = at;
    }
}

#[derive(Debug, Clone)]
pub struct NewDocument {
    pub buyer_id: BuyerId,
    pub title: String,
    pub terms: ContractTerms,
    /// Requested version; bumped past the current maximum if already taken.
    pub requested_version: Option<i32>,
    pub created_by: Option<UserId>,
}

#[derive(Debug, Clone, Default)]
pub struct DocumentFilter {
    pub buyer_id: Option<BuyerId>,
    pub status: Option<DocumentStatus>,
    pub doc_type: Option<DocType>,
}

impl DocumentFilter {
    pub fn matches(&self, doc: &Document) -> bool {
        self.buyer_id.is_none_or(|b| b == doc.buyer_id)
            && self.status.is_none_or(|s| s == doc.status)
            && self.doc_type.is_none_or(|t| t == doc.doc_type)
    }
}

/// Whether a token hash matched the live signing link or an already used one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Active,
    Consumed,
}

/// Append-only signature record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSignature {
    pub id: SignatureId,
    pub document_id: DocumentId,
    pub signer_type: SignerType,
    pub sign_method: SignMethod,
    pub signer_name: String,
    pub signer_email: Option<String>,
    pub signer_user_id: Option<UserId>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub consent_text: String,
    pub signed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSignature {
    pub signer_type: SignerType,
    pub sign_method: SignMethod,
    pub signer_name: String,
    pub signer_email: Option<String>,
    pub signer_user_id: Option<UserId>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub consent_text: String,
}

impl NewSignature {
    pub fn into_record(self, document_id: DocumentId, signed_at: DateTime<Utc>) -> DocumentSignature {
        DocumentSignature {
            id: SignatureId::new(),
            document_id,
            signer_type: self.signer_type,
            sign_method: self.sign_method,
            signer_name: self.signer_name,
            signer_email: self.signer_email,
            signer_user_id: self.signer_user_id,
            ip_address: self.ip_address,
            user_agent: self.user_agent,
            consent_text: self.consent_text,
            signed_at,
        }
    }
}

/// Change to the signing link columns.
#[derive(Debug, Clone)]
pub enum SigningLinkWrite {
    Issue {
        token_hash: String,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    },
    /// Retires the active token so it can only ever answer "already signed".
    Consume,
}

#[derive(Debug, Clone)]
pub struct BuyerSigned {
    pub at: DateTime<Utc>,
    pub name: String,
    pub email: Option<String>,
}

/// Changes decided under the document row lock.
///
/// Unset fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct DocumentWrite {
    pub status: Option<DocumentStatus>,
    pub terms: Option<ContractTerms>,
    pub signing_link: Option<SigningLinkWrite>,
    pub buyer_signed: Option<BuyerSigned>,
    pub snapshot: Option<SnapshotRef>,
    pub signature: Option<NewSignature>,
}

impl DocumentWrite {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.terms.is_none()
            && self.signing_link.is_none()
            && self.buyer_signed.is_none()
            && self.snapshot.is_none()
            && self.signature.is_none()
    }
}

/// Picks the version for a new document given the versions already taken for
/// the same (buyer, doc type) pair. A free requested version is kept; a taken
/// or missing one becomes `max + 1`.
pub fn pick_document_version(requested: Option<i32>, taken: &[i32]) -> i32 {
    let next = taken.iter().copied().max().unwrap_or(0) + 1;
    match requested {
        Some(v) if v > 0 && !taken.contains(&v) => v,
        _ => next,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_version_keeps_free_request() {
        assert_eq!(pick_document_version(Some(1), &[]), 1);
        assert_eq!(pick_document_version(Some(3), &[1]), 3);
    }

    #[test]
    fn test_pick_version_bumps_taken_request() {
        assert_eq!(pick_document_version(Some(1), &[1]), 2);
        assert_eq!(pick_document_version(Some(1), &[1, 2, 5]), 6);
    }

    #[test]
    fn test_pick_version_defaults_to_next() {
        assert_eq!(pick_document_version(None, &[]), 1);
        assert_eq!(pick_document_version(None, &[1, 2]), 3);
        assert_eq!(pick_document_version(Some(0), &[4]), 5);
    }

    #[test]
    fn test_animal_filter_matches_all_set_fields() {
        let animal = Animal {
            id: AnimalId::new(),
            code: "RZ-GOAT-2025-1-001".to_string(),
            species: Species::Goat,
            farmer_id: FarmerId::new(1),
            sex: None,
            breed: None,
            estimated_dob: None,
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

        assert!(AnimalFilter::default().matches(&animal));
        assert!(
            AnimalFilter {
                species: Some(Species::Goat),
                status: Some(AnimalStatus::OnFarm),
                farmer_id: None,
            }
            .matches(&animal)
        );
        assert!(
            !AnimalFilter {
                species: Some(Species::Cattle),
                ..AnimalFilter::default()
            }
            .matches(&animal)
        );
        assert!(animal.qualifies_for_aggregation(Species::Goat));
        assert!(!animal.qualifies_for_aggregation(Species::Sheep));
        assert!(!animal.qualifies_for_processing(Species::Goat));
    }
}
