use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    AggregationBatchId, AnimalId, AnimalStatus, BuyerId, DocumentId, FarmerId, InvoiceId,
    InvoiceStatus, Money, ProcessingBatchId, SaleId, SignatureId, SignerType, Species, UserId,
    YieldId,
};
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::error::constraint;
use crate::records::{
    AggregationBatch, AggregationIntake, AggregationOutcome, Animal, AnimalFilter, BatchSale,
    Buyer, BuyerSelection, Document, DocumentFilter, DocumentSignature, DocumentWrite, Farmer,
    Invoice, InvoiceItem, NewAggregationBatch, NewAnimal, NewBuyer, NewDocument, NewFarmer,
    NewInvoice, NewInvoiceItem, NewProcessingBatch, NewSale, NewYield, ProcessingBatch,
    ProcessingOutcome, ProcessingYield, RecordedSale, SnapshotRef, TokenState, YieldOutcome,
    pick_document_version,
};
use crate::store::{AnimalStore, BatchStore, DocumentStore, SalesStore};
use crate::{Result, StoreError};

const ANIMAL_COLUMNS: &str = "id, code, species, farmer_id, sex, breed, estimated_dob, status, \
    aggregation_batch_id, live_weight_kg, weight_method, purchase_price_minor, purchase_currency, \
    aggregated_at, aggregated_by, created_at";

const INVOICE_COLUMNS: &str = "id, invoice_number, sale_id, buyer_id, issue_date, due_date, \
    currency, subtotal_minor, tax_minor, total_minor, status, notes, terms, issued_at, paid_at, \
    voided_at, created_by, created_at";

const DOCUMENT_COLUMNS: &str = "id, buyer_id, doc_type, version, title, status, terms, \
    storage_key, file_sha256, sign_token_hash, sign_token_expires_at, sign_token_issued_at, \
    consumed_token_hash, buyer_signed_at, buyer_signer_name, buyer_signer_email, created_by, \
    created_at, updated_at";

const SIGNATURE_COLUMNS: &str = "id, document_id, signer_type, sign_method, signer_name, \
    signer_email, signer_user_id, ip_address, user_agent, consent_text, signed_at";

/// Attempts made to insert a document when a concurrent insert takes the
/// picked version first.
const DOCUMENT_INSERT_ATTEMPTS: usize = 3;

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

/// Maps unique violations to [`StoreError::Conflict`] carrying the constraint name.
fn map_write_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = err
        && db_err.is_unique_violation()
        && let Some(name) = db_err.constraint()
    {
        return StoreError::conflict(name);
    }
    StoreError::Database(err)
}

fn parse_column<T>(row: &PgRow, column: &str) -> Result<T>
where
    T: std::str::FromStr<Err = common::ParseVocabularyError>,
{
    let raw: String = row.try_get(column)?;
    Ok(raw.parse()?)
}

fn row_to_farmer(row: PgRow) -> Result<Farmer> {
    Ok(Farmer {
        id: FarmerId::new(row.try_get("id")?),
        name: row.try_get("name")?,
        phone: row.try_get("phone")?,
        county: row.try_get("county")?,
        ward: row.try_get("ward")?,
        village: row.try_get("village")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_animal(row: PgRow) -> Result<Animal> {
    Ok(Animal {
        id: AnimalId::from_uuid(row.try_get::<Uuid, _>("id")?),
        code: row.try_get("code")?,
        species: parse_column(&row, "species")?,
        farmer_id: FarmerId::new(row.try_get("farmer_id")?),
        sex: row.try_get("sex")?,
        breed: row.try_get("breed")?,
        estimated_dob: row.try_get("estimated_dob")?,
        status: parse_column(&row, "status")?,
        aggregation_batch_id: row
            .try_get::<Option<i64>, _>("aggregation_batch_id")?
            .map(AggregationBatchId::new),
        live_weight_kg: row.try_get("live_weight_kg")?,
        weight_method: row.try_get("weight_method")?,
        purchase_price: row
            .try_get::<Option<i64>, _>("purchase_price_minor")?
            .map(Money::from_minor),
        purchase_currency: row.try_get("purchase_currency")?,
        aggregated_at: row.try_get("aggregated_at")?,
        aggregated_by: row.try_get::<Option<i64>, _>("aggregated_by")?.map(UserId::new),
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_aggregation_batch(row: PgRow) -> Result<AggregationBatch> {
    Ok(AggregationBatch {
        id: AggregationBatchId::new(row.try_get("id")?),
        species: parse_column(&row, "species")?,
        site_name: row.try_get("site_name")?,
        received_on: row.try_get("received_on")?,
        is_locked: row.try_get("is_locked")?,
        created_by: row.try_get::<Option<i64>, _>("created_by")?.map(UserId::new),
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_processing_batch(row: PgRow) -> Result<ProcessingBatch> {
    Ok(ProcessingBatch {
        id: ProcessingBatchId::new(row.try_get("id")?),
        species: parse_column(&row, "species")?,
        facility: row.try_get("facility")?,
        slaughter_date: row.try_get("slaughter_date")?,
        halal_cert_ref: row.try_get("halal_cert_ref")?,
        created_by: row.try_get::<Option<i64>, _>("created_by")?.map(UserId::new),
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_yield(row: PgRow) -> Result<ProcessingYield> {
    Ok(ProcessingYield {
        id: YieldId::new(row.try_get("id")?),
        processing_batch_id: ProcessingBatchId::new(row.try_get("processing_batch_id")?),
        total_carcass_weight_kg: row.try_get("total_carcass_weight_kg")?,
        parts_included_in_batch_sale: row.try_get("parts_included_in_batch_sale")?,
        parts_sold_separately: row.try_get("parts_sold_separately")?,
        parts_notes: row.try_get("parts_notes")?,
        recorded_by: row.try_get::<Option<i64>, _>("recorded_by")?.map(UserId::new),
        recorded_at: row.try_get("recorded_at")?,
    })
}

fn row_to_buyer(row: PgRow) -> Result<Buyer> {
    Ok(Buyer {
        id: BuyerId::new(row.try_get("id")?),
        name: row.try_get("name")?,
        phone: row.try_get("phone")?,
        email: row.try_get("email")?,
        address: row.try_get("address")?,
        tax_pin: row.try_get("tax_pin")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_sale(row: PgRow) -> Result<BatchSale> {
    Ok(BatchSale {
        id: SaleId::new(row.try_get("id")?),
        processing_batch_id: ProcessingBatchId::new(row.try_get("processing_batch_id")?),
        buyer_id: BuyerId::new(row.try_get("buyer_id")?),
        sale_date: row.try_get("sale_date")?,
        price: Money::from_minor(row.try_get("price_minor")?),
        currency: row.try_get("currency")?,
        notes: row.try_get("notes")?,
        created_by: row.try_get::<Option<i64>, _>("created_by")?.map(UserId::new),
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_invoice(row: PgRow) -> Result<Invoice> {
    Ok(Invoice {
        id: InvoiceId::new(row.try_get("id")?),
        invoice_number: row.try_get("invoice_number")?,
        sale_id: SaleId::new(row.try_get("sale_id")?),
        buyer_id: BuyerId::new(row.try_get("buyer_id")?),
        issue_date: row.try_get("issue_date")?,
        due_date: row.try_get("due_date")?,
        currency: row.try_get("currency")?,
        subtotal: Money::from_minor(row.try_get("subtotal_minor")?),
        tax: Money::from_minor(row.try_get("tax_minor")?),
        total: Money::from_minor(row.try_get("total_minor")?),
        status: parse_column(&row, "status")?,
        notes: row.try_get("notes")?,
        terms: row.try_get("terms")?,
        issued_at: row.try_get("issued_at")?,
        paid_at: row.try_get("paid_at")?,
        voided_at: row.try_get("voided_at")?,
        created_by: row.try_get::<Option<i64>, _>("created_by")?.map(UserId::new),
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_invoice_item(row: PgRow) -> Result<InvoiceItem> {
    Ok(InvoiceItem {
        id: row.try_get("id")?,
        invoice_id: InvoiceId::new(row.try_get("invoice_id")?),
        position: row.try_get("position")?,
        description: row.try_get("description")?,
        quantity: row.try_get("quantity")?,
        unit_price: Money::from_minor(row.try_get("unit_price_minor")?),
        line_total: Money::from_minor(row.try_get("line_total_minor")?),
    })
}

fn row_to_document(row: PgRow) -> Result<Document> {
    let terms: serde_json::Value = row.try_get("terms")?;
    let storage_key: Option<String> = row.try_get("storage_key")?;
    let file_sha256: Option<String> = row.try_get("file_sha256")?;

    Ok(Document {
        id: DocumentId::from_uuid(row.try_get::<Uuid, _>("id")?),
        buyer_id: BuyerId::new(row.try_get("buyer_id")?),
        doc_type: parse_column(&row, "doc_type")?,
        version: row.try_get("version")?,
        title: row.try_get("title")?,
        status: parse_column(&row, "status")?,
        terms: serde_json::from_value(terms)?,
        snapshot: storage_key
            .zip(file_sha256)
            .map(|(storage_key, file_sha256)| SnapshotRef {
                storage_key,
                file_sha256,
            }),
        sign_token_hash: row.try_get("sign_token_hash")?,
        sign_token_expires_at: row.try_get("sign_token_expires_at")?,
        sign_token_issued_at: row.try_get("sign_token_issued_at")?,
        consumed_token_hash: row.try_get("consumed_token_hash")?,
        buyer_signed_at: row.try_get("buyer_signed_at")?,
        buyer_signer_name: row.try_get("buyer_signer_name")?,
        buyer_signer_email: row.try_get("buyer_signer_email")?,
        created_by: row.try_get::<Option<i64>, _>("created_by")?.map(UserId::new),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_signature(row: PgRow) -> Result<DocumentSignature> {
    Ok(DocumentSignature {
        id: SignatureId::from_uuid(row.try_get::<Uuid, _>("id")?),
        document_id: DocumentId::from_uuid(row.try_get::<Uuid, _>("document_id")?),
        signer_type: parse_column(&row, "signer_type")?,
        sign_method: parse_column(&row, "sign_method")?,
        signer_name: row.try_get("signer_name")?,
        signer_email: row.try_get("signer_email")?,
        signer_user_id: row.try_get::<Option<i64>, _>("signer_user_id")?.map(UserId::new),
        ip_address: row.try_get("ip_address")?,
        user_agent: row.try_get("user_agent")?,
        consent_text: row.try_get("consent_text")?,
        signed_at: row.try_get("signed_at")?,
    })
}

async fn insert_buyer(conn: &mut PgConnection, buyer: NewBuyer) -> Result<Buyer> {
    let row = sqlx::query(
        r#"
        INSERT INTO buyers (name, phone, email, address, tax_pin)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, name, phone, email, address, tax_pin, created_at
        "#,
    )
    .bind(&buyer.name)
    .bind(&buyer.phone)
    .bind(&buyer.email)
    .bind(&buyer.address)
    .bind(&buyer.tax_pin)
    .fetch_one(conn)
    .await?;

    row_to_buyer(row)
}

/// Moves members of a processing batch from any of `from` to `to`.
async fn advance_members(
    conn: &mut PgConnection,
    batch_id: ProcessingBatchId,
    from: &[AnimalStatus],
    to: AnimalStatus,
) -> Result<Vec<AnimalId>> {
    let from: Vec<&str> = from.iter().map(|s| s.as_str()).collect();
    let ids: Vec<Uuid> = sqlx::query_scalar(
        r#"
        UPDATE animals SET status = $3
        WHERE status = ANY($2)
          AND id IN (
              SELECT animal_id FROM processing_batch_animals WHERE processing_batch_id = $1
          )
        RETURNING id
        "#,
    )
    .bind(batch_id.get())
    .bind(&from)
    .bind(to.as_str())
    .fetch_all(conn)
    .await?;

    Ok(ids.into_iter().map(AnimalId::from_uuid).collect())
}

async fn lock_processing_batch(conn: &mut PgConnection, id: ProcessingBatchId) -> Result<()> {
    let found: Option<i64> =
        sqlx::query_scalar("SELECT id FROM processing_batches WHERE id = $1 FOR UPDATE")
            .bind(id.get())
            .fetch_optional(conn)
            .await?;

    found
        .map(|_| ())
        .ok_or_else(|| StoreError::not_found("ProcessingBatch", id))
}

async fn lock_document(conn: &mut PgConnection, id: DocumentId) -> Result<Document> {
    let row = sqlx::query(&format!(
        "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = $1 FOR UPDATE"
    ))
    .bind(id.as_uuid())
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| StoreError::not_found("Document", id))?;

    row_to_document(row)
}

async fn load_signatures(
    conn: &mut PgConnection,
    id: DocumentId,
) -> Result<Vec<DocumentSignature>> {
    let rows = sqlx::query(&format!(
        "SELECT {SIGNATURE_COLUMNS} FROM document_signatures WHERE document_id = $1 ORDER BY signed_at ASC"
    ))
    .bind(id.as_uuid())
    .fetch_all(conn)
    .await?;

    rows.into_iter().map(row_to_signature).collect()
}

/// Writes every mutable column of an already locked document.
async fn save_document(conn: &mut PgConnection, doc: &Document) -> Result<()> {
    let terms = serde_json::to_value(&doc.terms)?;
    sqlx::query(
        r#"
        UPDATE documents SET
            status = $2, terms = $3, storage_key = $4, file_sha256 = $5,
            sign_token_hash = $6, sign_token_expires_at = $7, sign_token_issued_at = $8,
            consumed_token_hash = $9, buyer_signed_at = $10, buyer_signer_name = $11,
            buyer_signer_email = $12, updated_at = $13
        WHERE id = $1
        "#,
    )
    .bind(doc.id.as_uuid())
    .bind(doc.status.as_str())
    .bind(terms)
    .bind(doc.snapshot.as_ref().map(|s| s.storage_key.clone()))
    .bind(doc.snapshot.as_ref().map(|s| s.file_sha256.clone()))
    .bind(&doc.sign_token_hash)
    .bind(doc.sign_token_expires_at)
    .bind(doc.sign_token_issued_at)
    .bind(&doc.consumed_token_hash)
    .bind(doc.buyer_signed_at)
    .bind(&doc.buyer_signer_name)
    .bind(&doc.buyer_signer_email)
    .bind(doc.updated_at)
    .execute(conn)
    .await
    .map_err(map_write_error)?;

    Ok(())
}

async fn insert_signature(conn: &mut PgConnection, signature: &DocumentSignature) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO document_signatures (id, document_id, signer_type, sign_method, signer_name,
            signer_email, signer_user_id, ip_address, user_agent, consent_text, signed_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(signature.id.as_uuid())
    .bind(signature.document_id.as_uuid())
    .bind(signature.signer_type.as_str())
    .bind(signature.sign_method.as_str())
    .bind(&signature.signer_name)
    .bind(&signature.signer_email)
    .bind(signature.signer_user_id.map(|u| u.get()))
    .bind(&signature.ip_address)
    .bind(&signature.user_agent)
    .bind(&signature.consent_text)
    .bind(signature.signed_at)
    .execute(conn)
    .await
    .map_err(map_write_error)?;

    Ok(())
}

#[async_trait]
impl AnimalStore for PostgresStore {
    async fn create_farmer(&self, farmer: NewFarmer) -> Result<Farmer> {
        let row = sqlx::query(
            r#"
            INSERT INTO farmers (name, phone, county, ward, village)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, name, phone, county, ward, village, created_at
            "#,
        )
        .bind(&farmer.name)
        .bind(&farmer.phone)
        .bind(&farmer.county)
        .bind(&farmer.ward)
        .bind(&farmer.village)
        .fetch_one(&self.pool)
        .await?;

        row_to_farmer(row)
    }

    async fn get_farmer(&self, id: FarmerId) -> Result<Option<Farmer>> {
        let row = sqlx::query(
            "SELECT id, name, phone, county, ward, village, created_at FROM farmers WHERE id = $1",
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_farmer).transpose()
    }

    async fn list_farmers(&self) -> Result<Vec<Farmer>> {
        let rows = sqlx::query(
            "SELECT id, name, phone, county, ward, village, created_at FROM farmers ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_farmer).collect()
    }

    async fn next_sequence(&self, name: &str) -> Result<i64> {
        let value: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO sequences (name, value) VALUES ($1, 1)
            ON CONFLICT (name) DO UPDATE SET value = sequences.value + 1
            RETURNING value
            "#,
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Ok(value)
    }

    async fn insert_animal(&self, animal: NewAnimal) -> Result<Animal> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO animals (id, code, species, farmer_id, sex, breed, estimated_dob, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {ANIMAL_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&animal.code)
        .bind(animal.species.as_str())
        .bind(animal.farmer_id.get())
        .bind(&animal.sex)
        .bind(&animal.breed)
        .bind(animal.estimated_dob)
        .bind(AnimalStatus::OnFarm.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_foreign_key_violation()
            {
                return StoreError::not_found("Farmer", animal.farmer_id);
            }
            map_write_error(e)
        })?;

        row_to_animal(row)
    }

    async fn get_animal(&self, id: AnimalId) -> Result<Option<Animal>> {
        let row = sqlx::query(&format!("SELECT {ANIMAL_COLUMNS} FROM animals WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_to_animal).transpose()
    }

    async fn list_animals(&self, filter: AnimalFilter) -> Result<Vec<Animal>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ANIMAL_COLUMNS} FROM animals
            WHERE ($1::TEXT IS NULL OR species = $1)
              AND ($2::TEXT IS NULL OR status = $2)
              AND ($3::BIGINT IS NULL OR farmer_id = $3)
            ORDER BY created_at ASC, code ASC
            "#
        ))
        .bind(filter.species.map(|s| s.as_str()))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.farmer_id.map(|f| f.get()))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_animal).collect()
    }
}

#[async_trait]
impl BatchStore for PostgresStore {
    async fn create_aggregation_batch(
        &self,
        batch: NewAggregationBatch,
        intakes: Vec<AggregationIntake>,
    ) -> Result<Option<AggregationOutcome>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO aggregation_batches (species, site_name, received_on, created_by)
            VALUES ($1, $2, $3, $4)
            RETURNING id, species, site_name, received_on, is_locked, created_by, created_at
            "#,
        )
        .bind(batch.species.as_str())
        .bind(&batch.site_name)
        .bind(batch.received_on)
        .bind(batch.created_by.map(|u| u.get()))
        .fetch_one(&mut *tx)
        .await?;
        let record = row_to_aggregation_batch(row)?;

        let mut attached = Vec::new();
        let mut skipped = Vec::new();
        for intake in intakes {
            // The WHERE clause re-checks eligibility under the row lock the
            // UPDATE takes.
            let updated: Option<Uuid> = sqlx::query_scalar(
                r#"
                UPDATE animals SET
                    aggregation_batch_id = $2, live_weight_kg = $3, weight_method = $4,
                    purchase_price_minor = $5, purchase_currency = $6, aggregated_at = $7,
                    aggregated_by = $8, status = $9
                WHERE id = $1 AND species = $10 AND status = $11
                  AND aggregation_batch_id IS NULL
                RETURNING id
                "#,
            )
            .bind(intake.animal_id.as_uuid())
            .bind(record.id.get())
            .bind(intake.live_weight_kg)
            .bind(&intake.weight_method)
            .bind(intake.purchase_price.map(|m| m.minor()))
            .bind(&intake.currency)
            .bind(record.created_at)
            .bind(batch.created_by.map(|u| u.get()))
            .bind(AnimalStatus::Aggregated.as_str())
            .bind(batch.species.as_str())
            .bind(AnimalStatus::OnFarm.as_str())
            .fetch_optional(&mut *tx)
            .await?;

            match updated {
                Some(id) => attached.push(AnimalId::from_uuid(id)),
                None => skipped.push(intake.animal_id),
            }
        }

        if attached.is_empty() {
            tx.rollback().await?;
            return Ok(None);
        }

        tx.commit().await?;
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
        let row = sqlx::query(
            r#"
            SELECT id, species, site_name, received_on, is_locked, created_by, created_at
            FROM aggregation_batches WHERE id = $1
            "#,
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_aggregation_batch).transpose()
    }

    async fn list_aggregation_batches(
        &self,
        species: Option<Species>,
    ) -> Result<Vec<AggregationBatch>> {
        let rows = sqlx::query(
            r#"
            SELECT id, species, site_name, received_on, is_locked, created_by, created_at
            FROM aggregation_batches
            WHERE ($1::TEXT IS NULL OR species = $1)
            ORDER BY id DESC
            "#,
        )
        .bind(species.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_aggregation_batch).collect()
    }

    async fn aggregation_members(&self, id: AggregationBatchId) -> Result<Vec<Animal>> {
        let rows = sqlx::query(&format!(
            "SELECT {ANIMAL_COLUMNS} FROM animals WHERE aggregation_batch_id = $1 ORDER BY code"
        ))
        .bind(id.get())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_animal).collect()
    }

    async fn create_processing_batch(
        &self,
        batch: NewProcessingBatch,
        animal_ids: Vec<AnimalId>,
    ) -> Result<Option<ProcessingOutcome>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO processing_batches (species, facility, slaughter_date, halal_cert_ref, created_by)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, species, facility, slaughter_date, halal_cert_ref, created_by, created_at
            "#,
        )
        .bind(batch.species.as_str())
        .bind(&batch.facility)
        .bind(batch.slaughter_date)
        .bind(&batch.halal_cert_ref)
        .bind(batch.created_by.map(|u| u.get()))
        .fetch_one(&mut *tx)
        .await?;
        let record = row_to_processing_batch(row)?;

        let mut attached = Vec::new();
        let mut skipped = Vec::new();
        for id in animal_ids {
            let updated: Option<Uuid> = sqlx::query_scalar(
                r#"
                UPDATE animals SET status = $2
                WHERE id = $1 AND species = $3 AND status = $4
                RETURNING id
                "#,
            )
            .bind(id.as_uuid())
            .bind(AnimalStatus::Processing.as_str())
            .bind(batch.species.as_str())
            .bind(AnimalStatus::Aggregated.as_str())
            .fetch_optional(&mut *tx)
            .await?;

            if updated.is_none() {
                skipped.push(id);
                continue;
            }

            sqlx::query(
                "INSERT INTO processing_batch_animals (processing_batch_id, animal_id) VALUES ($1, $2)",
            )
            .bind(record.id.get())
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await?;
            attached.push(id);
        }

        if attached.is_empty() {
            tx.rollback().await?;
            return Ok(None);
        }

        tx.commit().await?;
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
        let row = sqlx::query(
            r#"
            SELECT id, species, facility, slaughter_date, halal_cert_ref, created_by, created_at
            FROM processing_batches WHERE id = $1
            "#,
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_processing_batch).transpose()
    }

    async fn list_processing_batches(
        &self,
        species: Option<Species>,
    ) -> Result<Vec<ProcessingBatch>> {
        let rows = sqlx::query(
            r#"
            SELECT id, species, facility, slaughter_date, halal_cert_ref, created_by, created_at
            FROM processing_batches
            WHERE ($1::TEXT IS NULL OR species = $1)
            ORDER BY id DESC
            "#,
        )
        .bind(species.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_processing_batch).collect()
    }

    async fn processing_members(&self, id: ProcessingBatchId) -> Result<Vec<Animal>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ANIMAL_COLUMNS} FROM animals
            WHERE id IN (
                SELECT animal_id FROM processing_batch_animals WHERE processing_batch_id = $1
            )
            ORDER BY code
            "#
        ))
        .bind(id.get())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_animal).collect()
    }

    async fn record_yield(&self, record: NewYield) -> Result<YieldOutcome> {
        let mut tx = self.pool.begin().await?;
        let batch_id = record.processing_batch_id;
        lock_processing_batch(&mut *tx, batch_id).await?;

        let row = sqlx::query(
            r#"
            INSERT INTO processing_yields (processing_batch_id, total_carcass_weight_kg,
                parts_included_in_batch_sale, parts_sold_separately, parts_notes, recorded_by)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, processing_batch_id, total_carcass_weight_kg, parts_included_in_batch_sale,
                parts_sold_separately, parts_notes, recorded_by, recorded_at
            "#,
        )
        .bind(batch_id.get())
        .bind(record.total_carcass_weight_kg)
        .bind(record.parts_included_in_batch_sale)
        .bind(record.parts_sold_separately)
        .bind(&record.parts_notes)
        .bind(record.recorded_by.map(|u| u.get()))
        .fetch_one(&mut *tx)
        .await
        .map_err(map_write_error)?;
        let stored = row_to_yield(row)?;

        let processed = advance_members(
            &mut *tx,
            batch_id,
            &[AnimalStatus::Processing],
            AnimalStatus::Processed,
        )
        .await?;

        tx.commit().await?;
        Ok(YieldOutcome {
            record: stored,
            processed,
        })
    }

    async fn get_yield(&self, batch_id: ProcessingBatchId) -> Result<Option<ProcessingYield>> {
        let row = sqlx::query(
            r#"
            SELECT id, processing_batch_id, total_carcass_weight_kg, parts_included_in_batch_sale,
                parts_sold_separately, parts_notes, recorded_by, recorded_at
            FROM processing_yields WHERE processing_batch_id = $1
            "#,
        )
        .bind(batch_id.get())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_yield).transpose()
    }
}

#[async_trait]
impl SalesStore for PostgresStore {
    async fn create_buyer(&self, buyer: NewBuyer) -> Result<Buyer> {
        let mut conn = self.pool.acquire().await?;
        insert_buyer(&mut *conn, buyer).await
    }

    async fn get_buyer(&self, id: BuyerId) -> Result<Option<Buyer>> {
        let row = sqlx::query(
            "SELECT id, name, phone, email, address, tax_pin, created_at FROM buyers WHERE id = $1",
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_buyer).transpose()
    }

    async fn list_buyers(&self) -> Result<Vec<Buyer>> {
        let rows = sqlx::query(
            "SELECT id, name, phone, email, address, tax_pin, created_at FROM buyers ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_buyer).collect()
    }

    async fn record_sale(&self, sale: NewSale) -> Result<RecordedSale> {
        let mut tx = self.pool.begin().await?;
        let batch_id = sale.processing_batch_id;
        lock_processing_batch(&mut *tx, batch_id).await?;

        let buyer = match sale.buyer {
            BuyerSelection::Existing(id) => {
                let row = sqlx::query(
                    "SELECT id, name, phone, email, address, tax_pin, created_at FROM buyers WHERE id = $1",
                )
                .bind(id.get())
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| StoreError::not_found("Buyer", id))?;
                row_to_buyer(row)?
            }
            BuyerSelection::New(new) => insert_buyer(&mut *tx, new).await?,
        };

        let row = sqlx::query(
            r#"
            INSERT INTO processing_batch_sales (processing_batch_id, buyer_id, sale_date,
                price_minor, currency, notes, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, processing_batch_id, buyer_id, sale_date, price_minor, currency, notes,
                created_by, created_at
            "#,
        )
        .bind(batch_id.get())
        .bind(buyer.id.get())
        .bind(sale.sale_date)
        .bind(sale.price.minor())
        .bind(&sale.currency)
        .bind(&sale.notes)
        .bind(sale.created_by.map(|u| u.get()))
        .fetch_one(&mut *tx)
        .await
        .map_err(map_write_error)?;
        let record = row_to_sale(row)?;

        let sold = advance_members(
            &mut *tx,
            batch_id,
            &[AnimalStatus::Processed, AnimalStatus::Processing],
            AnimalStatus::Sold,
        )
        .await?;

        tx.commit().await?;
        Ok(RecordedSale {
            sale: record,
            buyer,
            sold,
        })
    }

    async fn get_sale(&self, id: SaleId) -> Result<Option<BatchSale>> {
        let row = sqlx::query(
            r#"
            SELECT id, processing_batch_id, buyer_id, sale_date, price_minor, currency, notes,
                created_by, created_at
            FROM processing_batch_sales WHERE id = $1
            "#,
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_sale).transpose()
    }

    async fn get_sale_for_batch(&self, batch_id: ProcessingBatchId) -> Result<Option<BatchSale>> {
        let row = sqlx::query(
            r#"
            SELECT id, processing_batch_id, buyer_id, sale_date, price_minor, currency, notes,
                created_by, created_at
            FROM processing_batch_sales WHERE processing_batch_id = $1
            "#,
        )
        .bind(batch_id.get())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_sale).transpose()
    }

    async fn create_invoice(
        &self,
        invoice: NewInvoice,
        items: Vec<NewInvoiceItem>,
    ) -> Result<Invoice> {
        let mut tx = self.pool.begin().await?;
        let issued_at: Option<DateTime<Utc>> =
            (invoice.status == InvoiceStatus::Issued).then(Utc::now);

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO invoices (invoice_number, sale_id, buyer_id, issue_date, due_date, currency,
                subtotal_minor, tax_minor, total_minor, status, notes, terms, issued_at, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {INVOICE_COLUMNS}
            "#
        ))
        .bind(&invoice.invoice_number)
        .bind(invoice.sale_id.get())
        .bind(invoice.buyer_id.get())
        .bind(invoice.issue_date)
        .bind(invoice.due_date)
        .bind(&invoice.currency)
        .bind(invoice.subtotal.minor())
        .bind(invoice.tax.minor())
        .bind(invoice.total.minor())
        .bind(invoice.status.as_str())
        .bind(&invoice.notes)
        .bind(&invoice.terms)
        .bind(issued_at)
        .bind(invoice.created_by.map(|u| u.get()))
        .fetch_one(&mut *tx)
        .await
        .map_err(map_write_error)?;
        let record = row_to_invoice(row)?;

        for (position, item) in items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO invoice_items (invoice_id, position, description, quantity,
                    unit_price_minor, line_total_minor)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(record.id.get())
            .bind(position as i32)
            .bind(&item.description)
            .bind(item.quantity)
            .bind(item.unit_price.minor())
            .bind(item.line_total.minor())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(record)
    }

    async fn get_invoice(&self, id: InvoiceId) -> Result<Option<Invoice>> {
        let row = sqlx::query(&format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = $1"))
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_to_invoice).transpose()
    }

    async fn get_invoice_for_sale(&self, sale_id: SaleId) -> Result<Option<Invoice>> {
        let row = sqlx::query(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE sale_id = $1"
        ))
        .bind(sale_id.get())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_invoice).transpose()
    }

    async fn invoice_items(&self, id: InvoiceId) -> Result<Vec<InvoiceItem>> {
        let rows = sqlx::query(
            r#"
            SELECT id, invoice_id, position, description, quantity, unit_price_minor, line_total_minor
            FROM invoice_items WHERE invoice_id = $1 ORDER BY position
            "#,
        )
        .bind(id.get())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_invoice_item).collect()
    }

    async fn update_invoice_status(
        &self,
        id: InvoiceId,
        expected: InvoiceStatus,
        target: InvoiceStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Invoice>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE invoices SET
                status = $3,
                issued_at = CASE WHEN $3 = 'issued' THEN $4 ELSE issued_at END,
                paid_at = CASE WHEN $3 = 'paid' THEN $4 ELSE paid_at END,
                voided_at = CASE WHEN $3 = 'void' THEN $4 ELSE voided_at END
            WHERE id = $1 AND status = $2
            RETURNING {INVOICE_COLUMNS}
            "#
        ))
        .bind(id.get())
        .bind(expected.as_str())
        .bind(target.as_str())
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(row_to_invoice(row)?)),
            None if self.get_invoice(id).await?.is_some() => Ok(None),
            None => Err(StoreError::not_found("Invoice", id)),
        }
    }
}

#[async_trait]
impl DocumentStore for PostgresStore {
    async fn insert_document(&self, document: NewDocument) -> Result<Document> {
        let doc_type = document.terms.doc_type();
        let terms = serde_json::to_value(&document.terms)?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let taken: Vec<i32> = sqlx::query_scalar(
                "SELECT version FROM documents WHERE buyer_id = $1 AND doc_type = $2",
            )
            .bind(document.buyer_id.get())
            .bind(doc_type.as_str())
            .fetch_all(&self.pool)
            .await?;
            let version = pick_document_version(document.requested_version, &taken);

            let inserted = sqlx::query(&format!(
                r#"
                INSERT INTO documents (id, buyer_id, doc_type, version, title, status, terms, created_by)
                VALUES ($1, $2, $3, $4, $5, 'draft', $6, $7)
                RETURNING {DOCUMENT_COLUMNS}
                "#
            ))
            .bind(Uuid::new_v4())
            .bind(document.buyer_id.get())
            .bind(doc_type.as_str())
            .bind(version)
            .bind(&document.title)
            .bind(&terms)
            .bind(document.created_by.map(|u| u.get()))
            .fetch_one(&self.pool)
            .await
            .map_err(map_write_error);

            match inserted {
                Ok(row) => return row_to_document(row),
                Err(err)
                    if err.is_conflict_on(constraint::DOCUMENT_VERSION)
                        && attempt < DOCUMENT_INSERT_ATTEMPTS =>
                {
                    tracing::debug!(version, attempt, "document version taken concurrently, retrying");
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn get_document(&self, id: DocumentId) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_document).transpose()
    }

    async fn list_documents(&self, filter: DocumentFilter) -> Result<Vec<Document>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {DOCUMENT_COLUMNS} FROM documents
            WHERE ($1::BIGINT IS NULL OR buyer_id = $1)
              AND ($2::TEXT IS NULL OR status = $2)
              AND ($3::TEXT IS NULL OR doc_type = $3)
            ORDER BY created_at DESC
            "#
        ))
        .bind(filter.buyer_id.map(|b| b.get()))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.doc_type.map(|t| t.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_document).collect()
    }

    async fn find_by_token_hash(&self, hash: &str) -> Result<Option<(Document, TokenState)>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {DOCUMENT_COLUMNS} FROM documents
            WHERE sign_token_hash = $1 OR consumed_token_hash = $1
            LIMIT 1
            "#
        ))
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let document = row_to_document(row)?;
        let state = if document.sign_token_hash.as_deref() == Some(hash) {
            TokenState::Active
        } else {
            TokenState::Consumed
        };
        Ok(Some((document, state)))
    }

    async fn signatures(&self, id: DocumentId) -> Result<Vec<DocumentSignature>> {
        let mut conn = self.pool.acquire().await?;
        load_signatures(&mut *conn, id).await
    }

    async fn update_document<T, E, F>(&self, id: DocumentId, decide: F) -> std::result::Result<T, E>
    where
        T: Send,
        E: From<StoreError> + Send,
        F: FnOnce(&Document, &[DocumentSignature]) -> std::result::Result<(DocumentWrite, T), E>
            + Send,
    {
        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;
        let mut document = lock_document(&mut *tx, id).await?;
        let signatures = load_signatures(&mut *tx, id).await?;

        let (write, value) = decide(&document, &signatures)?;
        if write.is_empty() {
            tx.rollback().await.map_err(StoreError::from)?;
            return Ok(value);
        }

        if let Some(signature) = &write.signature
            && signature.signer_type == SignerType::Buyer
            && signatures.iter().any(|s| s.signer_type == SignerType::Buyer)
        {
            return Err(StoreError::conflict(constraint::ONE_BUYER_SIGNATURE).into());
        }
        let now = Utc::now();
        document.apply(&write, now);
        save_document(&mut *tx, &document).await?;
        if let Some(signature) = write.signature {
            insert_signature(&mut *tx, &signature.into_record(id, now)).await?;
        }

        tx.commit().await.map_err(StoreError::from)?;
        Ok(value)
    }
}
