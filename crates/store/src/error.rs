use common::ParseVocabularyError;
use thiserror::Error;

/// Errors raised by the store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The referenced row does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A uniqueness constraint rejected the write.
    #[error("Conflict on {constraint}")]
    Conflict { constraint: String },

    /// A stored value could not be mapped back into the domain vocabulary.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn conflict(constraint: impl Into<String>) -> Self {
        StoreError::Conflict {
            constraint: constraint.into(),
        }
    }

    /// Returns true if this is a conflict on the named constraint.
    pub fn is_conflict_on(&self, name: &str) -> bool {
        matches!(self, StoreError::Conflict { constraint } if constraint == name)
    }
}

impl From<ParseVocabularyError> for StoreError {
    fn from(err: ParseVocabularyError) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Names of the uniqueness constraints the stores report in [`StoreError::Conflict`].
pub mod constraint {
    pub const ANIMAL_CODE: &str = "animals_code_key";
    pub const YIELD_PER_BATCH: &str = "processing_yields_batch_key";
    pub const SALE_PER_BATCH: &str = "processing_batch_sales_batch_key";
    pub const INVOICE_NUMBER: &str = "invoices_number_key";
    pub const INVOICE_PER_SALE: &str = "invoices_sale_key";
    pub const DOCUMENT_VERSION: &str = "documents_buyer_type_version_key";
    pub const SIGN_TOKEN: &str = "documents_sign_token_key";
    pub const ONE_BUYER_SIGNATURE: &str = "document_signatures_one_buyer";
}
