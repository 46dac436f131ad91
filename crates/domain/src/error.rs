//! Domain error types.

use store::StoreError;
use thiserror::Error;

use crate::documents::{DocumentError, RenderError, SigningError, SnapshotError};
use crate::pipeline::PipelineError;
use crate::sales::SalesError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error occurred in the store.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Animal registration or batch formation was rejected.
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Yield, sale or invoice rule was violated.
    #[error("Sales error: {0}")]
    Sales(#[from] SalesError),

    /// Document lifecycle rule was violated.
    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    /// Public signing request was rejected.
    #[error("Signing error: {0}")]
    Signing(#[from] SigningError),

    /// The PDF renderer failed.
    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    /// Snapshot storage failed.
    #[error("Snapshot storage error: {0}")]
    Snapshot(#[from] SnapshotError),

    /// Entity not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
}

impl DomainError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        DomainError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}
