//! Contract documents: typed terms, the status machine, buyer e-signature
//! through single-use links, and immutable snapshots of what was signed.

pub(crate) mod render;
mod service;
mod signing;
mod snapshots;
mod terms;

pub use render::{
    HtmlPassthroughRenderer, HttpPdfRenderer, PdfFile, PdfRenderer, RenderError, letterhead,
};
pub use service::{
    Actor, CreateDocument, DocumentDetails, DocumentService, DocumentSettings, IssuedLink,
    SigningView, TimelineEntry, TimelineEvent,
};
pub use signing::{
    BUYER_CONSENT_TEXT, EXECUTION_CONSENT_TEXT, SignatureSubmission, SigningError,
    generate_token, hash_token,
};
pub use snapshots::{
    FsSnapshotStorage, InMemorySnapshotStorage, SnapshotError, SnapshotStorage, StoredFile,
    sha256_hex, snapshot_key,
};
pub use terms::{scaffold, validate as validate_terms};

use common::{DocType, DocumentStatus};
use thiserror::Error;

/// Errors raised by the document lifecycle.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DocumentError {
    /// The status table does not allow this move.
    #[error("Invalid document transition from {from} to {to}")]
    InvalidTransition {
        from: DocumentStatus,
        to: DocumentStatus,
    },

    /// Terms can only change while the document is a draft.
    #[error("Document is {0} and can no longer be edited")]
    NotEditable(DocumentStatus),

    #[error("Terms for {found} cannot be used on a {expected} document")]
    TermsDocTypeMismatch { expected: DocType, found: DocType },

    #[error("Invalid terms: {}", .0.join("; "))]
    InvalidTerms(Vec<String>),

    #[error("Title must be at most {max} characters")]
    TitleTooLong { max: usize },

    #[error("A signing link cannot be issued for a {0} document")]
    SigningLinkBlocked(DocumentStatus),

    #[error("Signer name is required")]
    SignerNameRequired,
}
