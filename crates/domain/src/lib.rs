//! Domain layer for the traceability platform.
//!
//! This crate holds the rules that sit on top of the store:
//! - the animal pipeline (registration, aggregation, processing)
//! - yield, sale and invoice generation for processing batches
//! - the contract document lifecycle and buyer e-signature flow
//! - the PDF rendering and snapshot storage ports

pub mod documents;
pub mod error;
pub mod pipeline;
pub mod sales;

pub use documents::{
    Actor, CreateDocument, DocumentDetails, DocumentError, DocumentService, DocumentSettings,
    FsSnapshotStorage, HtmlPassthroughRenderer, HttpPdfRenderer, InMemorySnapshotStorage,
    IssuedLink, PdfFile, PdfRenderer, RenderError, SignatureSubmission, SigningError, SigningView,
    SnapshotError, SnapshotStorage, StoredFile, TimelineEntry, TimelineEvent, letterhead,
};
pub use error::DomainError;
pub use pipeline::{
    AggregateAnimals, AggregationBatchView, IntakeLine, PipelineError, PipelineService,
    RegisterAnimal, RegisterFarmer, StartProcessing,
};
pub use sales::{
    BatchOverview, BuyerChoice, InvoiceOutcome, InvoiceView, RecordSale, RecordYield,
    SaleOutcome, SalesError, SalesService,
};
