//! Persistence layer for the traceability platform.
//!
//! Every mutating method on the store traits is one atomic unit: either all of
//! its side effects (status transitions, ownership links, inserted rows) are
//! visible afterwards or none are. Two implementations are provided, an
//! in-memory store for tests and local runs and a PostgreSQL store.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod records;
pub mod store;

pub use error::{Result, StoreError, constraint};
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use records::{
    AggregationBatch, AggregationIntake, AggregationOutcome, Animal, AnimalFilter, BatchSale,
    Buyer, BuyerSelection, BuyerSigned, Document, DocumentFilter, DocumentSignature,
    DocumentWrite, Farmer, Invoice, InvoiceItem, NewAggregationBatch, NewAnimal, NewBuyer,
    NewDocument, NewFarmer, NewInvoice, NewInvoiceItem, NewProcessingBatch, NewSale,
    NewSignature, NewYield, ProcessingBatch, ProcessingOutcome, ProcessingYield, RecordedSale,
    SigningLinkWrite, SnapshotRef, TokenState, YieldOutcome, pick_document_version,
};
pub use store::{AnimalStore, BatchStore, DocumentStore, SalesStore, Store};
