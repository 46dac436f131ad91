//! Yield, sale and invoice generation for processing batches.
//!
//! A batch can only be sold once its yield is recorded, is sold at most once,
//! and gets at most one invoice. Duplicate submissions resolve to the record
//! that won instead of failing.

mod commands;
mod invoice;
mod service;

pub use commands::{BuyerChoice, RecordSale, RecordYield};
pub use invoice::{INVOICE_TERMS, invoice_item_description, invoice_number};
pub use service::{BatchOverview, InvoiceOutcome, InvoiceView, SaleOutcome, SalesService};

use common::{InvoiceStatus, ProcessingBatchId};
use thiserror::Error;

/// Errors specific to yield, sale and invoice handling.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SalesError {
    /// Carcass weight must be a positive number.
    #[error("Invalid carcass weight: {0}")]
    InvalidCarcassWeight(f64),

    /// The batch already has its yield.
    #[error("Yield already recorded for processing batch {0}")]
    YieldAlreadyRecorded(ProcessingBatchId),

    /// A sale was attempted before the yield was recorded.
    #[error("Record the yield for processing batch {0} before recording a sale")]
    YieldRequired(ProcessingBatchId),

    /// Sale price must be positive.
    #[error("Sale price must be greater than zero")]
    InvalidPrice,

    /// A new buyer needs at least a name.
    #[error("Buyer name is required")]
    BuyerNameRequired,

    /// The invoice status table does not allow this move.
    #[error("Invalid invoice transition from {from} to {to}")]
    InvalidInvoiceTransition {
        from: InvoiceStatus,
        to: InvoiceStatus,
    },

    /// Two consecutive invoice numbers were already taken.
    #[error("Could not allocate a unique invoice number")]
    InvoiceNumberUnavailable,
}
