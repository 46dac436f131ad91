//! Shared vocabulary for the livestock traceability platform.
//!
//! Every crate in the workspace speaks in these types: typed identifiers,
//! money in minor units, the species discriminant and the lifecycle enums
//! together with their transition tables.

mod ids;
mod money;
mod status;
mod terms;

pub use ids::{
    AggregationBatchId, AnimalId, BuyerId, DocumentId, FarmerId, InvoiceId, ProcessingBatchId,
    SaleId, SignatureId, UserId, YieldId,
};
pub use money::Money;
pub use status::{
    AnimalStatus, DocType, DocumentStatus, InvoiceStatus, MeatProduct, ParseVocabularyError,
    SignMethod, SignerType, Species,
};
pub use terms::{
    ContractPayment, ContractPricing, ContractProduct, ContractTerms, ExportContractTerms,
    LetterOfIntentTerms, Party, PaymentSplit,
};
