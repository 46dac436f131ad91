use chrono::NaiveDate;
use common::{Money, ProcessingBatchId, UserId};

/// Buyer for a sale: an existing one or one created with the sale.
pub type BuyerChoice = store::BuyerSelection;

/// Records the carcass yield of a processing batch.
#[derive(Debug, Clone)]
pub struct RecordYield {
    pub batch_id: ProcessingBatchId,
    pub total_carcass_weight_kg: f64,
    pub parts_included_in_batch_sale: bool,
    pub parts_sold_separately: bool,
    pub parts_notes: Option<String>,
    pub recorded_by: Option<UserId>,
}

/// Records the sale of a processing batch.
#[derive(Debug, Clone)]
pub struct RecordSale {
    pub batch_id: ProcessingBatchId,
    pub buyer: BuyerChoice,
    /// Defaults to today.
    pub sale_date: Option<NaiveDate>,
    pub price: Money,
    /// Defaults to the service currency.
    pub currency: Option<String>,
    pub notes: Option<String>,
    pub created_by: Option<UserId>,
}
