use store::{ProcessingBatch, ProcessingYield};

/// Payment terms printed on every generated invoice.
pub const INVOICE_TERMS: &str = "Payment due as agreed.";

/// Human-readable invoice number, `RZ-INV-<year>-<seq:04>`.
pub fn invoice_number(year: i32, seq: i64) -> String {
    format!("RZ-INV-{year}-{seq:04}")
}

/// Description of the single "1 lot" line item of a batch invoice.
///
/// Carcass weight and parts notes ride along as free text.
pub fn invoice_item_description(
    batch: &ProcessingBatch,
    yield_record: Option<&ProcessingYield>,
) -> String {
    let mut description = format!("Processing Batch #{} ({}) - 1 lot", batch.id, batch.species);
    if let Some(y) = yield_record {
        description.push_str(&format!(
            " | Carcass weight: {:.2} kg",
            y.total_carcass_weight_kg
        ));
        if let Some(notes) = y.parts_notes.as_deref().map(str::trim)
            && !notes.is_empty()
        {
            description.push_str(&format!(" | Parts: {notes}"));
        }
    }
    description
}
