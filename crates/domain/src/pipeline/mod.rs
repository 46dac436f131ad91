//! Animal registry and the batch operations that move animals through the
//! `on_farm -> aggregated -> processing` part of the pipeline.

mod commands;
mod service;

pub use commands::{AggregateAnimals, IntakeLine, RegisterAnimal, RegisterFarmer, StartProcessing};
pub use service::{AggregationBatchView, PipelineService};
pub(crate) use service::{optional, required};

use common::{FarmerId, Species};
use thiserror::Error;

/// Errors specific to registration and batch formation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    /// A required text field was empty.
    #[error("{0} is required")]
    MissingField(&'static str),

    /// The submission named no animals.
    #[error("No animals selected")]
    EmptySelection,

    /// A live weight was zero, negative or not a number.
    #[error("Invalid live weight {weight} for animal {animal}")]
    InvalidWeight { animal: String, weight: f64 },

    /// A purchase price was negative.
    #[error("Invalid purchase price for animal {animal}")]
    InvalidPrice { animal: String },

    /// None of the submitted animals could join the batch.
    #[error("No eligible {species} animals could be added to the {stage} batch")]
    NoQualifyingAnimals { stage: &'static str, species: Species },

    /// The owning farmer does not exist.
    #[error("Farmer not found: {0}")]
    FarmerNotFound(FarmerId),
}
