//! Pipeline service.

use std::collections::HashSet;

use chrono::{Datelike, Utc};
use common::{AggregationBatchId, AnimalId, FarmerId, Species};
use serde::Serialize;
use store::{
    AggregationBatch, AggregationIntake, AggregationOutcome, Animal, AnimalFilter, AnimalStore,
    BatchStore, Farmer, NewAggregationBatch, NewAnimal, NewFarmer, NewProcessingBatch,
    ProcessingBatch, ProcessingOutcome,
};

use super::{AggregateAnimals, PipelineError, RegisterAnimal, RegisterFarmer, StartProcessing};
use crate::error::DomainError;

const DEFAULT_WEIGHT_METHOD: &str = "scale";

/// An aggregation batch with its members.
#[derive(Debug, Clone, Serialize)]
pub struct AggregationBatchView {
    pub batch: AggregationBatch,
    pub animals: Vec<Animal>,
}

/// Service for the animal registry and batch formation.
///
/// Animals only ever move forward, and only as a side effect of a batch
/// operation. Each batch operation attaches the animals that are in the
/// expected prior state, skips the rest, and refuses to create a batch with no
/// members at all.
pub struct PipelineService<S> {
    store: S,
    currency: String,
}

impl<S: AnimalStore + BatchStore> PipelineService<S> {
    /// Creates a new pipeline service stamping purchases in `currency`.
    pub fn new(store: S, currency: impl Into<String>) -> Self {
        Self {
            store,
            currency: currency.into(),
        }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    #[tracing::instrument(skip(self))]
    pub async fn register_farmer(&self, cmd: RegisterFarmer) -> Result<Farmer, DomainError> {
        let farmer = NewFarmer {
            name: required(cmd.name, "Farmer name")?,
            phone: required(cmd.phone, "Phone")?,
            county: required(cmd.county, "County")?,
            ward: required(cmd.ward, "Ward")?,
            village: optional(cmd.village),
        };
        Ok(self.store.create_farmer(farmer).await?)
    }

    pub async fn list_farmers(&self) -> Result<Vec<Farmer>, DomainError> {
        Ok(self.store.list_farmers().await?)
    }

    /// Registers an animal `on_farm` and assigns its human-readable code,
    /// `RZ-<SPECIES>-<year>-<farmer>-<seq>`.
    #[tracing::instrument(skip(self))]
    pub async fn register_animal(&self, cmd: RegisterAnimal) -> Result<Animal, DomainError> {
        if self.store.get_farmer(cmd.farmer_id).await?.is_none() {
            return Err(PipelineError::FarmerNotFound(cmd.farmer_id).into());
        }

        let year = Utc::now().year();
        let counter = format!("animal:{}:{}:{}", cmd.species.code(), year, cmd.farmer_id);
        let seq = self.store.next_sequence(&counter).await?;
        let code = animal_code(cmd.species, year, cmd.farmer_id, seq);

        let animal = self
            .store
            .insert_animal(NewAnimal {
                code,
                species: cmd.species,
                farmer_id: cmd.farmer_id,
                sex: optional(cmd.sex),
                breed: optional(cmd.breed),
                estimated_dob: cmd.estimated_dob,
            })
            .await?;

        tracing::info!(animal_id = %animal.id, code = %animal.code, "animal registered");
        Ok(animal)
    }

    pub async fn get_animal(&self, id: AnimalId) -> Result<Animal, DomainError> {
        self.store
            .get_animal(id)
            .await?
            .ok_or_else(|| DomainError::not_found("Animal", id))
    }

    /// Lists animals, e.g. every goat still `on_farm`.
    pub async fn list_animals(&self, filter: AnimalFilter) -> Result<Vec<Animal>, DomainError> {
        Ok(self.store.list_animals(filter).await?)
    }

    /// Creates an aggregation batch from on-farm animals.
    ///
    /// Duplicate lines for the same animal keep the first. Animals that are
    /// not `on_farm`, already batched or of another species are skipped. Fails
    /// with [`PipelineError::NoQualifyingAnimals`] when nothing was attached,
    /// in which case no batch exists afterwards.
    #[tracing::instrument(skip(self, cmd), fields(species = %cmd.species, lines = cmd.lines.len()))]
    pub async fn aggregate(&self, cmd: AggregateAnimals) -> Result<AggregationOutcome, DomainError> {
        let site_name = required(cmd.site_name, "Site name")?;
        if cmd.lines.is_empty() {
            return Err(PipelineError::EmptySelection.into());
        }

        let mut seen = HashSet::new();
        let mut intakes = Vec::with_capacity(cmd.lines.len());
        for line in cmd.lines {
            if !seen.insert(line.animal_id) {
                continue;
            }
            if let Some(kg) = line.live_weight_kg
                && !(kg.is_finite() && kg > 0.0)
            {
                return Err(PipelineError::InvalidWeight {
                    animal: line.animal_id.to_string(),
                    weight: kg,
                }
                .into());
            }
            if let Some(price) = line.purchase_price
                && price.minor() < 0
            {
                return Err(PipelineError::InvalidPrice {
                    animal: line.animal_id.to_string(),
                }
                .into());
            }
            intakes.push(AggregationIntake {
                animal_id: line.animal_id,
                live_weight_kg: line.live_weight_kg,
                weight_method: line
                    .weight_method
                    .and_then(|m| optional(Some(m)))
                    .unwrap_or_else(|| DEFAULT_WEIGHT_METHOD.to_string()),
                purchase_price: line.purchase_price,
                currency: self.currency.clone(),
            });
        }

        let batch = NewAggregationBatch {
            species: cmd.species,
            site_name,
            received_on: cmd.received_on,
            created_by: cmd.created_by,
        };

        let Some(outcome) = self.store.create_aggregation_batch(batch, intakes).await? else {
            metrics::counter!("batch_rejected_empty").increment(1);
            tracing::warn!(species = %cmd.species, "aggregation rejected, no eligible animals");
            return Err(PipelineError::NoQualifyingAnimals {
                stage: "aggregation",
                species: cmd.species,
            }
            .into());
        };

        metrics::counter!("aggregation_batches_created").increment(1);
        metrics::counter!("animals_aggregated").increment(outcome.attached.len() as u64);
        tracing::info!(
            batch_id = %outcome.batch.id,
            attached = outcome.attached.len(),
            skipped = outcome.skipped.len(),
            "aggregation batch created"
        );
        Ok(outcome)
    }

    pub async fn aggregation_batch(
        &self,
        id: AggregationBatchId,
    ) -> Result<AggregationBatchView, DomainError> {
        let batch = self
            .store
            .get_aggregation_batch(id)
            .await?
            .ok_or_else(|| DomainError::not_found("AggregationBatch", id))?;
        let animals = self.store.aggregation_members(id).await?;
        Ok(AggregationBatchView { batch, animals })
    }

    pub async fn list_aggregation_batches(
        &self,
        species: Option<Species>,
    ) -> Result<Vec<AggregationBatch>, DomainError> {
        Ok(self.store.list_aggregation_batches(species).await?)
    }

    /// Creates a processing batch from aggregated animals.
    ///
    /// Same skip-and-continue rule as [`aggregate`](Self::aggregate).
    #[tracing::instrument(skip(self, cmd), fields(species = %cmd.species, animals = cmd.animal_ids.len()))]
    pub async fn start_processing(
        &self,
        cmd: StartProcessing,
    ) -> Result<ProcessingOutcome, DomainError> {
        let facility = required(cmd.facility, "Facility")?;
        if cmd.animal_ids.is_empty() {
            return Err(PipelineError::EmptySelection.into());
        }

        let mut seen = HashSet::new();
        let animal_ids: Vec<AnimalId> = cmd
            .animal_ids
            .into_iter()
            .filter(|id| seen.insert(*id))
            .collect();

        let batch = NewProcessingBatch {
            species: cmd.species,
            facility,
            slaughter_date: cmd.slaughter_date,
            halal_cert_ref: optional(cmd.halal_cert_ref),
            created_by: cmd.created_by,
        };

        let Some(outcome) = self.store.create_processing_batch(batch, animal_ids).await? else {
            metrics::counter!("batch_rejected_empty").increment(1);
            tracing::warn!(species = %cmd.species, "processing rejected, no eligible animals");
            return Err(PipelineError::NoQualifyingAnimals {
                stage: "processing",
                species: cmd.species,
            }
            .into());
        };

        metrics::counter!("processing_batches_created").increment(1);
        tracing::info!(
            batch_id = %outcome.batch.id,
            attached = outcome.attached.len(),
            skipped = outcome.skipped.len(),
            "processing batch created"
        );
        Ok(outcome)
    }

    pub async fn list_processing_batches(
        &self,
        species: Option<Species>,
    ) -> Result<Vec<ProcessingBatch>, DomainError> {
        Ok(self.store.list_processing_batches(species).await?)
    }
}

pub(crate) fn animal_code(species: Species, year: i32, farmer_id: FarmerId, seq: i64) -> String {
    format!("RZ-{}-{}-{}-{:03}", species.code(), year, farmer_id, seq)
}

/// Trims `value`, failing with `MissingField(field)` if nothing is left.
pub(crate) fn required(value: String, field: &'static str) -> Result<String, PipelineError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::MissingField(field));
    }
    Ok(trimmed.to_string())
}

/// Trims an optional value, mapping blank to `None`.
pub(crate) fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
