//! Farmer registry, animals and batch formation endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{NaiveDate, Utc};
use common::{AggregationBatchId, AnimalId, AnimalStatus, FarmerId, Money, Species};
use domain::{
    AggregateAnimals, AggregationBatchView, IntakeLine, RegisterAnimal, RegisterFarmer,
    StartProcessing,
};
use serde::Deserialize;
use store::{
    AggregationBatch, AggregationOutcome, Animal, AnimalFilter, Farmer, ProcessingBatch,
    ProcessingOutcome, Store,
};

use super::parse_id;
use crate::auth::Staff;
use crate::error::ApiError;
use crate::state::AppState;

// -- Request types --

#[derive(Deserialize)]
pub struct FarmerRequest {
    pub name: String,
    pub phone: String,
    pub county: String,
    pub ward: String,
    pub village: Option<String>,
}

#[derive(Deserialize)]
pub struct AnimalRequest {
    pub species: Species,
    pub farmer_id: i64,
    pub sex: Option<String>,
    pub breed: Option<String>,
    pub estimated_dob: Option<NaiveDate>,
}

#[derive(Deserialize)]
pub struct AnimalQuery {
    pub species: Option<Species>,
    pub status: Option<AnimalStatus>,
    pub farmer_id: Option<i64>,
}

#[derive(Deserialize)]
pub struct SpeciesQuery {
    pub species: Option<Species>,
}

#[derive(Deserialize)]
pub struct IntakeLineRequest {
    pub animal_id: AnimalId,
    pub live_weight_kg: Option<f64>,
    pub weight_method: Option<String>,
    /// Minor units.
    pub purchase_price: Option<Money>,
}

#[derive(Deserialize)]
pub struct AggregationRequest {
    pub species: Species,
    pub site_name: String,
    /// Defaults to today.
    pub received_on: Option<NaiveDate>,
    pub animals: Vec<IntakeLineRequest>,
}

#[derive(Deserialize)]
pub struct ProcessingRequest {
    pub species: Species,
    pub facility: String,
    pub slaughter_date: Option<NaiveDate>,
    pub halal_cert_ref: Option<String>,
    pub animal_ids: Vec<AnimalId>,
}

// -- Handlers --

/// POST /farmers
#[tracing::instrument(skip(state, req), fields(actor = %staff.name))]
pub async fn register_farmer<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    staff: Staff,
    Json(req): Json<FarmerRequest>,
) -> Result<(StatusCode, Json<Farmer>), ApiError> {
    let farmer = state
        .pipeline
        .register_farmer(RegisterFarmer {
            name: req.name,
            phone: req.phone,
            county: req.county,
            ward: req.ward,
            village: req.village,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(farmer)))
}

/// GET /farmers
pub async fn list_farmers<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    _staff: Staff,
) -> Result<Json<Vec<Farmer>>, ApiError> {
    Ok(Json(state.pipeline.list_farmers().await?))
}

/// POST /animals
#[tracing::instrument(skip(state, req), fields(actor = %staff.name))]
pub async fn register_animal<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    staff: Staff,
    Json(req): Json<AnimalRequest>,
) -> Result<(StatusCode, Json<Animal>), ApiError> {
    let animal = state
        .pipeline
        .register_animal(RegisterAnimal {
            species: req.species,
            farmer_id: FarmerId::new(req.farmer_id),
            sex: req.sex,
            breed: req.breed,
            estimated_dob: req.estimated_dob,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(animal)))
}

/// GET /animals?species=goat&status=on_farm
pub async fn list_animals<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    _staff: Staff,
    Query(query): Query<AnimalQuery>,
) -> Result<Json<Vec<Animal>>, ApiError> {
    let filter = AnimalFilter {
        species: query.species,
        status: query.status,
        farmer_id: query.farmer_id.map(FarmerId::new),
    };
    Ok(Json(state.pipeline.list_animals(filter).await?))
}

/// GET /animals/{id}
pub async fn get_animal<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    _staff: Staff,
    Path(id): Path<String>,
) -> Result<Json<Animal>, ApiError> {
    let id: AnimalId = parse_id(&id, "animal id")?;
    Ok(Json(state.pipeline.get_animal(id).await?))
}

/// POST /aggregation-batches
#[tracing::instrument(skip(state, req), fields(actor = %staff.name, species = %req.species))]
pub async fn create_aggregation_batch<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    staff: Staff,
    Json(req): Json<AggregationRequest>,
) -> Result<(StatusCode, Json<AggregationOutcome>), ApiError> {
    let lines = req
        .animals
        .into_iter()
        .map(|line| IntakeLine {
            animal_id: line.animal_id,
            live_weight_kg: line.live_weight_kg,
            weight_method: line.weight_method,
            purchase_price: line.purchase_price,
        })
        .collect();

    let outcome = state
        .pipeline
        .aggregate(AggregateAnimals {
            species: req.species,
            site_name: req.site_name,
            received_on: req.received_on.unwrap_or_else(|| Utc::now().date_naive()),
            lines,
            created_by: staff.user_id,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// GET /aggregation-batches?species=goat
pub async fn list_aggregation_batches<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    _staff: Staff,
    Query(query): Query<SpeciesQuery>,
) -> Result<Json<Vec<AggregationBatch>>, ApiError> {
    Ok(Json(
        state.pipeline.list_aggregation_batches(query.species).await?,
    ))
}

/// GET /aggregation-batches/{id}
pub async fn get_aggregation_batch<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    _staff: Staff,
    Path(id): Path<i64>,
) -> Result<Json<AggregationBatchView>, ApiError> {
    Ok(Json(
        state
            .pipeline
            .aggregation_batch(AggregationBatchId::new(id))
            .await?,
    ))
}

/// POST /processing-batches
#[tracing::instrument(skip(state, req), fields(actor = %staff.name, species = %req.species))]
pub async fn start_processing<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    staff: Staff,
    Json(req): Json<ProcessingRequest>,
) -> Result<(StatusCode, Json<ProcessingOutcome>), ApiError> {
    let outcome = state
        .pipeline
        .start_processing(StartProcessing {
            species: req.species,
            facility: req.facility,
            slaughter_date: req.slaughter_date,
            halal_cert_ref: req.halal_cert_ref,
            animal_ids: req.animal_ids,
            created_by: staff.user_id,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// GET /processing-batches?species=goat
pub async fn list_processing_batches<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    _staff: Staff,
    Query(query): Query<SpeciesQuery>,
) -> Result<Json<Vec<ProcessingBatch>>, ApiError> {
    Ok(Json(
        state.pipeline.list_processing_batches(query.species).await?,
    ))
}
