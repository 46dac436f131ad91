//! Yield, sale, buyer and invoice endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::NaiveDate;
use common::{BuyerId, InvoiceId, InvoiceStatus, Money, ProcessingBatchId, SaleId};
use domain::{
    BatchOverview, BuyerChoice, InvoiceOutcome, InvoiceView, RecordSale, RecordYield, SaleOutcome,
};
use serde::Deserialize;
use store::{BatchSale, Buyer, Invoice, NewBuyer, Store, YieldOutcome};

use super::file_response;
use crate::auth::Staff;
use crate::error::ApiError;
use crate::state::AppState;

// -- Request types --

#[derive(Deserialize)]
pub struct YieldRequest {
    pub total_carcass_weight_kg: f64,
    #[serde(default)]
    pub parts_included_in_batch_sale: bool,
    #[serde(default)]
    pub parts_sold_separately: bool,
    pub parts_notes: Option<String>,
}

/// Either `buyer_id` of an existing buyer or a `buyer` to create.
#[derive(Deserialize)]
pub struct SaleRequest {
    pub buyer_id: Option<i64>,
    pub buyer: Option<NewBuyer>,
    pub sale_date: Option<NaiveDate>,
    /// Minor units.
    pub price: Money,
    pub currency: Option<String>,
    pub notes: Option<String>,
}

#[derive(Deserialize)]
pub struct InvoiceStatusRequest {
    pub status: InvoiceStatus,
}

// -- Handlers --

/// GET /processing-batches/{id}
pub async fn batch_overview<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    _staff: Staff,
    Path(id): Path<i64>,
) -> Result<Json<BatchOverview>, ApiError> {
    Ok(Json(
        state
            .sales
            .batch_overview(ProcessingBatchId::new(id))
            .await?,
    ))
}

/// POST /processing-batches/{id}/yield
#[tracing::instrument(skip(state, req), fields(actor = %staff.name))]
pub async fn record_yield<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    staff: Staff,
    Path(id): Path<i64>,
    Json(req): Json<YieldRequest>,
) -> Result<(StatusCode, Json<YieldOutcome>), ApiError> {
    let outcome = state
        .sales
        .record_yield(RecordYield {
            batch_id: ProcessingBatchId::new(id),
            total_carcass_weight_kg: req.total_carcass_weight_kg,
            parts_included_in_batch_sale: req.parts_included_in_batch_sale,
            parts_sold_separately: req.parts_sold_separately,
            parts_notes: req.parts_notes,
            recorded_by: staff.user_id,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// POST /processing-batches/{id}/sale
///
/// A batch that is already sold answers 303 pointing at the existing sale.
#[tracing::instrument(skip(state, req), fields(actor = %staff.name))]
pub async fn record_sale<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    staff: Staff,
    Path(id): Path<i64>,
    Json(req): Json<SaleRequest>,
) -> Result<Response, ApiError> {
    let buyer = match (req.buyer_id, req.buyer) {
        (Some(id), None) => BuyerChoice::Existing(BuyerId::new(id)),
        (None, Some(new)) => BuyerChoice::New(new),
        _ => {
            return Err(ApiError::BadRequest(
                "Provide exactly one of buyer_id or buyer".to_string(),
            ));
        }
    };

    let outcome = state
        .sales
        .record_sale(RecordSale {
            batch_id: ProcessingBatchId::new(id),
            buyer,
            sale_date: req.sale_date,
            price: req.price,
            currency: req.currency,
            notes: req.notes,
            created_by: staff.user_id,
        })
        .await?;

    let response = match outcome {
        SaleOutcome::Recorded(recorded) => (StatusCode::CREATED, Json(recorded)).into_response(),
        SaleOutcome::AlreadyRecorded(existing) => (
            StatusCode::SEE_OTHER,
            [(header::LOCATION, format!("/sales/{}", existing.id))],
            Json(existing),
        )
            .into_response(),
    };
    Ok(response)
}

/// GET /sales/{id}
pub async fn get_sale<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    _staff: Staff,
    Path(id): Path<i64>,
) -> Result<Json<BatchSale>, ApiError> {
    Ok(Json(state.sales.get_sale(SaleId::new(id)).await?))
}

/// POST /sales/{id}/invoice
///
/// 201 with a new invoice, 200 with the one the sale already has.
#[tracing::instrument(skip(state), fields(actor = %staff.name))]
pub async fn generate_invoice<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    staff: Staff,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<Invoice>), ApiError> {
    let outcome = state
        .sales
        .generate_invoice(SaleId::new(id), staff.user_id)
        .await?;
    let status = match outcome {
        InvoiceOutcome::Generated(_) => StatusCode::CREATED,
        InvoiceOutcome::Existing(_) => StatusCode::OK,
    };
    Ok((status, Json(outcome.invoice().clone())))
}

/// GET /invoices/{id}
pub async fn get_invoice<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    _staff: Staff,
    Path(id): Path<i64>,
) -> Result<Json<InvoiceView>, ApiError> {
    Ok(Json(state.sales.get_invoice(InvoiceId::new(id)).await?))
}

/// GET /invoices/{id}/pdf
pub async fn invoice_pdf<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    _staff: Staff,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let file = state.sales.invoice_pdf(InvoiceId::new(id)).await?;
    Ok(file_response(file))
}

/// POST /invoices/{id}/status
#[tracing::instrument(skip(state, req), fields(actor = %staff.name, target = %req.status))]
pub async fn transition_invoice<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    staff: Staff,
    Path(id): Path<i64>,
    Json(req): Json<InvoiceStatusRequest>,
) -> Result<Json<Invoice>, ApiError> {
    Ok(Json(
        state
            .sales
            .transition_invoice(InvoiceId::new(id), req.status)
            .await?,
    ))
}

/// POST /buyers
#[tracing::instrument(skip(state, req), fields(actor = %staff.name))]
pub async fn create_buyer<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    staff: Staff,
    Json(req): Json<NewBuyer>,
) -> Result<(StatusCode, Json<Buyer>), ApiError> {
    let buyer = state.sales.create_buyer(req).await?;
    Ok((StatusCode::CREATED, Json(buyer)))
}

/// GET /buyers
pub async fn list_buyers<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    _staff: Staff,
) -> Result<Json<Vec<Buyer>>, ApiError> {
    Ok(Json(state.sales.list_buyers().await?))
}

/// GET /buyers/{id}
pub async fn get_buyer<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    _staff: Staff,
    Path(id): Path<i64>,
) -> Result<Json<Buyer>, ApiError> {
    Ok(Json(state.sales.get_buyer(BuyerId::new(id)).await?))
}
