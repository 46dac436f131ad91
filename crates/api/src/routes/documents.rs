//! Contract document endpoints. Reads are open to staff; changes need an
//! admin.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use chrono::{DateTime, Utc};
use common::{BuyerId, ContractTerms, DocType, DocumentId, DocumentStatus};
use domain::{CreateDocument, DocumentDetails, TimelineEntry};
use serde::{Deserialize, Serialize};
use store::{Document, DocumentFilter, Store};

use super::{file_response, parse_id};
use crate::auth::{Admin, Staff};
use crate::error::ApiError;
use crate::state::AppState;

// -- Request types --

#[derive(Deserialize)]
pub struct CreateDocumentRequest {
    pub buyer_id: i64,
    pub doc_type: DocType,
    pub title: Option<String>,
    pub terms: Option<ContractTerms>,
    pub version: Option<i32>,
}

#[derive(Deserialize)]
pub struct DocumentQuery {
    pub buyer_id: Option<i64>,
    pub status: Option<DocumentStatus>,
    pub doc_type: Option<DocType>,
}

#[derive(Deserialize)]
pub struct DocumentStatusRequest {
    pub status: DocumentStatus,
}

// -- Response types --

#[derive(Serialize)]
pub struct SigningLinkResponse {
    pub token: String,
    pub sign_url: String,
    pub expires_at: DateTime<Utc>,
    pub document: Document,
}

fn document_id(raw: &str) -> Result<DocumentId, ApiError> {
    parse_id(raw, "document id")
}

// -- Handlers --

/// POST /documents
#[tracing::instrument(skip(state, admin, req), fields(actor = %admin.0.name, doc_type = %req.doc_type))]
pub async fn create_document<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    admin: Admin,
    Json(req): Json<CreateDocumentRequest>,
) -> Result<(StatusCode, Json<Document>), ApiError> {
    let document = state
        .documents
        .create(CreateDocument {
            buyer_id: BuyerId::new(req.buyer_id),
            doc_type: req.doc_type,
            title: req.title,
            terms: req.terms,
            version: req.version,
            created_by: admin.0.user_id,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(document)))
}

/// GET /documents
pub async fn list_documents<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    _staff: Staff,
    Query(query): Query<DocumentQuery>,
) -> Result<Json<Vec<Document>>, ApiError> {
    let filter = DocumentFilter {
        buyer_id: query.buyer_id.map(BuyerId::new),
        status: query.status,
        doc_type: query.doc_type,
    };
    Ok(Json(state.documents.list(filter).await?))
}

/// GET /documents/{id}
pub async fn get_document<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    _staff: Staff,
    Path(id): Path<String>,
) -> Result<Json<DocumentDetails>, ApiError> {
    let id = document_id(&id)?;
    Ok(Json(state.documents.details(id).await?))
}

/// PUT /documents/{id}/terms
#[tracing::instrument(skip(state, admin, terms), fields(actor = %admin.0.name))]
pub async fn edit_terms<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    admin: Admin,
    Path(id): Path<String>,
    Json(terms): Json<ContractTerms>,
) -> Result<Json<Document>, ApiError> {
    let id = document_id(&id)?;
    Ok(Json(state.documents.edit_terms(id, terms).await?))
}

/// POST /documents/{id}/signing-link
///
/// The raw token is only ever returned here.
#[tracing::instrument(skip(state, admin), fields(actor = %admin.0.name))]
pub async fn issue_signing_link<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    admin: Admin,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<SigningLinkResponse>), ApiError> {
    let id = document_id(&id)?;
    let link = state.documents.issue_signing_link(id).await?;
    let body = SigningLinkResponse {
        sign_url: format!("/sign/{}", link.token),
        token: link.token,
        expires_at: link.expires_at,
        document: link.document,
    };
    Ok((StatusCode::CREATED, Json(body)))
}

/// POST /documents/{id}/execute
#[tracing::instrument(skip(state, admin), fields(actor = %admin.0.name))]
pub async fn execute_document<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    admin: Admin,
    Path(id): Path<String>,
) -> Result<Json<Document>, ApiError> {
    let id = document_id(&id)?;
    Ok(Json(state.documents.execute(id, admin.0.actor()).await?))
}

/// POST /documents/{id}/void
#[tracing::instrument(skip(state, admin), fields(actor = %admin.0.name))]
pub async fn void_document<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    admin: Admin,
    Path(id): Path<String>,
) -> Result<Json<Document>, ApiError> {
    let id = document_id(&id)?;
    Ok(Json(state.documents.void(id).await?))
}

/// POST /documents/{id}/status
#[tracing::instrument(skip(state, admin, req), fields(actor = %admin.0.name, target = %req.status))]
pub async fn transition_document<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    admin: Admin,
    Path(id): Path<String>,
    Json(req): Json<DocumentStatusRequest>,
) -> Result<Json<Document>, ApiError> {
    let id = document_id(&id)?;
    Ok(Json(state.documents.transition(id, req.status).await?))
}

/// GET /documents/{id}/pdf
pub async fn download_document<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    _staff: Staff,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = document_id(&id)?;
    let file = state.documents.download(id).await?;
    Ok(file_response(file))
}

/// GET /documents/{id}/timeline
pub async fn document_timeline<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    _staff: Staff,
    Path(id): Path<String>,
) -> Result<Json<Vec<TimelineEntry>>, ApiError> {
    let id = document_id(&id)?;
    Ok(Json(state.documents.timeline(id).await?))
}
