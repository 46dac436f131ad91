//! HTTP API for livestock traceability, batch sales and contract signing.
//!
//! Staff endpoints sit behind the actor headers and the terms-of-use gate.
//! The `/sign/{token}` endpoints are public and authenticated by the token
//! alone. Requests are traced and counted into Prometheus metrics.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::{Router, middleware};
use metrics_exporter_prometheus::PrometheusHandle;
use store::Store;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use state::AppState;

use routes::{animals, documents, sales, signing, system};

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: Store>(state: Arc<AppState<S>>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(system::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(system::health))
        // Animal pipeline
        .route(
            "/farmers",
            post(animals::register_farmer::<S>).get(animals::list_farmers::<S>),
        )
        .route(
            "/animals",
            post(animals::register_animal::<S>).get(animals::list_animals::<S>),
        )
        .route("/animals/{id}", get(animals::get_animal::<S>))
        .route(
            "/aggregation-batches",
            post(animals::create_aggregation_batch::<S>)
                .get(animals::list_aggregation_batches::<S>),
        )
        .route(
            "/aggregation-batches/{id}",
            get(animals::get_aggregation_batch::<S>),
        )
        .route(
            "/processing-batches",
            post(animals::start_processing::<S>).get(animals::list_processing_batches::<S>),
        )
        // Yield, sale and invoice
        .route("/processing-batches/{id}", get(sales::batch_overview::<S>))
        .route(
            "/processing-batches/{id}/yield",
            post(sales::record_yield::<S>),
        )
        .route("/processing-batches/{id}/sale", post(sales::record_sale::<S>))
        .route(
            "/buyers",
            post(sales::create_buyer::<S>).get(sales::list_buyers::<S>),
        )
        .route("/buyers/{id}", get(sales::get_buyer::<S>))
        .route("/sales/{id}", get(sales::get_sale::<S>))
        .route("/sales/{id}/invoice", post(sales::generate_invoice::<S>))
        .route("/invoices/{id}", get(sales::get_invoice::<S>))
        .route("/invoices/{id}/pdf", get(sales::invoice_pdf::<S>))
        .route(
            "/invoices/{id}/status",
            post(sales::transition_invoice::<S>),
        )
        // Contract documents
        .route(
            "/documents",
            post(documents::create_document::<S>).get(documents::list_documents::<S>),
        )
        .route("/documents/{id}", get(documents::get_document::<S>))
        .route("/documents/{id}/terms", put(documents::edit_terms::<S>))
        .route(
            "/documents/{id}/signing-link",
            post(documents::issue_signing_link::<S>),
        )
        .route(
            "/documents/{id}/execute",
            post(documents::execute_document::<S>),
        )
        .route("/documents/{id}/void", post(documents::void_document::<S>))
        .route(
            "/documents/{id}/status",
            post(documents::transition_document::<S>),
        )
        .route("/documents/{id}/pdf", get(documents::download_document::<S>))
        .route(
            "/documents/{id}/timeline",
            get(documents::document_timeline::<S>),
        )
        // Public signing
        .route(
            "/sign/{token}",
            get(signing::signing_page::<S>).post(signing::submit_signature::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(middleware::from_fn(auth::require_terms_acceptance))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
