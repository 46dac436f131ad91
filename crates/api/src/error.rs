//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::{
    DocumentError, DomainError, PipelineError, SalesError, SigningError, SnapshotError,
};
use store::StoreError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// No staff identity on the request.
    Unauthorized(String),
    /// Staff identity without the required role.
    Forbidden(String),
    /// The caller has not accepted the terms of use.
    TermsNotAccepted,
    /// Domain logic error.
    Domain(DomainError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::TermsNotAccepted => (
                StatusCode::PRECONDITION_REQUIRED,
                "Terms of use must be accepted".to_string(),
            ),
            ApiError::Domain(err) => domain_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn domain_error_to_response(err: DomainError) -> (StatusCode, String) {
    let status = match &err {
        DomainError::NotFound { .. } => StatusCode::NOT_FOUND,
        DomainError::Store(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
        DomainError::Store(StoreError::Conflict { .. }) => StatusCode::CONFLICT,

        DomainError::Pipeline(PipelineError::FarmerNotFound(_)) => StatusCode::NOT_FOUND,
        DomainError::Pipeline(PipelineError::NoQualifyingAnimals { .. }) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        DomainError::Pipeline(_) => StatusCode::BAD_REQUEST,

        DomainError::Sales(
            SalesError::YieldAlreadyRecorded(_)
            | SalesError::YieldRequired(_)
            | SalesError::InvalidInvoiceTransition { .. }
            | SalesError::InvoiceNumberUnavailable,
        ) => StatusCode::CONFLICT,
        DomainError::Sales(_) => StatusCode::BAD_REQUEST,

        DomainError::Document(
            DocumentError::InvalidTransition { .. }
            | DocumentError::NotEditable(_)
            | DocumentError::SigningLinkBlocked(_),
        ) => StatusCode::CONFLICT,
        DomainError::Document(_) => StatusCode::BAD_REQUEST,

        DomainError::Signing(signing) => {
            // Public callers only ever see the generic signing message.
            let status = match signing {
                SigningError::InvalidToken => StatusCode::NOT_FOUND,
                SigningError::AlreadySigned => StatusCode::CONFLICT,
                SigningError::Expired | SigningError::Unavailable => StatusCode::GONE,
                SigningError::Invalid(_) => StatusCode::BAD_REQUEST,
            };
            return (status, signing.to_string());
        }

        DomainError::Render(_) => {
            tracing::error!(error = %err, "PDF rendering failed");
            StatusCode::BAD_GATEWAY
        }
        DomainError::Snapshot(SnapshotError::NotFound(_)) => {
            tracing::error!(error = %err, "recorded snapshot is missing from storage");
            StatusCode::INTERNAL_SERVER_ERROR
        }
        DomainError::Store(_) | DomainError::Snapshot(_) => {
            tracing::error!(error = %err, "internal server error");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.to_string())
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}

#[cfg(test)]
mod tests {
    use common::{DocumentStatus, ProcessingBatchId};

    use super::*;

    fn status_of(err: impl Into<DomainError>) -> StatusCode {
        domain_error_to_response(err.into()).0
    }

    #[test]
    fn test_signing_outcomes_have_distinct_statuses() {
        assert_eq!(status_of(SigningError::InvalidToken), StatusCode::NOT_FOUND);
        assert_eq!(status_of(SigningError::AlreadySigned), StatusCode::CONFLICT);
        assert_eq!(status_of(SigningError::Expired), StatusCode::GONE);
        assert_eq!(status_of(SigningError::Unavailable), StatusCode::GONE);
        assert_eq!(
            status_of(SigningError::Invalid("Signer name is required".to_string())),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_rule_violations() {
        assert_eq!(
            status_of(SalesError::YieldRequired(ProcessingBatchId::new(1))),
            StatusCode::CONFLICT
        );
        assert_eq!(status_of(SalesError::InvalidPrice), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(DocumentError::NotEditable(DocumentStatus::Executed)),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(DocumentError::InvalidTerms(vec!["Quantity".to_string()])),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(StoreError::not_found("Document", "x")),
            StatusCode::NOT_FOUND
        );
    }
}
