//! HTTP route handlers.

pub mod animals;
pub mod documents;
pub mod sales;
pub mod signing;
pub mod system;

use std::str::FromStr;

use axum::http::header;
use axum::response::{IntoResponse, Response};
use domain::PdfFile;

use crate::error::ApiError;

/// Parses a path or query identifier, answering 400 on garbage.
pub(crate) fn parse_id<T: FromStr>(raw: &str, what: &str) -> Result<T, ApiError> {
    raw.trim()
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid {what}: {raw}")))
}

/// Serves a rendered or stored file inline.
pub(crate) fn file_response(file: PdfFile) -> Response {
    (
        [
            (header::CONTENT_TYPE, file.content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{}\"", file.filename),
            ),
        ],
        file.bytes,
    )
        .into_response()
}
