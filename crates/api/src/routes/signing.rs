//! Public signing endpoints reached through an emailed link.
//!
//! No staff headers or terms acceptance are needed here; the token in the
//! path is the only credential.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, FromRequestParts, Path, State};
use axum::http::header;
use axum::http::request::Parts;
use common::SignMethod;
use domain::{DomainError, SignatureSubmission, SigningError, SigningView};
use serde::{Deserialize, Serialize};
use store::Store;

use crate::error::ApiError;
use crate::state::AppState;

const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Where a signature came from, as far as the request tells.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl<S> FromRequestParts<S> for ClientInfo
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get(FORWARDED_FOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        let ip_address = forwarded.or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        });
        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(ClientInfo {
            ip_address,
            user_agent,
        })
    }
}

#[derive(Deserialize)]
pub struct SignRequest {
    pub signer_name: String,
    pub signer_email: Option<String>,
    #[serde(default)]
    pub consent: bool,
    pub sign_method: Option<SignMethod>,
}

#[derive(Serialize)]
pub struct SignResponse {
    pub status: String,
    pub message: String,
}

/// GET /sign/{token}
pub async fn signing_page<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(token): Path<String>,
) -> Result<Json<SigningView>, ApiError> {
    Ok(Json(state.documents.signing_view(&token).await?))
}

/// POST /sign/{token}
///
/// An unreadable body is reported after the token, with the same JSON error
/// shape as every other signing outcome.
#[tracing::instrument(skip(state, token, payload), fields(ip = ?client.ip_address))]
pub async fn submit_signature<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(token): Path<String>,
    client: ClientInfo,
    payload: Result<Json<SignRequest>, JsonRejection>,
) -> Result<Json<SignResponse>, ApiError> {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(rejection) => {
            state.documents.resolve_token(&token).await?;
            tracing::debug!(error = %rejection.body_text(), "unreadable signature submission");
            return Err(DomainError::from(SigningError::Invalid(
                "Signature submission could not be read".to_string(),
            ))
            .into());
        }
    };
    let document = state
        .documents
        .sign(
            &token,
            SignatureSubmission {
                signer_name: req.signer_name,
                signer_email: req.signer_email,
                consent: req.consent,
                sign_method: req.sign_method,
                ip_address: client.ip_address,
                user_agent: client.user_agent,
            },
        )
        .await?;

    Ok(Json(SignResponse {
        status: document.status.to_string(),
        message: "Thank you, your signature has been recorded.".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(request: Request<()>) -> ClientInfo {
        let (mut parts, _) = request.into_parts();
        ClientInfo::from_request_parts(&mut parts, &()).await.unwrap()
    }

    #[tokio::test]
    async fn test_client_info_prefers_first_forwarded_hop() {
        let request = Request::builder()
            .header(FORWARDED_FOR_HEADER, "203.0.113.9, 10.0.0.1")
            .header(header::USER_AGENT, "curl/8.0")
            .body(())
            .unwrap();
        let info = extract(request).await;
        assert_eq!(info.ip_address.as_deref(), Some("203.0.113.9"));
        assert_eq!(info.user_agent.as_deref(), Some("curl/8.0"));
    }

    #[tokio::test]
    async fn test_client_info_falls_back_to_peer_address() {
        let mut request = Request::builder().body(()).unwrap();
        let addr: SocketAddr = "198.51.100.4:5000".parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        let info = extract(request).await;
        assert_eq!(info.ip_address.as_deref(), Some("198.51.100.4"));
        assert!(info.user_agent.is_none());
    }
}
