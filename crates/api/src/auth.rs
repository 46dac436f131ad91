//! Staff identity and request gating.
//!
//! Identity arrives in headers set by the fronting login proxy:
//! `x-actor-name`, `x-actor-role` (`admin` or `staff`) and optionally
//! `x-actor-id`. The public signing pages carry no identity at all.

use axum::extract::{FromRequestParts, Request};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use common::UserId;
use domain::Actor;

use crate::error::ApiError;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_NAME_HEADER: &str = "x-actor-name";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";
pub const TERMS_ACCEPTED_HEADER: &str = "x-terms-accepted";

/// Paths reachable without having accepted the terms of use. Entries ending in
/// `/` match as prefixes.
const TERMS_ALLOW_LIST: &[&str] = &["/health", "/metrics", "/sign/"];

/// Role of an internal user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Staff,
}

/// Any authenticated internal user.
#[derive(Debug, Clone)]
pub struct Staff {
    pub user_id: Option<UserId>,
    pub name: String,
    pub role: Role,
}

impl Staff {
    pub fn actor(&self) -> Actor {
        Actor {
            user_id: self.user_id,
            name: self.name.clone(),
            is_admin: self.role == Role::Admin,
        }
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

impl<S> FromRequestParts<S> for Staff
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let role = match header(parts, ACTOR_ROLE_HEADER) {
            Some("admin") => Role::Admin,
            Some("staff") => Role::Staff,
            Some(other) => {
                tracing::warn!(role = %other, "unknown actor role");
                return Err(ApiError::Forbidden(format!("Unknown role: {other}")));
            }
            None => return Err(ApiError::Unauthorized("Sign in required".to_string())),
        };
        let name = header(parts, ACTOR_NAME_HEADER)
            .ok_or_else(|| ApiError::Unauthorized("Sign in required".to_string()))?
            .to_string();
        let user_id = match header(parts, ACTOR_ID_HEADER) {
            Some(raw) => Some(
                raw.parse::<i64>()
                    .map(UserId::new)
                    .map_err(|_| ApiError::BadRequest(format!("Invalid actor id: {raw}")))?,
            ),
            None => None,
        };

        Ok(Staff {
            user_id,
            name,
            role,
        })
    }
}

/// An internal user with the admin role.
#[derive(Debug, Clone)]
pub struct Admin(pub Staff);

impl<S> FromRequestParts<S> for Admin
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let staff = Staff::from_request_parts(parts, state).await?;
        if staff.role != Role::Admin {
            return Err(ApiError::Forbidden("Admin role required".to_string()));
        }
        Ok(Admin(staff))
    }
}

fn requires_terms(path: &str) -> bool {
    !TERMS_ALLOW_LIST.iter().any(|allowed| {
        if allowed.ends_with('/') {
            path.starts_with(allowed)
        } else {
            path == *allowed
        }
    })
}

/// Rejects requests outside the allow-list until the terms of use are accepted.
pub async fn require_terms_acceptance(request: Request, next: Next) -> Result<Response, ApiError> {
    let path = request.uri().path();
    if !requires_terms(path) {
        return Ok(next.run(request).await);
    }

    let accepted = request
        .headers()
        .get(TERMS_ACCEPTED_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));
    if !accepted {
        tracing::debug!(%path, "terms of use not accepted");
        metrics::counter!("terms_gate_rejections").increment(1);
        return Err(ApiError::TermsNotAccepted);
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_list() {
        assert!(!requires_terms("/health"));
        assert!(!requires_terms("/metrics"));
        assert!(!requires_terms("/sign/abc123"));
        assert!(requires_terms("/documents"));
        assert!(requires_terms("/signatures"));
        assert!(requires_terms("/healthz"));
    }

    #[test]
    fn test_staff_actor() {
        let staff = Staff {
            user_id: Some(UserId::new(3)),
            name: "Grace Njeri".to_string(),
            role: Role::Admin,
        };
        let actor = staff.actor();
        assert!(actor.is_admin);
        assert_eq!(actor.user_id, Some(UserId::new(3)));
    }
}
