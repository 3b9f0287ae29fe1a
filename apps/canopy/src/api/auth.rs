//! # Authentication Module
//!
//! Two independent checks guard the Canopy HTTP API.
//!
//! ## API key
//!
//! - `CANOPY_API_KEY`: If set, all requests (except /health) require this key
//!
//! ```text
//! Authorization: Bearer <your-api-key>
//! ```
//!
//! ## Caller identity
//!
//! Every entity route acts on behalf of a caller identified by two headers
//! set by the upstream gateway:
//!
//! ```text
//! X-User-Id: <uuid>
//! X-Role: <role name>
//! ```
//!
//! A missing or malformed header is answered with 401.

use super::types::ApiError;
use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{Request, StatusCode, header, request::Parts},
    middleware::Next,
    response::Response,
};
use canopy_core::{Caller, CanopyError, UserId};
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// Header carrying the caller's user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Header carrying the caller's role.
pub const ROLE_HEADER: &str = "x-role";

// =============================================================================
// API KEY AUTHENTICATION
// =============================================================================

/// `Some(key)` if `CANOPY_API_KEY` is set and non-empty, `None` otherwise
/// (authentication disabled).
pub fn get_api_key_from_env() -> Option<String> {
    std::env::var("CANOPY_API_KEY")
        .ok()
        .filter(|k| !k.is_empty())
}

/// Compare two keys without leaking where, or whether their lengths, differ.
fn keys_match(provided: &[u8], expected: &[u8]) -> bool {
    let max_len = provided.len().max(expected.len());
    let mut padded_provided = vec![0u8; max_len];
    let mut padded_expected = vec![0u8; max_len];
    padded_provided[..provided.len()].copy_from_slice(provided);
    padded_expected[..expected.len()].copy_from_slice(expected);

    let bytes_match: bool = padded_provided.ct_eq(&padded_expected).into();
    bytes_match && provided.len() == expected.len()
}

/// API key authentication middleware.
///
/// The expected key is captured when the router is built. `/health` is
/// always allowed (load balancer checks).
pub async fn api_key_auth_middleware(
    State(expected): State<Arc<str>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, &'static str)> {
    if request.uri().path() == "/health" {
        return Ok(next.run(request).await);
    }

    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let Some(header_value) = auth_header else {
        tracing::warn!(
            event = "auth_failure",
            reason = "missing_authorization_header",
            "Missing Authorization header"
        );
        return Err((StatusCode::UNAUTHORIZED, "Unauthorized"));
    };

    // Both "Bearer <key>" and a raw "<key>" are accepted.
    let provided = header_value.strip_prefix("Bearer ").unwrap_or(header_value);
    if keys_match(provided.as_bytes(), expected.as_bytes()) {
        Ok(next.run(request).await)
    } else {
        tracing::warn!(
            event = "auth_failure",
            reason = "invalid_api_key",
            "Authentication failed: invalid API key"
        );
        Err((StatusCode::UNAUTHORIZED, "Unauthorized"))
    }
}

// =============================================================================
// CALLER IDENTITY
// =============================================================================

/// The caller a request acts for, taken from the gateway headers.
#[derive(Debug, Clone)]
pub struct CallerIdentity(pub Caller);

fn header_str<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

impl<S: Send + Sync> FromRequestParts<S> for CallerIdentity {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header_str(parts, USER_ID_HEADER)
            .and_then(|raw| raw.parse::<UserId>().ok())
            .filter(|id| !id.is_nil());
        let role = header_str(parts, ROLE_HEADER);

        match (user_id, role) {
            (Some(user_id), Some(role)) => Ok(Self(Caller::new(user_id, role))),
            (user_id, role) => {
                tracing::warn!(
                    event = "auth_failure",
                    reason = "caller_identity",
                    has_user = user_id.is_some(),
                    has_role = role.is_some(),
                    "Missing or malformed caller identity headers"
                );
                Err(ApiError::from(CanopyError::Unauthorized))
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
