//! # API Request/Response Types
//!
//! JSON structures for the HTTP API, and the mapping from engine errors to
//! HTTP responses.
//!
//! ## Error body
//!
//! ```json
//! { "error": { "kind": "parent_cycle", "message": "...", "details": { ... } } }
//! ```
//!
//! `kind` is the stable machine-readable name; `details` carries the
//! structured fields of the error (offending ids, limits, field names).

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use canopy_core::{
    CanopyError, Capability, Entity, EntityId, Publication, TreeNode, ValidationRule,
};
use serde::{Deserialize, Serialize};

// =============================================================================
// HEALTH RESPONSE
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// =============================================================================
// ENTITY REQUESTS
// =============================================================================

/// Body of `POST /entities`.
///
/// `entity_type` stays a string here so an unknown type is reported as a
/// validation error rather than a deserialization failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEntityRequest {
    pub entity_type: String,
    pub name: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub parent_id: Option<EntityId>,
    #[serde(default)]
    pub is_draft: bool,
}

/// Body of `PUT /entities/{id}`.
///
/// `parent_id` is only looked at when `parent_changed` is set; a changed
/// parent of `null` moves the entity to the top level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateEntityRequest {
    pub name: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub parent_changed: bool,
    #[serde(default)]
    pub parent_id: Option<EntityId>,
    #[serde(default)]
    pub is_draft: bool,
}

/// Query string of `GET /permitted-ids`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermittedIdsQuery {
    /// `read` (default) or `write`.
    pub capability: Option<String>,
}

// =============================================================================
// ENTITY RESPONSES
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEntityResponse {
    pub id: EntityId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateEntityResponse {
    pub id: EntityId,
    pub publication: Publication,
}

/// Every entity removed by a cascading delete, the target included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteEntityResponse {
    pub deleted: Vec<EntityId>,
}

/// Version history, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionsResponse {
    pub id: EntityId,
    pub versions: Vec<Entity>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeResponse {
    /// Number of nodes across all roots.
    pub total: usize,
    pub roots: Vec<TreeNode>,
}

impl TreeResponse {
    #[must_use]
    pub fn new(roots: Vec<TreeNode>) -> Self {
        let total = roots.iter().map(TreeNode::subtree_size).sum();
        Self { total, roots }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermittedIdsResponse {
    pub capability: Capability,
    pub ids: Vec<EntityId>,
}

// =============================================================================
// ERRORS
// =============================================================================

/// Structured error payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: String,
    pub message: String,
    pub details: serde_json::Value,
}

/// Top-level error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

/// An error on its way to the client.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ApiError {
    /// A malformed path or query parameter.
    pub fn invalid_param(field: &'static str, value: &str) -> Self {
        Self::from(CanopyError::ValidationFailed {
            field,
            rule: ValidationRule::UnknownValue {
                value: value.to_string(),
            },
        })
    }

    /// Failure outside the engine (worker pool, runtime).
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: ErrorBody {
                error: ErrorDetail {
                    kind: "internal".to_string(),
                    message: message.into(),
                    details: serde_json::Value::Null,
                },
            },
        }
    }
}

/// HTTP status for an engine error.
#[must_use]
pub fn status_for(err: &CanopyError) -> StatusCode {
    match err {
        CanopyError::ValidationFailed { .. } => StatusCode::BAD_REQUEST,
        CanopyError::EntityNotFound { .. } => StatusCode::NOT_FOUND,
        CanopyError::Forbidden { .. } | CanopyError::AdminRequired { .. } => StatusCode::FORBIDDEN,
        CanopyError::Unauthorized => StatusCode::UNAUTHORIZED,
        CanopyError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        e if e.is_structural() => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<CanopyError> for ApiError {
    fn from(err: CanopyError) -> Self {
        let status = status_for(&err);

        // Storage and configuration messages stay in the server log.
        let (message, details) = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(kind = err.kind(), error = %err, "Request failed");
            ("Internal server error".to_string(), serde_json::Value::Null)
        } else {
            let mut details = serde_json::to_value(&err).unwrap_or(serde_json::Value::Null);
            if let Some(fields) = details.as_object_mut() {
                fields.remove("kind");
            }
            (err.to_string(), details)
        };

        Self {
            status,
            body: ErrorBody {
                error: ErrorDetail {
                    kind: err.kind().to_string(),
                    message,
                    details,
                },
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

// =============================================================================
// TESTS
// =============================================================================
