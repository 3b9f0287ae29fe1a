//! # Error Types
//!
//! - No silent failures: every fallible operation returns `Result<T, CanopyError>`
//! - Structural-policy errors carry the offending identifiers and parameters
//!   so a client can render a precise message without parsing strings
//! - The serialized form is internally tagged by `kind`

use super::{Capability, EntityId, EntityType};
use serde::Serialize;
use thiserror::Error;

/// The rule a `ValidationFailed` error tripped over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ValidationRule {
    /// The field is empty after normalization.
    Required,
    /// The field is longer than `max` characters.
    TooLong { max: usize },
    /// The value is not one of the accepted names.
    UnknownValue { value: String },
    /// The identifier is the nil UUID.
    NilIdentifier,
    /// Version numbers start at 1.
    InvalidVersion { value: i64 },
}

impl std::fmt::Display for ValidationRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Required => f.write_str("is required"),
            Self::TooLong { max } => write!(f, "exceeds {} characters", max),
            Self::UnknownValue { value } => write!(f, "has unknown value '{}'", value),
            Self::NilIdentifier => f.write_str("must not be the nil identifier"),
            Self::InvalidVersion { value } => write!(f, "version {} is not >= 1", value),
        }
    }
}

/// Errors that can occur in Canopy.
///
/// Structural variants are never retried; `Store` and `Cancelled` are safe
/// to retry because no store primitive leaves partial state behind.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CanopyError {
    /// Bad input; always fixable by the caller.
    #[error("Validation failed: `{field}` {rule}")]
    ValidationFailed {
        field: &'static str,
        rule: ValidationRule,
    },

    #[error("Entity not found: {id}")]
    EntityNotFound { id: EntityId },

    #[error("Parent not found: {id}")]
    ParentNotFound { id: EntityId },

    #[error("An entity of type {entity_type} requires a parent")]
    ParentRequired { entity_type: EntityType },

    #[error("A {parent_type} cannot contain a {child_type}")]
    IncompatibleParentType {
        parent_type: EntityType,
        child_type: EntityType,
    },

    #[error("Moving {entity} under {parent} would create a cycle")]
    ParentCycle { entity: EntityId, parent: EntityId },

    #[error("Maximum hierarchy depth of {max_depth} exceeded")]
    MaxHierarchyDepthExceeded { max_depth: u32 },

    #[error("Entity {id} has children and cannot become a draft")]
    CannotDraftEntityWithChildren { id: EntityId },

    #[error("Forbidden: no {capability} permission on {entity}")]
    Forbidden {
        capability: Capability,
        entity: EntityId,
    },

    /// Operation restricted to administrators (root-level structure).
    #[error("Forbidden: {capability} at the top level requires an administrator")]
    AdminRequired { capability: Capability },

    #[error("Unauthorized: unknown caller")]
    Unauthorized,

    #[error("Operation cancelled")]
    Cancelled,

    /// Opaque storage failure, tagged with the store operation that failed.
    #[error("Store error in {operation}: {message}")]
    Store {
        operation: &'static str,
        message: String,
    },

    #[error("Identifier generation failed: {message}")]
    IdGeneration { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CanopyError {
    /// Stable machine-readable kind, matching the serialized `kind` tag.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ValidationFailed { .. } => "validation_failed",
            Self::EntityNotFound { .. } => "entity_not_found",
            Self::ParentNotFound { .. } => "parent_not_found",
            Self::ParentRequired { .. } => "parent_required",
            Self::IncompatibleParentType { .. } => "incompatible_parent_type",
            Self::ParentCycle { .. } => "parent_cycle",
            Self::MaxHierarchyDepthExceeded { .. } => "max_hierarchy_depth_exceeded",
            Self::CannotDraftEntityWithChildren { .. } => "cannot_draft_entity_with_children",
            Self::Forbidden { .. } => "forbidden",
            Self::AdminRequired { .. } => "admin_required",
            Self::Unauthorized => "unauthorized",
            Self::Cancelled => "cancelled",
            Self::Store { .. } => "store",
            Self::IdGeneration { .. } => "id_generation",
            Self::Config { .. } => "config",
        }
    }

    /// True for hierarchy-policy violations (cycle, depth, parent rules, drafts).
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::ParentNotFound { .. }
                | Self::ParentRequired { .. }
                | Self::IncompatibleParentType { .. }
                | Self::ParentCycle { .. }
                | Self::MaxHierarchyDepthExceeded { .. }
                | Self::CannotDraftEntityWithChildren { .. }
        )
    }

    /// Whether the caller may retry the same call unchanged.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Store { .. } | Self::Cancelled)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub(crate) fn store(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Store {
            operation,
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn kind_matches_serialized_tag() {
        let errors = vec![
            CanopyError::ValidationFailed {
                field: "name",
                rule: ValidationRule::TooLong { max: 8 },
            },
            CanopyError::EntityNotFound {
                id: EntityId(Uuid::new_v4()),
            },
            CanopyError::MaxHierarchyDepthExceeded { max_depth: 3 },
            CanopyError::Unauthorized,
            CanopyError::Cancelled,
            CanopyError::store("get", "disk I/O error"),
        ];

        for err in errors {
            let json = serde_json::to_value(&err).expect("serialize");
            assert_eq!(json["kind"], err.kind());
        }
    }

    #[test]
    fn structured_detail_survives_serialization() {
        let err = CanopyError::ValidationFailed {
            field: "name",
            rule: ValidationRule::TooLong { max: 255 },
        };
        let json = serde_json::to_value(&err).expect("serialize");
        assert_eq!(json["field"], "name");
        assert_eq!(json["rule"]["rule"], "too_long");
        assert_eq!(json["rule"]["max"], 255);
        assert_eq!(err.to_string(), "Validation failed: `name` exceeds 255 characters");
    }

    #[test]
    fn retry_policy() {
        assert!(CanopyError::Cancelled.is_retryable());
        assert!(CanopyError::store("update", "busy").is_retryable());
        assert!(!CanopyError::MaxHierarchyDepthExceeded { max_depth: 1 }.is_retryable());
        assert!(CanopyError::MaxHierarchyDepthExceeded { max_depth: 1 }.is_structural());
        assert!(!CanopyError::Unauthorized.is_structural());
    }
}
