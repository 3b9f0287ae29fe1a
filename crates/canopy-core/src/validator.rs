//! # Validator
//!
//! Normalizes and validates the user-supplied parts of an entity.
//!
//! Every check here is pure and synchronous. The hierarchy engine calls
//! into the validator before any store round trip, so malformed input never
//! reaches the database.

use crate::{CanopyError, EntityId, EntityType, UserId, ValidationRule, VersionNumber};

/// Name and identifier validation rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validator {
    max_name_length: usize,
}

impl Validator {
    /// Create a validator. Fails if `max_name_length` is zero.
    pub fn new(max_name_length: usize) -> Result<Self, CanopyError> {
        if max_name_length == 0 {
            return Err(CanopyError::config("max_name_length must be positive"));
        }
        Ok(Self { max_name_length })
    }

    #[must_use]
    pub const fn max_name_length(&self) -> usize {
        self.max_name_length
    }

    /// Trim surrounding whitespace. Total: never fails.
    #[must_use]
    pub fn normalize_name(&self, raw: &str) -> String {
        raw.trim().to_string()
    }

    /// Check an already-normalized name.
    pub fn validate_name(&self, name: &str) -> Result<(), CanopyError> {
        if name.is_empty() {
            return Err(CanopyError::ValidationFailed {
                field: "name",
                rule: ValidationRule::Required,
            });
        }
        if name.chars().count() > self.max_name_length {
            return Err(CanopyError::ValidationFailed {
                field: "name",
                rule: ValidationRule::TooLong {
                    max: self.max_name_length,
                },
            });
        }
        Ok(())
    }

    /// Normalize then validate, returning the normalized name.
    pub fn clean_name(&self, raw: &str) -> Result<String, CanopyError> {
        let name = self.normalize_name(raw);
        self.validate_name(&name)?;
        Ok(name)
    }

    /// Parse an entity type name (`department` / `article`, any case).
    pub fn parse_entity_type(&self, raw: &str) -> Result<EntityType, CanopyError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "department" => Ok(EntityType::Department),
            "article" => Ok(EntityType::Article),
            "" => Err(CanopyError::ValidationFailed {
                field: "entity_type",
                rule: ValidationRule::Required,
            }),
            other => Err(CanopyError::ValidationFailed {
                field: "entity_type",
                rule: ValidationRule::UnknownValue {
                    value: other.to_string(),
                },
            }),
        }
    }

    /// Reject the nil entity identifier.
    pub fn require_entity_id(&self, field: &'static str, id: EntityId) -> Result<(), CanopyError> {
        if id.is_nil() {
            return Err(CanopyError::ValidationFailed {
                field,
                rule: ValidationRule::NilIdentifier,
            });
        }
        Ok(())
    }

    /// Reject the nil user identifier.
    pub fn require_user_id(&self, user_id: UserId) -> Result<(), CanopyError> {
        if user_id.is_nil() {
            return Err(CanopyError::ValidationFailed {
                field: "user_id",
                rule: ValidationRule::NilIdentifier,
            });
        }
        Ok(())
    }

    /// Convert a raw version number, rejecting anything below 1.
    pub fn require_version(&self, raw: i64) -> Result<VersionNumber, CanopyError> {
        u32::try_from(raw)
            .ok()
            .and_then(VersionNumber::new)
            .ok_or(CanopyError::ValidationFailed {
                field: "version",
                rule: ValidationRule::InvalidVersion { value: raw },
            })
    }
}
