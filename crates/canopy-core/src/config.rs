//! # Hierarchy Configuration
//!
//! Explicit configuration threaded into the engine constructors.
//!
//! ## Depth convention
//!
//! `max_depth` is the number of hops allowed below a root. A root sits at
//! level 1, so the deepest permitted level is `max_depth + 1`. Structural
//! probes ask the store for one more level than that, so an over-deep (or
//! cyclic) chain shows up as a row beyond the limit instead of being cut off.

use crate::CanopyError;
use crate::primitives::{
    DEFAULT_MAX_DEPTH, DEFAULT_MAX_NAME_LENGTH, MAX_DEPTH_CEILING, MAX_NAME_LENGTH_CEILING,
};
use serde::{Deserialize, Serialize};

/// Limits enforced by the hierarchy engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HierarchyConfig {
    /// Maximum number of hops below a root.
    pub max_depth: u32,
    /// Maximum entity name length, in characters.
    pub max_name_length: usize,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_name_length: DEFAULT_MAX_NAME_LENGTH,
        }
    }
}

impl HierarchyConfig {
    /// Build and validate a configuration.
    pub fn new(max_depth: u32, max_name_length: usize) -> Result<Self, CanopyError> {
        let config = Self {
            max_depth,
            max_name_length,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values outside the compiled-in bounds.
    pub fn validate(&self) -> Result<(), CanopyError> {
        if self.max_depth == 0 || self.max_depth > MAX_DEPTH_CEILING {
            return Err(CanopyError::config(format!(
                "max_depth must be between 1 and {}, got {}",
                MAX_DEPTH_CEILING, self.max_depth
            )));
        }
        if self.max_name_length == 0 || self.max_name_length > MAX_NAME_LENGTH_CEILING {
            return Err(CanopyError::config(format!(
                "max_name_length must be between 1 and {}, got {}",
                MAX_NAME_LENGTH_CEILING, self.max_name_length
            )));
        }
        Ok(())
    }

    /// Deepest permitted level (root = 1).
    #[must_use]
    pub const fn levels(&self) -> u32 {
        self.max_depth + 1
    }

    /// Traversal limit used by structural checks: one level past `levels()`.
    #[must_use]
    pub const fn probe_depth(&self) -> u32 {
        self.max_depth + 2
    }
}
