//! # Engine Primitives
//!
//! Compiled-in limits and defaults for the Canopy engine.
//!
//! Runtime configuration (`HierarchyConfig`) may lower or raise the defaults
//! but never beyond the hard ceilings defined here.

/// Default maximum number of hops below a root.
pub const DEFAULT_MAX_DEPTH: u32 = 10;

/// Hard ceiling for the configured maximum depth.
///
/// Recursive traversals are bounded by `max_depth + 2` levels; this keeps
/// that bound small even for a misconfigured deployment.
pub const MAX_DEPTH_CEILING: u32 = 64;

/// Default maximum name length, in characters.
pub const DEFAULT_MAX_NAME_LENGTH: usize = 255;

/// Hard ceiling for the configured maximum name length.
pub const MAX_NAME_LENGTH_CEILING: usize = 4096;

/// SQLite virtual-machine instructions between two cancellation checks.
pub const PROGRESS_CHECK_OPS: i32 = 1_000;

/// How long a writer waits on a locked SQLite database before failing.
pub const BUSY_TIMEOUT_MS: u64 = 5_000;
