//! # canopy-core
//!
//! The hierarchy-and-versioning engine for Canopy - THE LOGIC.
//!
//! This crate manages a forest of knowledge-base entities (departments and
//! articles): it enforces the structural rules of the hierarchy, keeps an
//! immutable version history for every published change, and scopes every
//! read and write to the caller's permissions.
//!
//! ## Layers
//!
//! - `validator`: pure input checks (names, types, identifiers, versions)
//! - `store` / `storage`: the `HierarchyStore` contract and its SQLite backend
//! - `hierarchy`: `HierarchyCore`, the structural rules
//! - `permission`: grant resolution and checks
//! - `service`: permission-checked use cases
//!
//! ## Architectural Constraints
//!
//! - Synchronous: no async runtime, no network dependencies
//! - Every operation takes a `CallContext` and can be cancelled
//! - Every traversal is bounded by the configured depth limit
//! - No in-process cache of hierarchy state: the store is the only source of truth

// =============================================================================
// MODULES
// =============================================================================

pub mod config;
pub mod context;
pub mod environment;
pub mod hierarchy;
pub mod permission;
pub mod primitives;
pub mod service;
pub mod storage;
pub mod store;
pub mod tree;
pub mod types;
pub mod validator;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    CanopyError, Capability, CreateRequest, Direction, Entity, EntityChanges, EntityId,
    EntityType, HierarchyItem, ListItem, NewEntity, Publication, TreeNode, UpdateRequest, UserId,
    ValidationRule, VersionNumber,
};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use config::HierarchyConfig;
pub use context::{CallContext, CancelOnDrop};
pub use environment::{
    Clock, IdGenerator, ManualClock, SequentialIdGenerator, SystemClock, UuidGenerator,
};
pub use hierarchy::HierarchyCore;
pub use permission::{
    Caller, DirectPermissions, EffectivePermissions, PermissionResolver, PermissionSource,
};
pub use service::{CreateInput, KnowledgeService, SqliteService, UpdateInput};
pub use storage::SqliteStore;
pub use store::HierarchyStore;
pub use tree::build_tree;
pub use validator::Validator;
