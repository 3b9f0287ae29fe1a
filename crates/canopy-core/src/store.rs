//! # Hierarchy Store
//!
//! Persistence contract for entities and their version history.
//!
//! The engine never touches storage directly; it goes through this trait.
//! Implementations own all persisted data and must make every write
//! primitive atomic: a failed or cancelled call leaves no partial state.

use crate::{
    CallContext, CanopyError, Direction, Entity, EntityChanges, EntityId, HierarchyItem, ListItem,
    NewEntity, UserId, VersionNumber,
};
use chrono::{DateTime, Utc};

// =============================================================================
// HIERARCHYSTORE TRAIT
// =============================================================================

/// Storage operations required by the hierarchy engine.
///
/// Soft-deleted entities are invisible to every read. Missing rows map to
/// `CanopyError::EntityNotFound`. Every traversal is bounded by an explicit
/// depth limit.
pub trait HierarchyStore: Send + Sync {
    /// Load the current state of an entity.
    fn get(&self, ctx: &CallContext, id: EntityId) -> Result<Entity, CanopyError>;

    /// Load the list projection of an entity.
    fn get_list_item(&self, ctx: &CallContext, id: EntityId) -> Result<ListItem, CanopyError>;

    /// Load the snapshot recorded for `version`.
    fn get_version(
        &self,
        ctx: &CallContext,
        id: EntityId,
        version: VersionNumber,
    ) -> Result<Entity, CanopyError>;

    /// Every recorded version, newest first. Empty for a never-published draft.
    fn get_versions_list(&self, ctx: &CallContext, id: EntityId)
    -> Result<Vec<Entity>, CanopyError>;

    /// Every live entity, as list items.
    fn get_all(&self, ctx: &CallContext) -> Result<Vec<ListItem>, CanopyError>;

    /// Depth-bounded walk from `seeds`.
    ///
    /// Seeds are at depth 1 and each hop adds 1; nothing deeper than
    /// `max_depth` is produced. Every identifier appears once, at its
    /// minimum depth. With `viewer` set, drafts created by other users are
    /// excluded and stop the walk.
    fn get_hierarchy(
        &self,
        ctx: &CallContext,
        seeds: &[EntityId],
        max_depth: u32,
        viewer: Option<UserId>,
        direction: Direction,
    ) -> Result<Vec<HierarchyItem>, CanopyError>;

    /// Insert a published entity together with its version-1 record.
    fn create(
        &self,
        ctx: &CallContext,
        entity: &NewEntity,
        id: EntityId,
        now: DateTime<Utc>,
    ) -> Result<(), CanopyError>;

    /// Insert a draft entity. No version record is written.
    fn create_draft(
        &self,
        ctx: &CallContext,
        entity: &NewEntity,
        id: EntityId,
        now: DateTime<Utc>,
    ) -> Result<(), CanopyError>;

    /// Publish a new version. Returns the version number assigned.
    fn update(
        &self,
        ctx: &CallContext,
        changes: &EntityChanges,
        now: DateTime<Utc>,
    ) -> Result<VersionNumber, CanopyError>;

    /// Overwrite the current row and mark it as a draft. History is untouched.
    fn update_draft(
        &self,
        ctx: &CallContext,
        changes: &EntityChanges,
        now: DateTime<Utc>,
    ) -> Result<(), CanopyError>;

    /// Soft-delete exactly `ids`, in one statement.
    fn delete(
        &self,
        ctx: &CallContext,
        ids: &[EntityId],
        now: DateTime<Utc>,
    ) -> Result<(), CanopyError>;
}
