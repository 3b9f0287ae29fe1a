//! # Knowledge Service
//!
//! Use-case layer: each operation checks the caller's permissions, then
//! delegates to the hierarchy engine.
//!
//! | Operation | Requires |
//! |-----------|----------|
//! | create    | write on the parent, admin for a root |
//! | update    | write on the entity and on a new parent, admin to move to root |
//! | delete    | write on the entity |
//! | reads     | read on the entity |
//! | tree      | read grants (admin sees everything) |
//!
//! A draft belongs to its creator and to administrators. Everyone else is
//! told it does not exist, whether they read, update or delete it, and it
//! never shows up in their tree or permitted ids.

use crate::hierarchy::HierarchyCore;
use crate::permission::{Caller, EffectivePermissions, PermissionResolver, PermissionSource};
use crate::storage::SqliteStore;
use crate::store::HierarchyStore;
use crate::{
    CallContext, CanopyError, Capability, CreateRequest, Entity, EntityId, EntityType, ListItem,
    Publication, TreeNode, UpdateRequest,
};
use std::sync::Arc;

/// The service wired to the SQLite store for both hierarchy and grants.
pub type SqliteService = KnowledgeService<SqliteStore, SqliteStore>;

/// Caller-supplied fields for a new entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateInput {
    pub entity_type: EntityType,
    pub name: String,
    pub content: String,
    pub parent_id: Option<EntityId>,
    pub is_draft: bool,
}

/// Caller-supplied fields for an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateInput {
    pub name: String,
    pub content: String,
    pub parent_changed: bool,
    pub parent_id: Option<EntityId>,
    pub is_draft: bool,
}

/// Permission-checked entry point for every use case.
pub struct KnowledgeService<S: HierarchyStore, P: PermissionSource> {
    core: Arc<HierarchyCore<S>>,
    permissions: PermissionResolver<S, P>,
}

type Resolver<S, P> = PermissionResolver<S, P>;

impl<S: HierarchyStore, P: PermissionSource> KnowledgeService<S, P> {
    pub fn new(core: Arc<HierarchyCore<S>>, source: Arc<P>) -> Self {
        let permissions = PermissionResolver::new(Arc::clone(&core), source);
        Self { core, permissions }
    }

    #[must_use]
    pub fn core(&self) -> &HierarchyCore<S> {
        &self.core
    }

    #[must_use]
    pub fn permissions(&self) -> &PermissionResolver<S, P> {
        &self.permissions
    }

    // =========================================================================
    // MUTATIONS
    // =========================================================================

    pub fn create(
        &self,
        ctx: &CallContext,
        caller: &Caller,
        input: CreateInput,
    ) -> Result<EntityId, CanopyError> {
        let perms = self
            .permissions
            .effective_permissions(ctx, caller, Capability::Write)?;
        match input.parent_id {
            Some(parent) => Resolver::<S, P>::check_id(&perms, parent, Capability::Write)?,
            None => Resolver::<S, P>::require_admin(&perms, Capability::Write)?,
        }

        self.core.create(
            ctx,
            CreateRequest {
                user_id: caller.user_id,
                entity_type: input.entity_type,
                name: input.name,
                content: input.content,
                parent_id: input.parent_id,
                is_draft: input.is_draft,
            },
        )
    }

    pub fn update(
        &self,
        ctx: &CallContext,
        caller: &Caller,
        id: EntityId,
        input: UpdateInput,
    ) -> Result<Publication, CanopyError> {
        let perms = self.authorize(ctx, caller, id, Capability::Write)?;
        if input.parent_changed {
            match input.parent_id {
                Some(parent) => {
                    Resolver::<S, P>::check_parent_ids(&perms, &[parent], Capability::Write)?;
                }
                None => Resolver::<S, P>::require_admin(&perms, Capability::Write)?,
            }
        }

        self.core.update(
            ctx,
            UpdateRequest {
                id,
                user_id: caller.user_id,
                name: input.name,
                content: input.content,
                parent_changed: input.parent_changed,
                parent_id: input.parent_id,
                is_draft: input.is_draft,
            },
        )
    }

    /// Delete an entity with its subtree. Returns every id deleted.
    pub fn delete(
        &self,
        ctx: &CallContext,
        caller: &Caller,
        id: EntityId,
    ) -> Result<Vec<EntityId>, CanopyError> {
        self.authorize(ctx, caller, id, Capability::Write)?;
        self.core.delete(ctx, id)
    }

    // =========================================================================
    // READS
    // =========================================================================

    pub fn get(&self, ctx: &CallContext, caller: &Caller, id: EntityId) -> Result<Entity, CanopyError> {
        let perms = self.authorize(ctx, caller, id, Capability::Read)?;
        let entity = self.core.get(ctx, id)?;
        ensure_visible(&perms, caller, &entity)?;
        Ok(entity)
    }

    pub fn get_list_item(
        &self,
        ctx: &CallContext,
        caller: &Caller,
        id: EntityId,
    ) -> Result<ListItem, CanopyError> {
        // Draft visibility needs the creator, which the projection lacks.
        self.get(ctx, caller, id).map(|entity| entity.list_item())
    }

    pub fn get_version(
        &self,
        ctx: &CallContext,
        caller: &Caller,
        id: EntityId,
        version: i64,
    ) -> Result<Entity, CanopyError> {
        self.get(ctx, caller, id)?;
        self.core.get_version(ctx, id, version)
    }

    pub fn get_versions_list(
        &self,
        ctx: &CallContext,
        caller: &Caller,
        id: EntityId,
    ) -> Result<Vec<Entity>, CanopyError> {
        self.get(ctx, caller, id)?;
        self.core.get_versions_list(ctx, id)
    }

    /// The forest the caller may read.
    pub fn get_tree(&self, ctx: &CallContext, caller: &Caller) -> Result<Vec<TreeNode>, CanopyError> {
        let direct = self
            .permissions
            .direct_permissions(ctx, caller, Capability::Read)?;
        let seeds: Vec<EntityId> = direct.entity_ids.into_iter().collect();
        self.core
            .get_tree(ctx, &seeds, direct.is_admin, caller.user_id)
    }

    /// Every entity the caller holds `capability` on.
    pub fn get_permitted_ids(
        &self,
        ctx: &CallContext,
        caller: &Caller,
        capability: Capability,
    ) -> Result<Vec<EntityId>, CanopyError> {
        match self
            .permissions
            .effective_permissions(ctx, caller, capability)?
        {
            EffectivePermissions::Admin => Ok(self
                .core
                .get_all(ctx)?
                .into_iter()
                .map(|item| item.id)
                .collect()),
            EffectivePermissions::Scoped(ids) => Ok(ids.into_iter().collect()),
        }
    }

    /// Resolve the caller's permissions and require `capability` on `id`.
    ///
    /// A draft the caller may not see, sitting where the caller's grants
    /// would otherwise reach, is reported as missing instead of forbidden.
    fn authorize(
        &self,
        ctx: &CallContext,
        caller: &Caller,
        id: EntityId,
        capability: Capability,
    ) -> Result<EffectivePermissions, CanopyError> {
        let perms = self
            .permissions
            .effective_permissions(ctx, caller, capability)?;
        if perms.allows(id) {
            return Ok(perms);
        }

        let entity = match self.core.get(ctx, id) {
            Ok(entity) => Some(entity),
            Err(CanopyError::EntityNotFound { .. }) => None,
            Err(e) => return Err(e),
        };
        let hidden_in_scope = entity.is_some_and(|e| {
            !is_visible_to(&perms, caller, &e) && e.parent_id.is_some_and(|p| perms.allows(p))
        });
        if hidden_in_scope {
            return Err(CanopyError::EntityNotFound { id });
        }
        Resolver::<S, P>::check_id(&perms, id, capability)?;
        Ok(perms)
    }
}

fn is_visible_to(perms: &EffectivePermissions, caller: &Caller, entity: &Entity) -> bool {
    !entity.publication.is_draft() || perms.is_admin() || entity.created_by == caller.user_id
}

/// Drafts are private to their creator and administrators. Anyone else gets
/// the same answer as for a missing entity.
fn ensure_visible(perms: &EffectivePermissions, caller: &Caller, entity: &Entity) -> Result<(), CanopyError> {
    if !is_visible_to(perms, caller, entity) {
        return Err(CanopyError::EntityNotFound { id: entity.id });
    }
    Ok(())
}
