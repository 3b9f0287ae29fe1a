//! # Permission Resolver
//!
//! Turns a caller's role into the set of entities they may act on.
//!
//! Grants are attached to roles and name individual entities. A grant is
//! expanded through the hierarchy before it is checked:
//!
//! - `write` on an entity covers that entity and all of its descendants
//! - `read` additionally covers its ancestors, so the granted subtree can
//!   be placed in the tree
//!
//! Administrators bypass every check.

use crate::hierarchy::HierarchyCore;
use crate::store::HierarchyStore;
use crate::{CallContext, CanopyError, Capability, EntityId, UserId};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

// =============================================================================
// PERMISSION TYPES
// =============================================================================

/// The authenticated identity behind a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: UserId,
    pub role: String,
}

impl Caller {
    #[must_use]
    pub fn new(user_id: UserId, role: impl Into<String>) -> Self {
        Self {
            user_id,
            role: role.into(),
        }
    }
}

/// Grants recorded for a role, before hierarchy expansion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectPermissions {
    pub is_admin: bool,
    pub entity_ids: BTreeSet<EntityId>,
}

/// Permissions after hierarchy expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectivePermissions {
    /// Every entity, including root-level structure.
    Admin,
    /// Exactly these entities.
    Scoped(BTreeSet<EntityId>),
}

impl EffectivePermissions {
    #[must_use]
    pub const fn is_admin(&self) -> bool {
        matches!(self, Self::Admin)
    }

    #[must_use]
    pub fn allows(&self, id: EntityId) -> bool {
        match self {
            Self::Admin => true,
            Self::Scoped(ids) => ids.contains(&id),
        }
    }
}

/// Where direct grants come from.
pub trait PermissionSource: Send + Sync {
    /// Grants giving `capability` to `role`. Unknown roles are `Unauthorized`.
    fn direct_permissions(
        &self,
        ctx: &CallContext,
        role: &str,
        capability: Capability,
    ) -> Result<DirectPermissions, CanopyError>;
}

// =============================================================================
// RESOLVER
// =============================================================================

/// Resolves and checks permissions against the hierarchy.
pub struct PermissionResolver<S: HierarchyStore, P: PermissionSource> {
    core: Arc<HierarchyCore<S>>,
    source: Arc<P>,
}

impl<S: HierarchyStore, P: PermissionSource> PermissionResolver<S, P> {
    pub fn new(core: Arc<HierarchyCore<S>>, source: Arc<P>) -> Self {
        Self { core, source }
    }

    /// The caller's unexpanded grants.
    pub fn direct_permissions(
        &self,
        ctx: &CallContext,
        caller: &Caller,
        capability: Capability,
    ) -> Result<DirectPermissions, CanopyError> {
        if caller.user_id.is_nil() || caller.role.trim().is_empty() {
            return Err(CanopyError::Unauthorized);
        }
        self.source
            .direct_permissions(ctx, caller.role.trim(), capability)
    }

    /// The caller's grants expanded through the hierarchy.
    ///
    /// Drafts created by other users are not part of a scoped result, nor is
    /// anything below them.
    pub fn effective_permissions(
        &self,
        ctx: &CallContext,
        caller: &Caller,
        capability: Capability,
    ) -> Result<EffectivePermissions, CanopyError> {
        let direct = self.direct_permissions(ctx, caller, capability)?;
        if direct.is_admin {
            return Ok(EffectivePermissions::Admin);
        }

        let seeds: Vec<EntityId> = direct.entity_ids.into_iter().collect();
        let expanded = self
            .core
            .get_permitted_ids(ctx, &seeds, capability.scope(), Some(caller.user_id))?;
        debug!(
            role = %caller.role,
            %capability,
            direct = seeds.len(),
            effective = expanded.len(),
            "permissions resolved"
        );
        Ok(EffectivePermissions::Scoped(expanded.into_iter().collect()))
    }

    /// Resolve the caller's permissions and require `capability` on `id`.
    ///
    /// Returns the resolved permissions so callers can run further checks
    /// without a second lookup.
    pub fn check_entity_permission(
        &self,
        ctx: &CallContext,
        id: EntityId,
        caller: &Caller,
        capability: Capability,
    ) -> Result<EffectivePermissions, CanopyError> {
        let perms = self.effective_permissions(ctx, caller, capability)?;
        Self::check_id(&perms, id, capability)?;
        Ok(perms)
    }

    /// Require `capability` on `id` under already-resolved permissions.
    pub fn check_id(
        perms: &EffectivePermissions,
        id: EntityId,
        capability: Capability,
    ) -> Result<(), CanopyError> {
        if perms.allows(id) {
            Ok(())
        } else {
            Err(CanopyError::Forbidden {
                capability,
                entity: id,
            })
        }
    }

    /// Require `capability` on every id. Fails on the first one missing.
    pub fn check_parent_ids(
        perms: &EffectivePermissions,
        ids: &[EntityId],
        capability: Capability,
    ) -> Result<(), CanopyError> {
        ids.iter()
            .try_for_each(|id| Self::check_id(perms, *id, capability))
    }

    /// Require administrator rights, e.g. for root-level structure.
    pub fn require_admin(
        perms: &EffectivePermissions,
        capability: Capability,
    ) -> Result<(), CanopyError> {
        if perms.is_admin() {
            Ok(())
        } else {
            Err(CanopyError::AdminRequired { capability })
        }
    }
}
