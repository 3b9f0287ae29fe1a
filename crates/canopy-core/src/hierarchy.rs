//! # Hierarchy Core
//!
//! Structural rules for the entity forest: parent types, depth limits,
//! cycle freedom, draft restrictions and cascading soft-delete.
//!
//! Every mutation validates against the store first and writes second.
//! Structural mutations (create under a parent, re-parent, draft
//! demotion, delete) hold a core-wide lock across both steps, so two
//! concurrent moves cannot each pass validation against a state the
//! other is about to change.
//!
//! ## Depth convention
//!
//! See `HierarchyConfig`: a root is level 1, the deepest permitted level is
//! `max_depth + 1`, and structural probes walk one level further.

use crate::config::HierarchyConfig;
use crate::environment::{Clock, IdGenerator, SystemClock, UuidGenerator};
use crate::store::HierarchyStore;
use crate::tree::build_tree;
use crate::validator::Validator;
use crate::{
    CallContext, CanopyError, CreateRequest, Direction, Entity, EntityChanges, EntityId,
    EntityType, HierarchyItem, ListItem, NewEntity, Publication, TreeNode, UpdateRequest, UserId,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

// =============================================================================
// HIERARCHY CORE
// =============================================================================

/// The hierarchy engine.
pub struct HierarchyCore<S: HierarchyStore> {
    store: Arc<S>,
    validator: Validator,
    config: HierarchyConfig,
    ids: Box<dyn IdGenerator>,
    clock: Box<dyn Clock>,
    structural: Mutex<()>,
}

impl<S: HierarchyStore> HierarchyCore<S> {
    /// Create an engine with random identifiers and the system clock.
    pub fn new(store: Arc<S>, config: HierarchyConfig) -> Result<Self, CanopyError> {
        Self::with_environment(store, config, Box::new(UuidGenerator), Box::new(SystemClock))
    }

    /// Create an engine with explicit identifier and time sources.
    pub fn with_environment(
        store: Arc<S>,
        config: HierarchyConfig,
        ids: Box<dyn IdGenerator>,
        clock: Box<dyn Clock>,
    ) -> Result<Self, CanopyError> {
        config.validate()?;
        let validator = Validator::new(config.max_name_length)?;
        Ok(Self {
            store,
            validator,
            config,
            ids,
            clock,
            structural: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn config(&self) -> &HierarchyConfig {
        &self.config
    }

    #[must_use]
    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    fn lock_structure(&self) -> MutexGuard<'_, ()> {
        self.structural
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // MUTATIONS
    // =========================================================================

    /// Create an entity. Returns the new identifier.
    pub fn create(&self, ctx: &CallContext, req: CreateRequest) -> Result<EntityId, CanopyError> {
        self.create_checked(ctx, req)
            .inspect_err(|e| log_rejection("create", e))
    }

    fn create_checked(&self, ctx: &CallContext, req: CreateRequest) -> Result<EntityId, CanopyError> {
        self.validator.require_user_id(req.user_id)?;
        let name = self.validator.clean_name(&req.name)?;

        let _guard = req.parent_id.map(|_| self.lock_structure());
        match req.parent_id {
            Some(parent) => {
                self.validator.require_entity_id("parent_id", parent)?;
                let chain = self.parent_chain(ctx, parent)?;
                if chain_len(&chain) > self.config.max_depth {
                    return Err(CanopyError::MaxHierarchyDepthExceeded {
                        max_depth: self.config.max_depth,
                    });
                }
                check_parent_type(&chain, parent, req.entity_type)?;
            }
            None if req.entity_type.requires_parent() => {
                return Err(CanopyError::ParentRequired {
                    entity_type: req.entity_type,
                });
            }
            None => {}
        }

        let id = self.ids.new_id()?;
        let now = self.clock.now();
        let entity = NewEntity {
            entity_type: req.entity_type,
            name,
            content: req.content,
            parent_id: req.parent_id,
            user_id: req.user_id,
        };

        if req.is_draft {
            self.store.create_draft(ctx, &entity, id, now)?;
        } else {
            self.store.create(ctx, &entity, id, now)?;
        }

        info!(%id, entity_type = %entity.entity_type, draft = req.is_draft, "entity created");
        Ok(id)
    }

    /// Update an entity. Returns its publication state afterwards.
    pub fn update(&self, ctx: &CallContext, req: UpdateRequest) -> Result<Publication, CanopyError> {
        self.update_checked(ctx, req)
            .inspect_err(|e| log_rejection("update", e))
    }

    fn update_checked(&self, ctx: &CallContext, req: UpdateRequest) -> Result<Publication, CanopyError> {
        self.validator.require_entity_id("id", req.id)?;
        self.validator.require_user_id(req.user_id)?;
        let name = self.validator.clean_name(&req.name)?;

        if req.parent_changed && req.parent_id == Some(req.id) {
            return Err(CanopyError::ParentCycle {
                entity: req.id,
                parent: req.id,
            });
        }

        let _guard = (req.parent_changed || req.is_draft).then(|| self.lock_structure());
        let current = self.store.get_list_item(ctx, req.id)?;

        // Unchanged parents are not written back: a concurrent move may have
        // replaced the one read above.
        let parent_id = if req.parent_changed {
            match req.parent_id {
                Some(parent) => {
                    self.validator.require_entity_id("parent_id", parent)?;
                    self.check_move(ctx, &current, parent)?;
                    Some(Some(parent))
                }
                None if current.entity_type.requires_parent() => {
                    return Err(CanopyError::ParentRequired {
                        entity_type: current.entity_type,
                    });
                }
                None => Some(None),
            }
        } else {
            None
        };

        if req.is_draft {
            let below = self.store.get_hierarchy(
                ctx,
                &[req.id],
                2,
                None,
                Direction::ChildrenOnly,
            )?;
            if below.len() > 1 {
                return Err(CanopyError::CannotDraftEntityWithChildren { id: req.id });
            }
        }

        let changes = EntityChanges {
            id: req.id,
            name,
            content: req.content,
            parent_id,
            user_id: req.user_id,
        };
        let now = self.clock.now();

        let publication = if req.is_draft {
            self.store.update_draft(ctx, &changes, now)?;
            Publication::Draft
        } else {
            Publication::Published(self.store.update(ctx, &changes, now)?)
        };

        info!(id = %req.id, moved = req.parent_changed, ?publication, "entity updated");
        Ok(publication)
    }

    /// Soft-delete an entity and its whole subtree. Returns every id deleted.
    pub fn delete(&self, ctx: &CallContext, id: EntityId) -> Result<Vec<EntityId>, CanopyError> {
        self.delete_checked(ctx, id)
            .inspect_err(|e| log_rejection("delete", e))
    }

    fn delete_checked(&self, ctx: &CallContext, id: EntityId) -> Result<Vec<EntityId>, CanopyError> {
        self.validator.require_entity_id("id", id)?;

        let _guard = self.lock_structure();
        let subtree = self.store.get_hierarchy(
            ctx,
            &[id],
            self.config.probe_depth(),
            None,
            Direction::ChildrenOnly,
        )?;
        if subtree.is_empty() {
            return Err(CanopyError::EntityNotFound { id });
        }
        if subtree.iter().any(|h| h.depth > self.config.levels()) {
            warn!(%id, "subtree deeper than the configured limit; refusing to delete");
            return Err(CanopyError::MaxHierarchyDepthExceeded {
                max_depth: self.config.max_depth,
            });
        }

        let ids: Vec<EntityId> = subtree.iter().map(|h| h.item.id).collect();
        self.store.delete(ctx, &ids, self.clock.now())?;

        info!(%id, count = ids.len(), "subtree deleted");
        Ok(ids)
    }

    // =========================================================================
    // READS
    // =========================================================================

    pub fn get(&self, ctx: &CallContext, id: EntityId) -> Result<Entity, CanopyError> {
        self.validator.require_entity_id("id", id)?;
        self.store.get(ctx, id)
    }

    pub fn get_list_item(&self, ctx: &CallContext, id: EntityId) -> Result<ListItem, CanopyError> {
        self.validator.require_entity_id("id", id)?;
        self.store.get_list_item(ctx, id)
    }

    /// Load a recorded version. `version` must be at least 1.
    pub fn get_version(&self, ctx: &CallContext, id: EntityId, version: i64) -> Result<Entity, CanopyError> {
        self.validator.require_entity_id("id", id)?;
        let version = self.validator.require_version(version)?;
        self.store.get_version(ctx, id, version)
    }

    /// Version history, newest first.
    pub fn get_versions_list(&self, ctx: &CallContext, id: EntityId) -> Result<Vec<Entity>, CanopyError> {
        self.validator.require_entity_id("id", id)?;
        self.store.get_versions_list(ctx, id)
    }

    /// Every live entity.
    pub fn get_all(&self, ctx: &CallContext) -> Result<Vec<ListItem>, CanopyError> {
        self.store.get_all(ctx)
    }

    /// Assemble the forest visible from `seeds`.
    ///
    /// Administrators get every live entity regardless of seeds. Everyone
    /// else gets the seeds with their ancestors and descendants, minus other
    /// users' drafts.
    pub fn get_tree(
        &self,
        ctx: &CallContext,
        seeds: &[EntityId],
        is_admin: bool,
        viewer: UserId,
    ) -> Result<Vec<TreeNode>, CanopyError> {
        if is_admin {
            return Ok(build_tree(self.store.get_all(ctx)?));
        }
        if seeds.is_empty() {
            return Ok(Vec::new());
        }

        let items = self.store.get_hierarchy(
            ctx,
            seeds,
            self.config.levels(),
            Some(viewer),
            Direction::ChildrenAndParents,
        )?;
        Ok(build_tree(items.into_iter().map(|h| h.item).collect()))
    }

    /// Identifiers reachable from `seeds` in `direction`, seeds included.
    ///
    /// With `viewer` set, other users' drafts are left out and nothing is
    /// reached through them.
    pub fn get_permitted_ids(
        &self,
        ctx: &CallContext,
        seeds: &[EntityId],
        direction: Direction,
        viewer: Option<UserId>,
    ) -> Result<Vec<EntityId>, CanopyError> {
        if seeds.is_empty() {
            return Ok(Vec::new());
        }
        let items = self
            .store
            .get_hierarchy(ctx, seeds, self.config.levels(), viewer, direction)?;
        Ok(items.into_iter().map(|h| h.item.id).collect())
    }

    // =========================================================================
    // STRUCTURAL CHECKS
    // =========================================================================

    /// Ancestor chain of `parent`, the parent itself first.
    fn parent_chain(&self, ctx: &CallContext, parent: EntityId) -> Result<Vec<HierarchyItem>, CanopyError> {
        let chain = self.store.get_hierarchy(
            ctx,
            &[parent],
            self.config.probe_depth(),
            None,
            Direction::ParentsOnly,
        )?;
        if chain.is_empty() {
            return Err(CanopyError::ParentNotFound { id: parent });
        }
        Ok(chain)
    }

    /// Validate moving `current` under `parent`.
    fn check_move(&self, ctx: &CallContext, current: &ListItem, parent: EntityId) -> Result<(), CanopyError> {
        let chain = self.parent_chain(ctx, parent)?;
        if chain.iter().any(|h| h.item.id == current.id) {
            return Err(CanopyError::ParentCycle {
                entity: current.id,
                parent,
            });
        }
        check_parent_type(&chain, parent, current.entity_type)?;

        let subtree = self.store.get_hierarchy(
            ctx,
            &[current.id],
            self.config.probe_depth(),
            None,
            Direction::ChildrenOnly,
        )?;
        if subtree.iter().any(|h| h.item.id == parent) {
            return Err(CanopyError::ParentCycle {
                entity: current.id,
                parent,
            });
        }

        let height = subtree.iter().map(|h| h.depth).max().unwrap_or(1);
        if chain_len(&chain).saturating_add(height) > self.config.levels() {
            return Err(CanopyError::MaxHierarchyDepthExceeded {
                max_depth: self.config.max_depth,
            });
        }
        Ok(())
    }
}

fn chain_len(chain: &[HierarchyItem]) -> u32 {
    u32::try_from(chain.len()).unwrap_or(u32::MAX)
}

fn check_parent_type(chain: &[HierarchyItem], parent: EntityId, child: EntityType) -> Result<(), CanopyError> {
    let parent_type = chain
        .iter()
        .find(|h| h.item.id == parent)
        .map(|h| h.item.entity_type)
        .ok_or(CanopyError::ParentNotFound { id: parent })?;
    if !parent_type.accepts_children() {
        return Err(CanopyError::IncompatibleParentType {
            parent_type,
            child_type: child,
        });
    }
    Ok(())
}

fn log_rejection(operation: &'static str, err: &CanopyError) {
    if err.is_structural() {
        debug!(operation, kind = err.kind(), error = %err, "structural rule rejected mutation");
    } else if !matches!(err, CanopyError::Store { .. }) {
        debug!(operation, kind = err.kind(), error = %err, "mutation failed");
    }
}

// =============================================================================
// TESTS
// =============================================================================
