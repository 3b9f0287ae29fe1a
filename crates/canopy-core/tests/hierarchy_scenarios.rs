//! # Hierarchy Scenario Tests (H0-H4)
//!
//! End-to-end checks of the engine against a real SQLite store.
//!
//! ## Tiers
//! - H0: Structural limits (depth, parent types)
//! - H1: Cycle freedom
//! - H2: Cascading delete
//! - H3: Versioning and drafts
//! - H4: Permission scoping

use canopy_core::{
    CallContext, Caller, CanopyError, Capability, CreateInput, CreateRequest, EntityId,
    EntityType, HierarchyConfig, HierarchyCore, KnowledgeService, ManualClock, Publication,
    SequentialIdGenerator, SqliteService, SqliteStore, TreeNode, UpdateRequest, UserId, VersionNumber,
};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

const AUTHOR: UserId = UserId(Uuid::from_u128(0xA0));
const EDITOR: UserId = UserId(Uuid::from_u128(0xB0));

fn ctx() -> CallContext {
    CallContext::background()
}

fn engine(max_depth: u32) -> (Arc<SqliteStore>, Arc<HierarchyCore<SqliteStore>>) {
    let store = Arc::new(SqliteStore::open_in_memory().expect("open"));
    let core = HierarchyCore::with_environment(
        Arc::clone(&store),
        HierarchyConfig::new(max_depth, 255).expect("config"),
        Box::new(SequentialIdGenerator::new()),
        Box::new(ManualClock::new(
            DateTime::<Utc>::UNIX_EPOCH,
            Duration::milliseconds(10),
        )),
    )
    .expect("core");
    (store, Arc::new(core))
}

fn create(
    core: &HierarchyCore<SqliteStore>,
    kind: EntityType,
    name: &str,
    parent: Option<EntityId>,
    is_draft: bool,
) -> Result<EntityId, CanopyError> {
    core.create(
        &ctx(),
        CreateRequest {
            user_id: AUTHOR,
            entity_type: kind,
            name: name.to_string(),
            content: format!("{} content", name),
            parent_id: parent,
            is_draft,
        },
    )
}

fn dept(core: &HierarchyCore<SqliteStore>, name: &str, parent: Option<EntityId>) -> EntityId {
    create(core, EntityType::Department, name, parent, false).expect("department")
}

fn edit(id: EntityId, name: &str, parent: Option<Option<EntityId>>, is_draft: bool) -> UpdateRequest {
    UpdateRequest {
        id,
        user_id: EDITOR,
        name: name.to_string(),
        content: format!("{} content", name),
        parent_changed: parent.is_some(),
        parent_id: parent.flatten(),
        is_draft,
    }
}

fn all_ids(forest: &[TreeNode]) -> Vec<EntityId> {
    let mut ids = Vec::new();
    for node in forest {
        node.collect_ids(&mut ids);
    }
    ids.sort();
    ids
}

// =============================================================================
// TIER H0: STRUCTURAL LIMITS
// =============================================================================

mod h0_structural_limits {
    use super::*;

    /// H0.1: R, C under R, G under C with max_depth 2; nothing fits under G.
    #[test]
    fn create_below_deepest_level_fails() {
        let (_, core) = engine(2);
        let r = dept(&core, "R", None);
        let c = dept(&core, "C", Some(r));
        let g = dept(&core, "G", Some(c));

        let result = create(&core, EntityType::Article, "Too deep", Some(g), false);
        assert!(matches!(
            result,
            Err(CanopyError::MaxHierarchyDepthExceeded { max_depth: 2 })
        ));
    }

    /// H0.2: Articles are leaves and must have a parent.
    #[test]
    fn article_rules() {
        let (_, core) = engine(4);
        assert!(matches!(
            create(&core, EntityType::Article, "Loose", None, false),
            Err(CanopyError::ParentRequired { .. })
        ));

        let r = dept(&core, "R", None);
        let a = create(&core, EntityType::Article, "A", Some(r), false).expect("article");
        assert!(matches!(
            create(&core, EntityType::Department, "Under article", Some(a), false),
            Err(CanopyError::IncompatibleParentType { .. })
        ));
    }

    /// H0.3: A failed move leaves the entity where it was.
    #[test]
    fn rejected_move_changes_nothing() {
        let (_, core) = engine(2);
        let r1 = dept(&core, "R1", None);
        let c1 = dept(&core, "C1", Some(r1));
        let r2 = dept(&core, "R2", None);
        let c2 = dept(&core, "C2", Some(r2));

        let result = core.update(&ctx(), edit(r2, "R2", Some(Some(c1)), false));
        assert!(matches!(
            result,
            Err(CanopyError::MaxHierarchyDepthExceeded { .. })
        ));

        let entity = core.get(&ctx(), r2).expect("get");
        assert_eq!(entity.parent_id, None);
        assert_eq!(entity.publication, Publication::Published(VersionNumber::FIRST));
        assert_eq!(core.get(&ctx(), c2).expect("get").parent_id, Some(r2));
    }
}

// =============================================================================
// TIER H1: CYCLE FREEDOM
// =============================================================================

mod h1_cycle_freedom {
    use super::*;

    /// H1.1: A, B under A; A cannot move under B.
    #[test]
    fn move_under_child_is_cycle() {
        let (_, core) = engine(5);
        let a = dept(&core, "A", None);
        let b = dept(&core, "B", Some(a));

        let result = core.update(&ctx(), edit(a, "A", Some(Some(b)), false));
        assert!(matches!(
            result,
            Err(CanopyError::ParentCycle { entity, parent }) if entity == a && parent == b
        ));
    }

    /// H1.2: Moving within the tree in a non-cyclic way succeeds.
    #[test]
    fn move_to_sibling_allowed() {
        let (_, core) = engine(5);
        let r = dept(&core, "R", None);
        let a = dept(&core, "A", Some(r));
        let b = dept(&core, "B", Some(r));

        let publication = core
            .update(&ctx(), edit(b, "B", Some(Some(a)), false))
            .expect("move");
        assert!(!publication.is_draft());
        assert_eq!(core.get(&ctx(), b).expect("get").parent_id, Some(a));
    }

    /// H1.3: A department may be promoted to a root.
    #[test]
    fn promote_department_to_root() {
        let (_, core) = engine(5);
        let r = dept(&core, "R", None);
        let a = dept(&core, "A", Some(r));

        core.update(&ctx(), edit(a, "A", Some(None), false))
            .expect("promote");
        let forest = core.get_tree(&ctx(), &[], true, AUTHOR).expect("tree");
        assert_eq!(forest.len(), 2);
    }
}

// =============================================================================
// TIER H2: CASCADING DELETE
// =============================================================================

mod h2_cascading_delete {
    use super::*;

    /// H2.1: Deleting R removes C and G in the same call.
    #[test]
    fn delete_root_removes_descendants() {
        let (_, core) = engine(3);
        let r = dept(&core, "R", None);
        let c = dept(&core, "C", Some(r));
        let g = dept(&core, "G", Some(c));

        let deleted = core.delete(&ctx(), r).expect("delete");
        assert_eq!(deleted.len(), 3);
        for id in [r, c, g] {
            assert!(matches!(
                core.get(&ctx(), id),
                Err(CanopyError::EntityNotFound { .. })
            ));
        }
        assert!(core.get_all(&ctx()).expect("all").is_empty());
    }

    /// H2.2: History of a deleted entity is no longer reachable.
    #[test]
    fn deleted_history_is_hidden() {
        let (_, core) = engine(3);
        let r = dept(&core, "R", None);
        core.delete(&ctx(), r).expect("delete");
        assert!(matches!(
            core.get_version(&ctx(), r, 1),
            Err(CanopyError::EntityNotFound { .. })
        ));
        assert!(matches!(
            core.get_versions_list(&ctx(), r),
            Err(CanopyError::EntityNotFound { .. })
        ));
    }
}

// =============================================================================
// TIER H3: VERSIONING AND DRAFTS
// =============================================================================

mod h3_versioning {
    use super::*;

    /// H3.1: A draft has no history; publishing it writes version 1.
    #[test]
    fn draft_round_trip() {
        let (_, core) = engine(3);
        let r = dept(&core, "R", None);
        let draft = create(&core, EntityType::Article, "Draft", Some(r), true).expect("draft");
        assert!(core.get_versions_list(&ctx(), draft).expect("list").is_empty());

        let publication = core
            .update(&ctx(), edit(draft, "Published", None, false))
            .expect("publish");
        assert_eq!(publication.version().map(|v| v.get()), Some(1));

        let history = core.get_versions_list(&ctx(), draft).expect("list");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].name, "Published");
        assert_eq!(history[0].updated_by, EDITOR);
        assert_eq!(history[0].created_by, AUTHOR);
    }

    /// H3.2: Versions increase by one and snapshots never change.
    #[test]
    fn versions_are_monotonic_snapshots() {
        let (_, core) = engine(3);
        let r = dept(&core, "R", None);
        for n in 2..=5u32 {
            let publication = core
                .update(&ctx(), edit(r, &format!("R{}", n), None, false))
                .expect("update");
            assert_eq!(publication.version().map(|v| v.get()), Some(n));
        }

        for n in 2..=5i64 {
            let snapshot = core.get_version(&ctx(), r, n).expect("snapshot");
            assert_eq!(snapshot.name, format!("R{}", n));
            assert_eq!(snapshot.publication.version().map(|v| i64::from(v.get())), Some(n));
        }
        assert!(matches!(
            core.get_version(&ctx(), r, 6),
            Err(CanopyError::EntityNotFound { .. })
        ));
    }

    /// H3.3: Reads are idempotent.
    #[test]
    fn reads_are_idempotent() {
        let (_, core) = engine(3);
        let r = dept(&core, "R", None);
        dept(&core, "C", Some(r));
        assert_eq!(core.get(&ctx(), r).expect("a"), core.get(&ctx(), r).expect("b"));
        assert_eq!(
            core.get_tree(&ctx(), &[r], false, AUTHOR).expect("a"),
            core.get_tree(&ctx(), &[r], false, AUTHOR).expect("b")
        );
    }

    /// H3.4: Only a leaf can become a draft.
    #[test]
    fn parent_cannot_become_draft() {
        let (_, core) = engine(3);
        let r = dept(&core, "R", None);
        dept(&core, "C", Some(r));
        assert!(matches!(
            core.update(&ctx(), edit(r, "R", None, true)),
            Err(CanopyError::CannotDraftEntityWithChildren { .. })
        ));
    }
}

// =============================================================================
// TIER H4: PERMISSION SCOPING
// =============================================================================

mod h4_permission_scoping {
    use super::*;

    fn service() -> (Arc<SqliteStore>, SqliteService, Caller) {
        let (store, core) = engine(5);
        store.upsert_role(&ctx(), "admin", true).expect("role");
        let service = KnowledgeService::new(core, Arc::clone(&store));
        (store, service, Caller::new(AUTHOR, "admin"))
    }

    fn dept_input(name: &str, parent: Option<EntityId>) -> CreateInput {
        CreateInput {
            entity_type: EntityType::Department,
            name: name.to_string(),
            content: String::new(),
            parent_id: parent,
            is_draft: false,
        }
    }

    /// H4.1: Admin tree covers every live entity.
    #[test]
    fn admin_tree_is_complete() {
        let (_, service, admin) = service();
        let r1 = service.create(&ctx(), &admin, dept_input("R1", None)).expect("r1");
        let r2 = service.create(&ctx(), &admin, dept_input("R2", None)).expect("r2");
        let c = service.create(&ctx(), &admin, dept_input("C", Some(r1))).expect("c");

        let forest = service.get_tree(&ctx(), &admin).expect("tree");
        let mut expected = vec![r1, r2, c];
        expected.sort();
        assert_eq!(all_ids(&forest), expected);
    }

    /// H4.2: A reader sees their grant, its ancestors and descendants only.
    #[test]
    fn reader_tree_is_scoped() {
        let (store, service, admin) = service();
        let r1 = service.create(&ctx(), &admin, dept_input("R1", None)).expect("r1");
        let c = service.create(&ctx(), &admin, dept_input("C", Some(r1))).expect("c");
        let g = service.create(&ctx(), &admin, dept_input("G", Some(c))).expect("g");
        let sibling = service.create(&ctx(), &admin, dept_input("S", Some(r1))).expect("s");
        let r2 = service.create(&ctx(), &admin, dept_input("R2", None)).expect("r2");

        store.upsert_role(&ctx(), "reader", false).expect("role");
        store.grant(&ctx(), "reader", c, Capability::Read).expect("grant");
        let reader = Caller::new(EDITOR, "reader");

        let forest = service.get_tree(&ctx(), &reader).expect("tree");
        let mut expected = vec![r1, c, g];
        expected.sort();
        assert_eq!(all_ids(&forest), expected);
        assert_eq!(forest.len(), 1);

        let ids = service
            .get_permitted_ids(&ctx(), &reader, Capability::Read)
            .expect("ids");
        assert!(!ids.contains(&sibling) && !ids.contains(&r2));
        assert!(matches!(
            service.get(&ctx(), &reader, r2),
            Err(CanopyError::Forbidden { .. })
        ));
        assert!(service
            .get_permitted_ids(&ctx(), &reader, Capability::Write)
            .expect("write ids")
            .is_empty());
    }

    /// H4.3: A caller without grants sees nothing.
    #[test]
    fn no_grants_no_tree() {
        let (store, service, admin) = service();
        service.create(&ctx(), &admin, dept_input("R", None)).expect("r");
        store.upsert_role(&ctx(), "guest", false).expect("role");
        let guest = Caller::new(EDITOR, "guest");
        assert!(service.get_tree(&ctx(), &guest).expect("tree").is_empty());
    }
}
