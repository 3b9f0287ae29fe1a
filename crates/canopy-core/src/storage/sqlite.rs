//! # SQLite Hierarchy Store
//!
//! `HierarchyStore` backed by a single SQLite connection.
//!
//! ## Layout
//!
//! - `entities`: current state, one row per entity, soft-deleted via `deleted_at`
//! - `entity_versions`: append-only snapshots keyed by `(entity_id, version)`
//! - `roles` / `role_grants`: direct permissions per role
//!
//! ## Traversal
//!
//! Hierarchy walks run inside SQLite as `WITH RECURSIVE` queries over the
//! `parent_id` column. The depth limit bounds the recursion, which also
//! stops a walk over corrupt cyclic data.
//!
//! ## Cancellation
//!
//! Every call checks its `CallContext` first, then installs it as the
//! connection's progress handler for the duration of the call. An
//! interrupted statement surfaces as `CanopyError::Cancelled`.

use crate::permission::{DirectPermissions, PermissionSource};
use crate::primitives::{BUSY_TIMEOUT_MS, PROGRESS_CHECK_OPS};
use crate::store::HierarchyStore;
use crate::{
    CallContext, CanopyError, Capability, Direction, Entity, EntityChanges, EntityId, EntityType,
    HierarchyItem, ListItem, NewEntity, Publication, UserId, ValidationRule, VersionNumber,
};
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef};
use rusqlite::{
    Connection, ErrorCode, OptionalExtension, Row, Transaction, TransactionBehavior, params,
    params_from_iter,
};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::schema;

// =============================================================================
// COLUMN CONVERSIONS
// =============================================================================

impl ToSql for EntityId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        self.0.to_sql()
    }
}

impl FromSql for EntityId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        uuid::Uuid::column_result(value).map(Self)
    }
}

impl ToSql for UserId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        self.0.to_sql()
    }
}

impl FromSql for UserId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        uuid::Uuid::column_result(value).map(Self)
    }
}

impl ToSql for EntityType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for EntityType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "department" => Ok(Self::Department),
            "article" => Ok(Self::Article),
            other => Err(FromSqlError::Other(
                format!("unknown entity type '{}'", other).into(),
            )),
        }
    }
}

impl ToSql for VersionNumber {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(i64::from(self.get())))
    }
}

impl FromSql for VersionNumber {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_i64()?;
        u32::try_from(raw)
            .ok()
            .and_then(Self::new)
            .ok_or(FromSqlError::OutOfRange(raw))
    }
}

impl ToSql for Capability {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

// =============================================================================
// ROW MAPPING
// =============================================================================

const ENTITY_COLUMNS: &str = "id, entity_type, name, content, parent_id, created_by, updated_by, \
     current_version, created_at, updated_at, deleted_at";

/// Version snapshot joined with its entity, in `ENTITY_COLUMNS` order.
const VERSION_COLUMNS: &str = "v.entity_id, v.entity_type, v.name, v.content, v.parent_id, \
     e.created_by, v.edited_by, v.version, e.created_at, v.created_at, e.deleted_at";

fn entity_from_row(row: &Row<'_>) -> rusqlite::Result<Entity> {
    let version: Option<VersionNumber> = row.get(7)?;
    Ok(Entity {
        id: row.get(0)?,
        entity_type: row.get(1)?,
        name: row.get(2)?,
        content: row.get(3)?,
        parent_id: row.get(4)?,
        created_by: row.get(5)?,
        updated_by: row.get(6)?,
        publication: version.map_or(Publication::Draft, Publication::Published),
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
        deleted_at: row.get(10)?,
    })
}

fn list_item_from_row(row: &Row<'_>) -> rusqlite::Result<ListItem> {
    Ok(ListItem {
        id: row.get(0)?,
        entity_type: row.get(1)?,
        name: row.get(2)?,
        parent_id: row.get(3)?,
    })
}

fn blob(id: uuid::Uuid) -> Value {
    Value::Blob(id.as_bytes().to_vec())
}

/// Row is live, and (when a viewer is bound to `?2`) is either published
/// or the viewer's own draft.
const VISIBLE: &str = "e.deleted_at IS NULL \
     AND (?2 IS NULL OR e.current_version IS NOT NULL OR e.created_by = ?2)";

fn hierarchy_sql(seed_count: usize, direction: Direction) -> String {
    let seeds = (0..seed_count)
        .map(|i| format!("?{}", i + 3))
        .collect::<Vec<_>>()
        .join(", ");

    let mut ctes = Vec::new();
    let mut walks = Vec::new();

    if direction.walks_down() {
        ctes.push(format!(
            "down(id, depth) AS (
                SELECT e.id, 1 FROM entities e WHERE e.id IN ({seeds}) AND {vis}
                UNION
                SELECT e.id, d.depth + 1 FROM entities e JOIN down d ON e.parent_id = d.id
                WHERE d.depth < ?1 AND {vis}
            )",
            seeds = seeds,
            vis = VISIBLE
        ));
        walks.push("SELECT id, depth FROM down");
    }
    if direction.walks_up() {
        ctes.push(format!(
            "up(id, parent_id, depth) AS (
                SELECT e.id, e.parent_id, 1 FROM entities e WHERE e.id IN ({seeds}) AND {vis}
                UNION
                SELECT e.id, e.parent_id, u.depth + 1 FROM entities e JOIN up u ON e.id = u.parent_id
                WHERE u.depth < ?1 AND {vis}
            )",
            seeds = seeds,
            vis = VISIBLE
        ));
        walks.push("SELECT id, depth FROM up");
    }

    format!(
        "WITH RECURSIVE {ctes}
         SELECT e.id, e.entity_type, e.name, e.parent_id, MIN(w.depth) AS min_depth
         FROM ({walks}) w JOIN entities e ON e.id = w.id
         GROUP BY e.id
         ORDER BY min_depth, e.name, e.id",
        ctes = ctes.join(",\n"),
        walks = walks.join(" UNION ALL "),
    )
}

fn insert_version(tx: &Transaction<'_>, id: EntityId, version: VersionNumber) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO entity_versions
             (entity_id, version, entity_type, name, content, parent_id, edited_by, created_at)
         SELECT id, ?2, entity_type, name, content, parent_id, updated_by, updated_at
         FROM entities WHERE id = ?1",
        params![id, version],
    )?;
    Ok(())
}

// =============================================================================
// SQLITE STORE
// =============================================================================

/// SQLite-backed hierarchy store.
///
/// The connection is guarded by a mutex: calls are serialized, and a
/// transaction never interleaves with another call's statements.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file.
    pub fn open(path: &Path) -> Result<Self, CanopyError> {
        info!("Opening SQLite database at {:?}", path);

        let conn = Connection::open(path).map_err(|e| CanopyError::store("open", e))?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")
            .map_err(|e| CanopyError::store("open", e))?;

        Self::from_connection(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, CanopyError> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory().map_err(|e| CanopyError::store("open", e))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, CanopyError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| CanopyError::store("open", e))?;
        conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))
            .map_err(|e| CanopyError::store("open", e))?;
        schema::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` on the connection with `ctx` installed as the interrupt source.
    fn with_conn<T, F>(&self, ctx: &CallContext, operation: &'static str, f: F) -> Result<T, CanopyError>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<T>,
    {
        ctx.check()?;

        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.progress_handler(PROGRESS_CHECK_OPS, Some(ctx.interrupt_probe()));
        let result = f(&mut conn);
        conn.progress_handler(PROGRESS_CHECK_OPS, None::<fn() -> bool>);

        result.map_err(|e| {
            if e.sqlite_error_code() == Some(ErrorCode::OperationInterrupted) || ctx.is_done() {
                debug!(operation, "store call interrupted");
                CanopyError::Cancelled
            } else {
                warn!(operation, error = %e, "store call failed");
                CanopyError::store(operation, e)
            }
        })
    }

    // =========================================================================
    // ROLE ADMINISTRATION
    // =========================================================================

    /// Create a role or change its admin flag.
    pub fn upsert_role(&self, ctx: &CallContext, name: &str, is_admin: bool) -> Result<(), CanopyError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CanopyError::ValidationFailed {
                field: "role",
                rule: ValidationRule::Required,
            });
        }

        self.with_conn(ctx, "upsert_role", |conn| {
            conn.execute(
                "INSERT INTO roles (name, is_admin) VALUES (?1, ?2)
                 ON CONFLICT (name) DO UPDATE SET is_admin = excluded.is_admin",
                params![name, is_admin],
            )
        })?;
        info!(role = name, is_admin, "role saved");
        Ok(())
    }

    /// Grant `capability` on `entity` to `role`. Granting twice is a no-op.
    pub fn grant(
        &self,
        ctx: &CallContext,
        role: &str,
        entity: EntityId,
        capability: Capability,
    ) -> Result<(), CanopyError> {
        let (role_known, entity_live) = self.with_conn(ctx, "grant", |conn| {
            let tx = conn.transaction()?;
            let role_known = tx
                .query_row("SELECT 1 FROM roles WHERE name = ?1", [role], |_| Ok(()))
                .optional()?
                .is_some();
            let entity_live = tx
                .query_row(
                    "SELECT 1 FROM entities WHERE id = ?1 AND deleted_at IS NULL",
                    [entity],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if role_known && entity_live {
                tx.execute(
                    "INSERT OR IGNORE INTO role_grants (role, entity_id, capability)
                     VALUES (?1, ?2, ?3)",
                    params![role, entity, capability],
                )?;
                tx.commit()?;
            }
            Ok((role_known, entity_live))
        })?;

        if !role_known {
            return Err(CanopyError::ValidationFailed {
                field: "role",
                rule: ValidationRule::UnknownValue {
                    value: role.to_string(),
                },
            });
        }
        if !entity_live {
            return Err(CanopyError::EntityNotFound { id: entity });
        }
        info!(role, %entity, %capability, "grant added");
        Ok(())
    }

    /// Remove a grant. Returns whether it existed.
    pub fn revoke(
        &self,
        ctx: &CallContext,
        role: &str,
        entity: EntityId,
        capability: Capability,
    ) -> Result<bool, CanopyError> {
        let removed = self.with_conn(ctx, "revoke", |conn| {
            conn.execute(
                "DELETE FROM role_grants WHERE role = ?1 AND entity_id = ?2 AND capability = ?3",
                params![role, entity, capability],
            )
        })?;
        Ok(removed > 0)
    }
}

// =============================================================================
// HIERARCHYSTORE IMPLEMENTATION
// =============================================================================

impl HierarchyStore for SqliteStore {
    fn get(&self, ctx: &CallContext, id: EntityId) -> Result<Entity, CanopyError> {
        self.with_conn(ctx, "get", |conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM entities WHERE id = ?1 AND deleted_at IS NULL",
                    ENTITY_COLUMNS
                ),
                [id],
                entity_from_row,
            )
            .optional()
        })?
        .ok_or(CanopyError::EntityNotFound { id })
    }

    fn get_list_item(&self, ctx: &CallContext, id: EntityId) -> Result<ListItem, CanopyError> {
        self.with_conn(ctx, "get_list_item", |conn| {
            conn.query_row(
                "SELECT id, entity_type, name, parent_id FROM entities
                 WHERE id = ?1 AND deleted_at IS NULL",
                [id],
                list_item_from_row,
            )
            .optional()
        })?
        .ok_or(CanopyError::EntityNotFound { id })
    }

    fn get_version(
        &self,
        ctx: &CallContext,
        id: EntityId,
        version: VersionNumber,
    ) -> Result<Entity, CanopyError> {
        self.with_conn(ctx, "get_version", |conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM entity_versions v JOIN entities e ON e.id = v.entity_id
                     WHERE v.entity_id = ?1 AND v.version = ?2 AND e.deleted_at IS NULL",
                    VERSION_COLUMNS
                ),
                params![id, version],
                entity_from_row,
            )
            .optional()
        })?
        .ok_or(CanopyError::EntityNotFound { id })
    }

    fn get_versions_list(
        &self,
        ctx: &CallContext,
        id: EntityId,
    ) -> Result<Vec<Entity>, CanopyError> {
        self.with_conn(ctx, "get_versions_list", |conn| {
            let live = conn
                .query_row(
                    "SELECT 1 FROM entities WHERE id = ?1 AND deleted_at IS NULL",
                    [id],
                    |_| Ok(()),
                )
                .optional()?;
            if live.is_none() {
                return Ok(None);
            }

            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM entity_versions v JOIN entities e ON e.id = v.entity_id
                 WHERE v.entity_id = ?1 ORDER BY v.version DESC",
                VERSION_COLUMNS
            ))?;
            let versions = stmt
                .query_map([id], entity_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(Some(versions))
        })?
        .ok_or(CanopyError::EntityNotFound { id })
    }

    fn get_all(&self, ctx: &CallContext) -> Result<Vec<ListItem>, CanopyError> {
        self.with_conn(ctx, "get_all", |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, entity_type, name, parent_id FROM entities
                 WHERE deleted_at IS NULL ORDER BY name, id",
            )?;
            stmt.query_map([], list_item_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()
        })
    }

    fn get_hierarchy(
        &self,
        ctx: &CallContext,
        seeds: &[EntityId],
        max_depth: u32,
        viewer: Option<UserId>,
        direction: Direction,
    ) -> Result<Vec<HierarchyItem>, CanopyError> {
        ctx.check()?;
        let seeds: BTreeSet<EntityId> = seeds.iter().copied().collect();
        if seeds.is_empty() || max_depth == 0 {
            return Ok(Vec::new());
        }

        let sql = hierarchy_sql(seeds.len(), direction);
        let mut values = Vec::with_capacity(seeds.len() + 2);
        values.push(Value::Integer(i64::from(max_depth)));
        values.push(viewer.map_or(Value::Null, |user| blob(user.0)));
        values.extend(seeds.iter().map(|id| blob(id.0)));

        self.with_conn(ctx, "get_hierarchy", |conn| {
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_map(params_from_iter(values.iter()), |row| {
                Ok(HierarchyItem {
                    item: list_item_from_row(row)?,
                    depth: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
        })
    }

    fn create(
        &self,
        ctx: &CallContext,
        entity: &NewEntity,
        id: EntityId,
        now: DateTime<Utc>,
    ) -> Result<(), CanopyError> {
        self.with_conn(ctx, "create", |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO entities
                     (id, entity_type, name, content, parent_id, created_by, updated_by,
                      current_version, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7, ?8, ?8)",
                params![
                    id,
                    entity.entity_type,
                    entity.name,
                    entity.content,
                    entity.parent_id,
                    entity.user_id,
                    VersionNumber::FIRST,
                    now
                ],
            )?;
            insert_version(&tx, id, VersionNumber::FIRST)?;
            tx.commit()
        })
    }

    fn create_draft(
        &self,
        ctx: &CallContext,
        entity: &NewEntity,
        id: EntityId,
        now: DateTime<Utc>,
    ) -> Result<(), CanopyError> {
        self.with_conn(ctx, "create_draft", |conn| {
            conn.execute(
                "INSERT INTO entities
                     (id, entity_type, name, content, parent_id, created_by, updated_by,
                      current_version, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, NULL, ?7, ?7)",
                params![
                    id,
                    entity.entity_type,
                    entity.name,
                    entity.content,
                    entity.parent_id,
                    entity.user_id,
                    now
                ],
            )?;
            Ok(())
        })
    }

    fn update(
        &self,
        ctx: &CallContext,
        changes: &EntityChanges,
        now: DateTime<Utc>,
    ) -> Result<VersionNumber, CanopyError> {
        let id = changes.id;
        self.with_conn(ctx, "update", |conn| {
            // IMMEDIATE takes the write lock up front: concurrent publishers
            // serialize on it and never read the same MAX(version).
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let next: VersionNumber = tx.query_row(
                "SELECT COALESCE(MAX(version), 0) + 1 FROM entity_versions WHERE entity_id = ?1",
                [id],
                |row| row.get(0),
            )?;
            let touched = tx.execute(
                "UPDATE entities
                 SET name = ?2, content = ?3,
                     parent_id = CASE WHEN ?4 THEN ?5 ELSE parent_id END,
                     updated_by = ?6, updated_at = ?7, current_version = ?8
                 WHERE id = ?1 AND deleted_at IS NULL",
                params![
                    id,
                    changes.name,
                    changes.content,
                    changes.moves(),
                    changes.parent_id.flatten(),
                    changes.user_id,
                    now,
                    next
                ],
            )?;
            if touched == 0 {
                return Ok(None);
            }
            insert_version(&tx, id, next)?;
            tx.commit()?;
            Ok(Some(next))
        })?
        .ok_or(CanopyError::EntityNotFound { id })
    }

    fn update_draft(
        &self,
        ctx: &CallContext,
        changes: &EntityChanges,
        now: DateTime<Utc>,
    ) -> Result<(), CanopyError> {
        let id = changes.id;
        let touched = self.with_conn(ctx, "update_draft", |conn| {
            conn.execute(
                "UPDATE entities
                 SET name = ?2, content = ?3,
                     parent_id = CASE WHEN ?4 THEN ?5 ELSE parent_id END,
                     updated_by = ?6, updated_at = ?7, current_version = NULL
                 WHERE id = ?1 AND deleted_at IS NULL",
                params![
                    id,
                    changes.name,
                    changes.content,
                    changes.moves(),
                    changes.parent_id.flatten(),
                    changes.user_id,
                    now
                ],
            )
        })?;
        if touched == 0 {
            return Err(CanopyError::EntityNotFound { id });
        }
        Ok(())
    }

    fn delete(
        &self,
        ctx: &CallContext,
        ids: &[EntityId],
        now: DateTime<Utc>,
    ) -> Result<(), CanopyError> {
        let Some(&first) = ids.first() else {
            return Err(CanopyError::ValidationFailed {
                field: "ids",
                rule: ValidationRule::Required,
            });
        };

        let placeholders = (0..ids.len())
            .map(|i| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE entities SET deleted_at = ?1 WHERE deleted_at IS NULL AND id IN ({})",
            placeholders
        );

        let touched = self.with_conn(ctx, "delete", |conn| {
            let mut values: Vec<&dyn ToSql> = Vec::with_capacity(ids.len() + 1);
            values.push(&now);
            values.extend(ids.iter().map(|id| id as &dyn ToSql));
            conn.execute(&sql, values.as_slice())
        })?;
        if touched == 0 {
            return Err(CanopyError::EntityNotFound { id: first });
        }
        debug!(count = touched, "entities soft-deleted");
        Ok(())
    }
}

// =============================================================================
// PERMISSIONSOURCE IMPLEMENTATION
// =============================================================================

impl PermissionSource for SqliteStore {
    fn direct_permissions(
        &self,
        ctx: &CallContext,
        role: &str,
        capability: Capability,
    ) -> Result<DirectPermissions, CanopyError> {
        let found = self.with_conn(ctx, "direct_permissions", |conn| {
            let is_admin: Option<bool> = conn
                .query_row("SELECT is_admin FROM roles WHERE name = ?1", [role], |row| {
                    row.get(0)
                })
                .optional()?;
            let Some(is_admin) = is_admin else {
                return Ok(None);
            };

            // A write grant implies read.
            let mut stmt = conn.prepare(
                "SELECT g.entity_id FROM role_grants g
                 JOIN entities e ON e.id = g.entity_id
                 WHERE g.role = ?1 AND e.deleted_at IS NULL
                   AND (g.capability = ?2 OR g.capability = 'write')",
            )?;
            let entity_ids = stmt
                .query_map(params![role, capability], |row| row.get(0))?
                .collect::<rusqlite::Result<BTreeSet<EntityId>>>()?;
            Ok(Some(DirectPermissions {
                is_admin,
                entity_ids,
            }))
        })?;

        found.ok_or(CanopyError::Unauthorized)
    }
}

// =============================================================================
// TESTS
// =============================================================================
