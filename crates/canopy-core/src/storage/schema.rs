//! # Database Schema
//!
//! Table definitions and schema versioning for the SQLite store.
//!
//! The version lives in a one-row `schema_version` table. A fresh database
//! gets the full schema; a database written by a newer release is refused.

use crate::CanopyError;
use rusqlite::{Connection, OptionalExtension};
use tracing::info;

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Create or upgrade the schema.
pub fn init_schema(conn: &Connection) -> Result<(), CanopyError> {
    let current = schema_version(conn)?;

    if current == 0 {
        info!("Creating database schema v{}", SCHEMA_VERSION);
        conn.execute_batch(SCHEMA)
            .map_err(|e| CanopyError::store("init_schema", e))?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current > SCHEMA_VERSION {
        return Err(CanopyError::Store {
            operation: "init_schema",
            message: format!(
                "database schema v{} is newer than supported v{}",
                current, SCHEMA_VERSION
            ),
        });
    }

    Ok(())
}

fn schema_version(conn: &Connection) -> Result<i32, CanopyError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )
    .map_err(|e| CanopyError::store("init_schema", e))?;

    let version = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()
        .map_err(|e| CanopyError::store("init_schema", e))?;

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), CanopyError> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| CanopyError::store("init_schema", e))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])
        .map_err(|e| CanopyError::store("init_schema", e))?;
    Ok(())
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS entities (
    id              BLOB PRIMARY KEY NOT NULL,
    entity_type     TEXT NOT NULL CHECK (entity_type IN ('department', 'article')),
    name            TEXT NOT NULL,
    content         TEXT NOT NULL DEFAULT '',
    parent_id       BLOB REFERENCES entities (id),
    created_by      BLOB NOT NULL,
    updated_by      BLOB NOT NULL,
    current_version INTEGER CHECK (current_version IS NULL OR current_version >= 1),
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    deleted_at      TEXT
);

CREATE INDEX IF NOT EXISTS idx_entities_parent ON entities (parent_id);

CREATE TABLE IF NOT EXISTS entity_versions (
    entity_id   BLOB NOT NULL REFERENCES entities (id),
    version     INTEGER NOT NULL CHECK (version >= 1),
    entity_type TEXT NOT NULL,
    name        TEXT NOT NULL,
    content     TEXT NOT NULL,
    parent_id   BLOB,
    edited_by   BLOB NOT NULL,
    created_at  TEXT NOT NULL,
    PRIMARY KEY (entity_id, version)
) WITHOUT ROWID;

CREATE TRIGGER IF NOT EXISTS entity_versions_no_update
BEFORE UPDATE ON entity_versions
BEGIN
    SELECT RAISE(ABORT, 'entity_versions is append-only');
END;

CREATE TRIGGER IF NOT EXISTS entity_versions_no_delete
BEFORE DELETE ON entity_versions
BEGIN
    SELECT RAISE(ABORT, 'entity_versions is append-only');
END;

CREATE TABLE IF NOT EXISTS roles (
    name     TEXT PRIMARY KEY NOT NULL,
    is_admin INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS role_grants (
    role       TEXT NOT NULL REFERENCES roles (name) ON DELETE CASCADE,
    entity_id  BLOB NOT NULL REFERENCES entities (id),
    capability TEXT NOT NULL CHECK (capability IN ('read', 'write')),
    PRIMARY KEY (role, entity_id, capability)
);
"#;
