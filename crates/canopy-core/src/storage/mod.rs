//! # Storage Backends
//!
//! - `sqlite`: the SQLite-backed `HierarchyStore` and `PermissionSource`
//! - `schema`: table definitions and schema versioning

pub mod schema;
pub mod sqlite;

pub use sqlite::SqliteStore;
