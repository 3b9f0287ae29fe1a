//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands. Every
//! command opens the configured database, runs one engine call under a
//! background context, and prints either text or JSON.

use crate::api::{self, AppState};
use crate::config::AppConfig;
use canopy_core::{
    CallContext, Caller, CanopyError, Capability, CreateInput, Entity, EntityId, HierarchyCore,
    KnowledgeService, SqliteService, SqliteStore, TreeNode, UserId,
};
use std::path::Path;
use std::sync::Arc;

/// Print a JSON value the way every `--json-mode` command does.
fn print_json(value: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Open the configured database and wire the service on top of it.
pub fn open_service(config: &AppConfig) -> Result<(Arc<SqliteStore>, Arc<SqliteService>), CanopyError> {
    let store = Arc::new(SqliteStore::open(&config.storage.database)?);
    let core = Arc::new(HierarchyCore::new(Arc::clone(&store), config.hierarchy)?);
    let service = Arc::new(KnowledgeService::new(core, Arc::clone(&store)));
    Ok((store, service))
}

/// Remove a database file together with its WAL side files.
fn remove_database(path: &Path) -> Result<(), CanopyError> {
    let mut files = vec![path.to_path_buf()];
    for suffix in ["-wal", "-shm"] {
        let mut side = path.as_os_str().to_owned();
        side.push(suffix);
        files.push(side.into());
    }

    for file in files.iter().filter(|f| f.exists()) {
        std::fs::remove_file(file).map_err(|e| {
            CanopyError::config(format!("Cannot remove '{}': {}", file.display(), e))
        })?;
    }
    Ok(())
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

/// Start the HTTP server.
pub async fn cmd_server(config: &AppConfig) -> Result<(), CanopyError> {
    let (_, service) = open_service(config)?;

    println!("Canopy Hierarchy Server Starting...");
    println!();
    println!("Configuration:");
    println!("  Host:      {}", config.server.host);
    println!("  Port:      {}", config.server.port);
    println!("  Database:  {:?}", config.storage.database);
    println!("  Max depth: {}", config.hierarchy.max_depth);
    println!("  Timeout:   {} ms", config.server.request_timeout_ms);
    println!();
    println!("Endpoints:");
    println!("  GET    /health                         - Health check");
    println!("  GET    /tree                           - Visible forest");
    println!("  GET    /permitted-ids                  - Permitted entity ids");
    println!("  POST   /entities                       - Create an entity");
    println!("  GET    /entities/{{id}}                  - Read an entity");
    println!("  PUT    /entities/{{id}}                  - Update, publish or move");
    println!("  DELETE /entities/{{id}}                  - Delete with subtree");
    println!("  GET    /entities/{{id}}/versions         - Version history");
    println!("  GET    /entities/{{id}}/versions/{{v}}     - One version");
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let state = AppState::new(service, config.request_timeout());
    api::run_server(&config.bind_addr(), state).await
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Initialize a new database, optionally with an administrator role.
pub fn cmd_init(
    config: &AppConfig,
    json_mode: bool,
    force: bool,
    admin_role: Option<&str>,
) -> Result<(), CanopyError> {
    let db_path = &config.storage.database;
    if db_path.exists() {
        if !force {
            return Err(CanopyError::config(
                "Database already exists. Use --force to overwrite.",
            ));
        }
        tracing::warn!(path = ?db_path, "Overwriting existing database");
        remove_database(db_path)?;
    }

    let (store, _) = open_service(config)?;
    if let Some(role) = admin_role {
        store.upsert_role(&CallContext::background(), role, true)?;
    }

    if json_mode {
        print_json(&serde_json::json!({
            "database": db_path.to_string_lossy(),
            "admin_role": admin_role,
        }));
        return Ok(());
    }

    println!("Initialized new database at {:?}", db_path);
    if let Some(role) = admin_role {
        println!("Administrator role: {}", role);
    }
    Ok(())
}

// =============================================================================
// ROLE AND GRANT COMMANDS
// =============================================================================

pub fn cmd_role(
    config: &AppConfig,
    json_mode: bool,
    name: &str,
    admin: bool,
) -> Result<(), CanopyError> {
    let (store, _) = open_service(config)?;
    store.upsert_role(&CallContext::background(), name, admin)?;

    if json_mode {
        print_json(&serde_json::json!({ "role": name.trim(), "is_admin": admin }));
    } else {
        println!("Role '{}' saved (admin: {})", name.trim(), admin);
    }
    Ok(())
}

pub fn cmd_grant(
    config: &AppConfig,
    json_mode: bool,
    role: &str,
    entity: EntityId,
    capability: Capability,
) -> Result<(), CanopyError> {
    let (store, _) = open_service(config)?;
    store.grant(&CallContext::background(), role, entity, capability)?;

    if json_mode {
        print_json(&serde_json::json!({
            "role": role,
            "entity": entity,
            "capability": capability,
            "granted": true,
        }));
    } else {
        println!("Granted {} on {} to '{}'", capability, entity, role);
    }
    Ok(())
}

pub fn cmd_revoke(
    config: &AppConfig,
    json_mode: bool,
    role: &str,
    entity: EntityId,
    capability: Capability,
) -> Result<(), CanopyError> {
    let (store, _) = open_service(config)?;
    let removed = store.revoke(&CallContext::background(), role, entity, capability)?;

    if json_mode {
        print_json(&serde_json::json!({
            "role": role,
            "entity": entity,
            "capability": capability,
            "revoked": removed,
        }));
    } else if removed {
        println!("Revoked {} on {} from '{}'", capability, entity, role);
    } else {
        println!("No {} grant on {} for '{}'", capability, entity, role);
    }
    Ok(())
}

// =============================================================================
// TREE COMMAND
// =============================================================================

fn print_node(node: &TreeNode, indent: usize) {
    println!(
        "{:indent$}[{}] {} ({})",
        "",
        node.item.entity_type,
        node.item.name,
        node.item.id,
        indent = indent * 2
    );
    for child in &node.children {
        print_node(child, indent + 1);
    }
}

/// Print the forest visible to `role`.
pub fn cmd_tree(
    config: &AppConfig,
    json_mode: bool,
    role: &str,
    user: UserId,
) -> Result<(), CanopyError> {
    let (_, service) = open_service(config)?;
    let caller = Caller::new(user, role);
    let roots = service.get_tree(&CallContext::background(), &caller)?;

    if json_mode {
        print_json(&serde_json::to_value(&roots).unwrap_or_default());
        return Ok(());
    }

    let total: usize = roots.iter().map(TreeNode::subtree_size).sum();
    println!("Canopy Tree (role '{}')", role);
    println!("=====================");
    if roots.is_empty() {
        println!("(nothing visible)");
    }
    for root in &roots {
        print_node(root, 0);
    }
    println!();
    println!("{} entities", total);
    Ok(())
}

// =============================================================================
// CREATE COMMAND
// =============================================================================

/// Arguments of `canopy create`.
#[derive(Debug, Clone)]
pub struct CreateArgs {
    pub entity_type: String,
    pub name: String,
    pub content: String,
    pub parent: Option<EntityId>,
    pub draft: bool,
    pub role: String,
    pub user: UserId,
}

pub fn cmd_create(config: &AppConfig, json_mode: bool, args: CreateArgs) -> Result<(), CanopyError> {
    let (_, service) = open_service(config)?;
    let ctx = CallContext::background();
    let entity_type = service.core().validator().parse_entity_type(&args.entity_type)?;
    let caller = Caller::new(args.user, args.role);

    let id = service.create(
        &ctx,
        &caller,
        CreateInput {
            entity_type,
            name: args.name,
            content: args.content,
            parent_id: args.parent,
            is_draft: args.draft,
        },
    )?;

    if json_mode {
        print_json(&serde_json::json!({ "id": id, "entity_type": entity_type, "draft": args.draft }));
    } else {
        println!("Created {} {}", entity_type, id);
    }
    Ok(())
}

// =============================================================================
// HISTORY COMMAND
// =============================================================================

fn print_version(entity: &Entity) {
    let label = entity
        .publication
        .version()
        .map_or_else(|| "draft".to_string(), |v| v.to_string());
    println!(
        "{:>6}  {}  {}  (by {})",
        label,
        entity.updated_at.format("%Y-%m-%d %H:%M:%S"),
        entity.name,
        entity.updated_by
    );
}

/// List the versions of an entity, newest first.
pub fn cmd_history(
    config: &AppConfig,
    json_mode: bool,
    id: EntityId,
    role: &str,
    user: UserId,
) -> Result<(), CanopyError> {
    let (_, service) = open_service(config)?;
    let caller = Caller::new(user, role);
    let versions = service.get_versions_list(&CallContext::background(), &caller, id)?;

    if json_mode {
        print_json(&serde_json::json!({ "id": id, "versions": versions }));
        return Ok(());
    }

    println!("History of {}", id);
    println!("==========={}", "=".repeat(id.to_string().len()));
    if versions.is_empty() {
        println!("(unpublished draft)");
    }
    for entity in &versions {
        print_version(entity);
    }
    Ok(())
}

// =============================================================================
// CONFIG DISPLAY
// =============================================================================

/// Show the effective configuration (no subcommand given).
pub fn cmd_show_config(config: &AppConfig, json_mode: bool) -> Result<(), CanopyError> {
    if json_mode {
        print_json(&serde_json::to_value(config).unwrap_or_default());
        return Ok(());
    }

    println!("Canopy Configuration");
    println!("====================");
    println!("Database:        {:?}", config.storage.database);
    println!("Listen:          {}", config.bind_addr());
    println!("Request timeout: {} ms", config.server.request_timeout_ms);
    println!("Max depth:       {}", config.hierarchy.max_depth);
    println!("Max name length: {}", config.hierarchy.max_name_length);
    println!();
    println!("Run `canopy --help` for the available commands.");
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &tempfile::TempDir) -> AppConfig {
        let mut config = AppConfig::default();
        config.storage.database = dir.path().join("canopy.db");
        config
    }

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = config_in(&dir);

        cmd_init(&config, true, false, Some("admin")).expect("first init");
        assert!(matches!(
            cmd_init(&config, true, false, None),
            Err(CanopyError::Config { .. })
        ));
        cmd_init(&config, true, true, None).expect("forced init");
    }

    #[test]
    fn forced_init_starts_from_an_empty_database() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = config_in(&dir);
        cmd_init(&config, true, false, Some("admin")).expect("init");

        let args = CreateArgs {
            entity_type: "department".to_string(),
            name: "Handbook".to_string(),
            content: String::new(),
            parent: None,
            draft: false,
            role: "admin".to_string(),
            user: UserId(uuid::Uuid::from_u128(1)),
        };
        cmd_create(&config, true, args.clone()).expect("create");

        cmd_init(&config, true, true, Some("admin")).expect("forced init");
        let (_, service) = open_service(&config).expect("open");
        let caller = Caller::new(args.user, "admin");
        let tree = service
            .get_tree(&CallContext::background(), &caller)
            .expect("tree");
        assert!(tree.is_empty());
    }

    #[test]
    fn roles_and_grants_drive_the_tree() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = config_in(&dir);
        cmd_init(&config, true, false, Some("admin")).expect("init");
        cmd_role(&config, true, "readers", false).expect("role");

        let (_, service) = open_service(&config).expect("open");
        let ctx = CallContext::background();
        let admin = Caller::new(UserId(uuid::Uuid::from_u128(1)), "admin");
        let root = service
            .create(
                &ctx,
                &admin,
                CreateInput {
                    entity_type: canopy_core::EntityType::Department,
                    name: "Root".to_string(),
                    content: String::new(),
                    parent_id: None,
                    is_draft: false,
                },
            )
            .expect("root");

        let reader = Caller::new(UserId(uuid::Uuid::from_u128(2)), "readers");
        assert!(service.get_tree(&ctx, &reader).expect("tree").is_empty());

        cmd_grant(&config, true, "readers", root, Capability::Read).expect("grant");
        assert_eq!(service.get_tree(&ctx, &reader).expect("tree").len(), 1);

        cmd_revoke(&config, true, "readers", root, Capability::Read).expect("revoke");
        assert!(service.get_tree(&ctx, &reader).expect("tree").is_empty());
    }

    #[test]
    fn grant_to_unknown_role_fails() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = config_in(&dir);
        cmd_init(&config, true, false, None).expect("init");

        let result = cmd_grant(
            &config,
            true,
            "ghosts",
            EntityId(uuid::Uuid::from_u128(9)),
            Capability::Read,
        );
        assert!(matches!(result, Err(CanopyError::ValidationFailed { .. })));
    }
}
