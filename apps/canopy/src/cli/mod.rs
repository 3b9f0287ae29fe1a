//! # Canopy CLI Module
//!
//! This module implements the CLI interface for Canopy.
//!
//! ## Available Commands
//!
//! - `server` - Start the HTTP server
//! - `init` - Initialize a new database
//! - `role` - Create a role or change its admin flag
//! - `grant` / `revoke` - Manage a role's grants
//! - `tree` - Print the forest visible to a role
//! - `create` - Create an entity
//! - `history` - List the versions of an entity

mod commands;

use crate::config::AppConfig;
use canopy_core::{CanopyError, Capability, EntityId, UserId};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub use commands::*;

/// Identity recorded for changes made from the command line.
pub const CLI_OPERATOR: &str = "00000000-0000-0000-0000-000000000001";

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Canopy - Knowledge-Base Hierarchy Server
///
/// Departments and articles in a depth-bounded forest, with an immutable
/// version history and role-scoped access.
#[derive(Parser, Debug)]
#[command(name = "canopy")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the TOML configuration file
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the SQLite database (overrides `[storage] database`)
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start HTTP server
    Server {
        /// Host to bind to (overrides `[server] host`)
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to (overrides `[server] port`)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Initialize a new empty database
    Init {
        /// Force initialization even if database exists
        #[arg(short, long)]
        force: bool,

        /// Also create this administrator role
        #[arg(long)]
        admin_role: Option<String>,
    },

    /// Create a role, or change its admin flag
    Role {
        /// Role name
        name: String,

        /// Administrators see and manage the whole forest
        #[arg(long)]
        admin: bool,
    },

    /// Grant a capability on an entity to a role
    Grant {
        /// Role name
        role: String,

        /// Entity id
        entity: EntityId,

        /// Capability (read, write)
        #[arg(short = 'C', long, default_value = "read")]
        capability: Capability,
    },

    /// Remove a grant
    Revoke {
        /// Role name
        role: String,

        /// Entity id
        entity: EntityId,

        /// Capability (read, write)
        #[arg(short = 'C', long, default_value = "read")]
        capability: Capability,
    },

    /// Print the forest visible to a role
    Tree {
        /// Role to view the forest as
        #[arg(short, long)]
        role: String,

        /// User to view the forest as (drafts are visible to their creator)
        #[arg(short, long, default_value = CLI_OPERATOR)]
        user: UserId,
    },

    /// Create an entity
    Create {
        /// Entity type (department, article)
        #[arg(short = 't', long)]
        entity_type: String,

        /// Entity name
        #[arg(short, long)]
        name: String,

        /// Entity content
        #[arg(long, default_value = "")]
        content: String,

        /// Parent entity id (omit for a root department)
        #[arg(short, long)]
        parent: Option<EntityId>,

        /// Create as an unpublished draft
        #[arg(long)]
        draft: bool,

        /// Role to act as
        #[arg(short, long)]
        role: String,

        /// User to act as
        #[arg(short, long, default_value = CLI_OPERATOR)]
        user: UserId,
    },

    /// List the versions of an entity, newest first
    History {
        /// Entity id
        id: EntityId,

        /// Role to act as
        #[arg(short, long)]
        role: String,

        /// User to act as
        #[arg(short, long, default_value = CLI_OPERATOR)]
        user: UserId,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), CanopyError> {
    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(database) = cli.database {
        config.storage.database = database;
    }
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Server { host, port }) => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            config.validate()?;
            cmd_server(&config).await
        }
        Some(Commands::Init { force, admin_role }) => {
            cmd_init(&config, json_mode, force, admin_role.as_deref())
        }
        Some(Commands::Role { name, admin }) => cmd_role(&config, json_mode, &name, admin),
        Some(Commands::Grant {
            role,
            entity,
            capability,
        }) => cmd_grant(&config, json_mode, &role, entity, capability),
        Some(Commands::Revoke {
            role,
            entity,
            capability,
        }) => cmd_revoke(&config, json_mode, &role, entity, capability),
        Some(Commands::Tree { role, user }) => cmd_tree(&config, json_mode, &role, user),
        Some(Commands::Create {
            entity_type,
            name,
            content,
            parent,
            draft,
            role,
            user,
        }) => cmd_create(
            &config,
            json_mode,
            CreateArgs {
                entity_type,
                name,
                content,
                parent,
                draft,
                role,
                user,
            },
        ),
        Some(Commands::History { id, role, user }) => {
            cmd_history(&config, json_mode, id, &role, user)
        }
        None => {
            // No subcommand - show the effective configuration
            cmd_show_config(&config, json_mode)
        }
    }
}
