//! # Canopy - Knowledge-Base Hierarchy Server
//!
//! The main binary for the Canopy hierarchy and versioning engine.
//!
//! This application provides:
//! - HTTP REST API server (axum-based)
//! - CLI interface for administration and inspection
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 apps/canopy (THE BINARY)            │
//! │                                                     │
//! │     ┌─────────────┐          ┌─────────────┐        │
//! │     │    CLI      │          │  HTTP API   │        │
//! │     │   (clap)    │          │   (axum)    │        │
//! │     └──────┬──────┘          └──────┬──────┘        │
//! │            └───────────┬────────────┘               │
//! │                        ▼                            │
//! │                ┌───────────────┐                    │
//! │                │  canopy-core  │                    │
//! │                │  (THE LOGIC)  │                    │
//! │                └───────────────┘                    │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Start the HTTP server
//! canopy --config canopy.toml server --port 8080
//!
//! # Administration
//! canopy init --admin-role admin
//! canopy role editors
//! canopy grant editors 6f1c1c3e-8d4f-4b35-9a55-3f6f2f0e8a11 --capability write
//! canopy tree --role editors
//! ```

use canopy::cli;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    // CANOPY_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("CANOPY_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let default_filter = if cli.verbose {
        "canopy=debug,canopy_core=debug,tower_http=debug"
    } else {
        "canopy=info,canopy_core=info,tower_http=debug"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!(kind = e.kind(), "Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the Canopy startup banner.
fn print_banner() {
    println!(
        r#"
    ___ __ _ _ __   ___  _ __  _   _
   / __/ _` | '_ \ / _ \| '_ \| | | |
  | (_| (_| | | | | (_) | |_) | |_| |
   \___\__,_|_| |_|\___/| .__/ \__, |
                        |_|    |___/

  Knowledge-Base Hierarchy Server v{}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
