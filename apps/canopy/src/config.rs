//! # Application Configuration
//!
//! TOML configuration for the Canopy binary.
//!
//! ```toml
//! [hierarchy]
//! max_depth = 10
//! max_name_length = 255
//!
//! [server]
//! host = "127.0.0.1"
//! port = 8080
//! request_timeout_ms = 5000
//!
//! [storage]
//! database = "canopy.db"
//! ```
//!
//! Every section and key is optional. Unknown keys are rejected, and
//! invalid values fail at startup rather than on the first request.

use canopy_core::{CanopyError, HierarchyConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default bind host: loopback only.
const DEFAULT_HOST: &str = "127.0.0.1";

/// Default bind port.
const DEFAULT_PORT: u16 = 8080;

/// Default per-request deadline for engine calls.
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;

/// Default database file.
const DEFAULT_DATABASE: &str = "canopy.db";

// =============================================================================
// SECTIONS
// =============================================================================

/// `[server]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Deadline applied to every engine call made on behalf of a request.
    pub request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

/// `[storage]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub database: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from(DEFAULT_DATABASE),
        }
    }
}

// =============================================================================
// APP CONFIG
// =============================================================================

/// Complete configuration of the binary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub hierarchy: HierarchyConfig,
    pub server: ServerConfig,
    pub storage: StorageConfig,
}

impl AppConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, CanopyError> {
        let config: Self = toml::from_str(source)
            .map_err(|e| CanopyError::config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load the configuration file at `path`, or the defaults when no path
    /// is given.
    pub fn load(path: Option<&Path>) -> Result<Self, CanopyError> {
        let Some(path) = path else {
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        };

        let source = std::fs::read_to_string(path).map_err(|e| {
            CanopyError::config(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        tracing::debug!(path = %path.display(), "Loaded configuration file");
        Self::from_toml_str(&source)
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<(), CanopyError> {
        self.hierarchy.validate()?;
        if self.server.host.trim().is_empty() {
            return Err(CanopyError::config("server.host must not be empty"));
        }
        if self.server.request_timeout_ms == 0 {
            return Err(CanopyError::config(
                "server.request_timeout_ms must be greater than 0",
            ));
        }
        if self.storage.database.as_os_str().is_empty() {
            return Err(CanopyError::config("storage.database must not be empty"));
        }
        Ok(())
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.server.request_timeout_ms)
    }

    /// `host:port` for the listener.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_yields_defaults() {
        let config = AppConfig::from_toml_str("").expect("parse");
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.hierarchy.max_depth, 10);
        assert_eq!(config.hierarchy.max_name_length, 255);
        assert_eq!(config.request_timeout(), Duration::from_millis(5000));
        assert_eq!(config.bind_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [hierarchy]
            max_depth = 3

            [server]
            port = 9090
            "#,
        )
        .expect("parse");
        assert_eq!(config.hierarchy.max_depth, 3);
        assert_eq!(config.hierarchy.max_name_length, 255);
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.storage.database, PathBuf::from("canopy.db"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let zero_depth = AppConfig::from_toml_str("[hierarchy]\nmax_depth = 0\n");
        assert!(matches!(zero_depth, Err(CanopyError::Config { .. })));

        let zero_timeout = AppConfig::from_toml_str("[server]\nrequest_timeout_ms = 0\n");
        assert!(matches!(zero_timeout, Err(CanopyError::Config { .. })));

        let unknown_key = AppConfig::from_toml_str("[server]\nworkers = 4\n");
        assert!(matches!(unknown_key, Err(CanopyError::Config { .. })));
    }

    #[test]
    fn load_reads_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[storage]\ndatabase = \"kb.sqlite\"").expect("write");

        let config = AppConfig::load(Some(file.path())).expect("load");
        assert_eq!(config.storage.database, PathBuf::from("kb.sqlite"));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let result = AppConfig::load(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(CanopyError::Config { .. })));
    }
}
