//! Store configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the store can be opened with zero
//! configuration for local development.

use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;

use crate::error::{Result, StoreError};

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path of the SQLite database file.
    /// Env: `PARLEY_DB_PATH`
    /// Default: `None`, meaning the platform data directory
    /// (see [`StoreConfig::resolve_db_path`]).
    pub db_path: Option<PathBuf>,

    /// How long a write waits for the SQLite file lock before failing.
    /// Env: `PARLEY_BUSY_TIMEOUT_MS`
    /// Default: 5 seconds.
    pub busy_timeout: Duration,

    /// Maximum message length in characters.
    /// Env: `PARLEY_MAX_CONTENT_LEN`
    /// Default: `10000`
    pub max_content_len: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            busy_timeout: Duration::from_millis(5_000),
            max_content_len: 10_000,
        }
    }
}

impl StoreConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup("PARLEY_DB_PATH") {
            if !path.trim().is_empty() {
                config.db_path = Some(PathBuf::from(path));
            }
        }

        if let Some(val) = lookup("PARLEY_BUSY_TIMEOUT_MS") {
            match val.parse::<u64>() {
                Ok(ms) => config.busy_timeout = Duration::from_millis(ms),
                Err(_) => {
                    tracing::warn!(value = %val, "Invalid PARLEY_BUSY_TIMEOUT_MS, using default");
                }
            }
        }

        if let Some(val) = lookup("PARLEY_MAX_CONTENT_LEN") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_content_len = n,
                _ => {
                    tracing::warn!(value = %val, "Invalid PARLEY_MAX_CONTENT_LEN, using default");
                }
            }
        }

        config
    }

    /// The configured database path, or the platform default:
    /// - Linux:   `~/.local/share/parley/parley.db`
    /// - macOS:   `~/Library/Application Support/com.parley.parley/parley.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\parley\parley\data\parley.db`
    pub fn resolve_db_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.db_path {
            return Ok(path.clone());
        }
        let project_dirs =
            ProjectDirs::from("com", "parley", "parley").ok_or(StoreError::NoDataDir)?;
        Ok(project_dirs.data_dir().join("parley.db"))
    }
}
