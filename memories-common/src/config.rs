//! Configuration loading and root folder resolution
//!
//! Values resolve in priority order:
//! 1. Environment variable
//! 2. TOML config file
//! 3. Compiled default

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Environment variable overriding the data folder
pub const ROOT_FOLDER_ENV: &str = "MEMORIES_ROOT_FOLDER";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "memories.db";

/// Top-level TOML configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub service: ServiceConfig,
    pub aggregation: AggregationConfig,
    pub sync: SyncConfig,
    pub scheduler: SchedulerConfig,
}

/// Logging section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive (`RUST_LOG` takes precedence)
    pub level: String,
    /// Optional log file; stderr when absent
    pub log_file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_file: None,
        }
    }
}

/// Remote music service section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Base URL of the music service API
    pub base_url: String,
    /// Catalog storefront used by catalog and chart sources
    pub storefront: String,
    /// Backend endpoint issuing the service token
    pub token_endpoint: Option<String>,
    /// Per-request network timeout
    pub request_timeout_secs: u64,
    /// Outgoing request budget
    pub requests_per_second: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.music.apple.com".to_string(),
            storefront: "us".to_string(),
            token_endpoint: None,
            request_timeout_secs: 30,
            requests_per_second: 20,
        }
    }
}

/// Aggregation thresholds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AggregationConfig {
    /// Overall cap on tracks admitted per run
    pub max_tracks: usize,
    /// Days before the range start included in the "added" query
    pub added_lead_in_days: i64,
    /// A source set larger than this is narrowed by play count
    pub narrow_above: usize,
    /// Narrowing keeps tracks played more than this many times
    pub narrow_min_plays: u32,
    /// The narrowed set is kept only if it has more entries than this
    pub narrow_keep_min: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            max_tracks: 35,
            added_lead_in_days: 45,
            narrow_above: 35,
            narrow_min_plays: 10,
            narrow_keep_min: 7,
        }
    }
}

/// Companion sync section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// EventBus capacity
    pub event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { event_capacity: 100 }
    }
}

/// Dynamic memory refresh section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub refresh_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            refresh_interval_secs: 86_400,
        }
    }
}

impl TomlConfig {
    /// Load configuration from the platform config file, falling back to
    /// defaults when the file is missing or unreadable.
    ///
    /// Environment overrides are applied on top of whatever was loaded.
    pub fn load() -> Self {
        let mut config = match default_config_path() {
            Some(path) if path.exists() => match Self::from_file(&path) {
                Ok(config) => config,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Ignoring invalid config file, using defaults");
                    Self::default()
                }
            },
            _ => Self::default(),
        };
        config.apply_env_overrides();
        config
    }

    /// Parse a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                self.root_folder = Some(PathBuf::from(path));
            }
        }
    }

    /// Root folder, falling back to the OS-dependent default
    pub fn resolved_root_folder(&self) -> PathBuf {
        self.root_folder
            .clone()
            .unwrap_or_else(default_root_folder)
    }

    /// Database path inside the resolved root folder
    pub fn database_path(&self) -> PathBuf {
        self.resolved_root_folder().join(DATABASE_FILE)
    }
}

/// Write configuration atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Platform config file path (`<config_dir>/memories/config.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("memories").join("config.toml"))
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("memories"))
        .unwrap_or_else(|| PathBuf::from("./memories_data"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = TomlConfig::default();
        assert_eq!(config.aggregation.max_tracks, 35);
        assert_eq!(config.aggregation.added_lead_in_days, 45);
        assert_eq!(config.aggregation.narrow_above, 35);
        assert_eq!(config.aggregation.narrow_min_plays, 10);
        assert_eq!(config.aggregation.narrow_keep_min, 7);
        assert_eq!(config.service.storefront, "us");
        assert!(config.service.token_endpoint.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: TomlConfig = toml::from_str(
            r#"
            [service]
            storefront = "gb"

            [aggregation]
            max_tracks = 20
            "#,
        )
        .unwrap();

        assert_eq!(config.service.storefront, "gb");
        assert_eq!(config.service.request_timeout_secs, 30);
        assert_eq!(config.aggregation.max_tracks, 20);
        assert_eq!(config.aggregation.narrow_keep_min, 7);
    }

    #[test]
    fn test_database_path_uses_root_folder() {
        let config = TomlConfig {
            root_folder: Some(PathBuf::from("/data/memories")),
            ..Default::default()
        };
        assert_eq!(config.database_path(), PathBuf::from("/data/memories/memories.db"));
    }
}
