//! Configuration management for the KeyDrive command-line tool.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/keydrive/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::drive::{DriveOptions, DEFAULT_CHUNK_SIZE};

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("chunk_size must be between 1 and {max} bytes, got {got}")]
    InvalidChunkSize { got: usize, max: usize },

    #[error("database path must not be empty for the sqlite backend")]
    EmptyDatabasePath,

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Largest accepted transfer chunk (16MB).
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Main configuration structure for the KeyDrive tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General settings.
    pub drive: GeneralConfig,

    /// Storage backend selection.
    pub storage: StorageConfig,

    /// Stat sidecar behaviour.
    pub stat: StatConfig,

    /// Content transfer settings.
    pub transfer: TransferConfig,
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory holding drive databases.
    pub data_dir: PathBuf,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Which storage backend a drive uses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Sqlite,
    Memory,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: Backend,

    /// Database file, relative paths resolve against `data_dir`.
    pub database: PathBuf,
}

/// Stat sidecar configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StatConfig {
    /// Record an access event on every read.
    pub track_access_time: bool,
}

/// Content transfer configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransferConfig {
    /// Bytes per chunk when streaming content (default: 64KB).
    pub chunk_size: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Sqlite,
            database: PathBuf::from("drive.db"),
        }
    }
}

impl Default for StatConfig {
    fn default() -> Self {
        Self {
            track_access_time: true,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("keydrive")
        .join("config.toml")
}

/// Returns the default data directory path.
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("keydrive")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - KEYDRIVE_DATA_DIR: Override the data directory
    /// - KEYDRIVE_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("KEYDRIVE_DATA_DIR") {
            if !dir.is_empty() {
                tracing::info!("Overriding data_dir from environment: {}", dir);
                self.drive.data_dir = PathBuf::from(dir);
            }
        }

        if let Ok(level) = std::env::var("KEYDRIVE_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.drive.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let chunk_size = self.transfer.chunk_size;
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(ConfigError::InvalidChunkSize {
                got: chunk_size,
                max: MAX_CHUNK_SIZE,
            });
        }

        if self.storage.backend == Backend::Sqlite && self.storage.database.as_os_str().is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }

        let level = self.drive.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.drive.log_level.clone()));
        }

        Ok(())
    }

    /// Location of the drive database.
    pub fn database_path(&self) -> PathBuf {
        if self.storage.database.is_absolute() {
            self.storage.database.clone()
        } else {
            self.drive.data_dir.join(&self.storage.database)
        }
    }

    /// Drive options derived from this configuration.
    pub fn drive_options(&self) -> DriveOptions {
        DriveOptions {
            track_access_time: self.stat.track_access_time,
            chunk_size: self.transfer.chunk_size,
        }
    }

    /// Read the drive configuration at `path`.
    ///
    /// A missing file yields the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!(path = %path.display(), "No drive config, using defaults");
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Cannot read drive config {}", path.display()))?;

        Self::from_toml(&contents).with_context(|| format!("Bad drive config {}", path.display()))
    }

    /// Read the drive configuration from [`default_config_path`].
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse a drive configuration. Sections left out keep their defaults.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| {
            anyhow::anyhow!("drive config rejected: {}", describe_toml_error(toml_str, &e))
        })
    }

    /// Write the configuration to `path`, creating its directory.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Cannot create config directory {}", dir.display()))?;
        }

        fs::write(path, self.to_toml()?)
            .with_context(|| format!("Cannot write drive config {}", path.display()))?;

        tracing::debug!(path = %path.display(), "Drive config written");
        Ok(())
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Cannot render drive config as TOML")
    }
}

/// Error message with the 1-based line and column it points at.
fn describe_toml_error(source: &str, error: &toml::de::Error) -> String {
    let message = error.message().trim_end().to_string();
    let Some(span) = error.span() else {
        return message;
    };

    let before = source.get(..span.start).unwrap_or(source);
    let line = before.matches('\n').count() + 1;
    let column = before.rsplit('\n').next().map_or(0, |l| l.chars().count()) + 1;
    format!("{} (line {}, column {})", message, line, column)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.drive.log_level, "info");
        assert!(config.drive.data_dir.to_string_lossy().contains("keydrive"));
        assert_eq!(config.storage.backend, Backend::Sqlite);
        assert_eq!(config.storage.database, PathBuf::from("drive.db"));
        assert!(config.stat.track_access_time);
        assert_eq!(config.transfer.chunk_size, 64 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_empty() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
[storage]
backend = "memory"

[stat]
track_access_time = false
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.storage.backend, Backend::Memory);
        assert!(!config.stat.track_access_time);
        assert_eq!(config.drive.log_level, "info");
        assert_eq!(config.transfer.chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_from_toml_invalid() {
        let err = Config::from_toml("[storage]\nbackend = \"floppy\"").unwrap_err();
        assert!(err.to_string().contains("drive config rejected"));

        let err = Config::from_toml("[drive]\nlog_level = \n").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("line 2"), "{message}");

        assert!(Config::from_toml("not toml at all [").is_err());
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        config.transfer.chunk_size = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidChunkSize {
                got: 0,
                max: MAX_CHUNK_SIZE
            })
        );

        let mut config = Config::default();
        config.drive.log_level = "loud".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("loud".to_string()))
        );

        let mut config = Config::default();
        config.storage.database = PathBuf::new();
        assert_eq!(config.validate(), Err(ConfigError::EmptyDatabasePath));
        config.storage.backend = Backend::Memory;
        assert!(config.validate().is_ok());

        let mut config = Config::default();
        config.drive.log_level = "DEBUG".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_database_path() {
        let mut config = Config::default();
        config.drive.data_dir = PathBuf::from("/var/lib/keydrive");
        assert_eq!(
            config.database_path(),
            PathBuf::from("/var/lib/keydrive/drive.db")
        );

        config.storage.database = PathBuf::from("/tmp/other.db");
        assert_eq!(config.database_path(), PathBuf::from("/tmp/other.db"));
    }

    #[test]
    fn test_drive_options() {
        let mut config = Config::default();
        config.stat.track_access_time = false;
        config.transfer.chunk_size = 1024;

        let options = config.drive_options();
        assert!(!options.track_access_time);
        assert_eq!(options.chunk_size, 1024);
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.drive.log_level = "debug".to_string();
        config.storage.backend = Backend::Memory;
        config.transfer.chunk_size = 4096;

        config.save(&config_path).unwrap();
        assert!(config_path.exists());

        let loaded = Config::load(&config_path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load(temp_dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("KEYDRIVE_LOG_LEVEL", "trace");
        std::env::set_var("KEYDRIVE_DATA_DIR", "/srv/keydrive");

        let mut config = Config::default();
        config.apply_env_overrides();

        std::env::remove_var("KEYDRIVE_LOG_LEVEL");
        std::env::remove_var("KEYDRIVE_DATA_DIR");

        assert_eq!(config.drive.log_level, "trace");
        assert_eq!(config.drive.data_dir, PathBuf::from("/srv/keydrive"));
    }

    #[test]
    #[serial]
    fn test_env_overrides_ignore_empty() {
        std::env::set_var("KEYDRIVE_LOG_LEVEL", "");

        let mut config = Config::default();
        config.apply_env_overrides();

        std::env::remove_var("KEYDRIVE_LOG_LEVEL");

        assert_eq!(config.drive.log_level, "info");
    }
}
