// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Core Configuration
//!
//! Settings the embedding application hands to the core at startup. Stored
//! as a JSON file next to the database.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logging::{LogConfig, LogLevel};

/// Suffix appended to the stem of a decrypted attachment file.
pub const DEFAULT_ATTACHMENT_SUFFIX: &str = "_dec";

/// Errors that can occur loading or saving the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Configuration for the message delivery core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// SQLite database file.
    pub database_path: PathBuf,

    /// Directory where downloaded and decrypted attachments are stored.
    pub attachment_dir: PathBuf,

    /// Whether new contacts want encrypted messages.
    pub encrypt_by_default: bool,

    /// Minimum log level for the default subscriber.
    pub log_level: LogLevel,

    /// Suffix for decrypted attachment files (`photo.jpg` -> `photo_dec.jpg`).
    pub attachment_suffix: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("konverse.db"),
            attachment_dir: PathBuf::from("attachments"),
            encrypt_by_default: true,
            log_level: LogLevel::Info,
            attachment_suffix: DEFAULT_ATTACHMENT_SUFFIX.to_string(),
        }
    }
}

impl CoreConfig {
    /// Creates a config rooted at `data_dir`.
    pub fn in_dir(data_dir: &Path) -> Self {
        Self {
            database_path: data_dir.join("konverse.db"),
            attachment_dir: data_dir.join("attachments"),
            ..Default::default()
        }
    }

    /// Loads the configuration from a JSON file. Missing keys take defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Writes the configuration atomically (temp file, then rename).
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let data = serde_json::to_string_pretty(self)?;
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, data)?;
        fs::rename(&temp_path, path)?;
        Ok(())
    }

    pub fn with_database_path(mut self, path: PathBuf) -> Self {
        self.database_path = path;
        self
    }

    pub fn with_attachment_dir(mut self, dir: PathBuf) -> Self {
        self.attachment_dir = dir;
        self
    }

    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    /// Disable encryption for new contacts.
    pub fn without_encryption(mut self) -> Self {
        self.encrypt_by_default = false;
        self
    }

    /// Returns the logging configuration derived from these settings.
    pub fn log_config(&self) -> LogConfig {
        LogConfig::new(self.log_level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        let config = CoreConfig::in_dir(dir.path())
            .with_log_level(LogLevel::Debug)
            .without_encryption();
        config.save(&path).unwrap();

        let loaded = CoreConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_missing_keys_use_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "log_level": "warn" }"#).unwrap();

        let loaded = CoreConfig::load(&path).unwrap();
        assert_eq!(loaded.log_level, LogLevel::Warn);
        assert_eq!(loaded.attachment_suffix, DEFAULT_ATTACHMENT_SUFFIX);
        assert!(loaded.encrypt_by_default);
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(matches!(CoreConfig::load(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let result = CoreConfig::load(&dir.path().join("absent.json"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
