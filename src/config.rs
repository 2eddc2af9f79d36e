//! # Configuration Management Module
//!
//! Application settings stored in platform-appropriate locations.
//! Handles loading, saving, and providing defaults for configuration options.
//!
//! ## Settings
//! - `discoverable_timeout_secs`: Length of a requested discoverable window
//! - `discovery_duration_secs`: How long a discovery pass scans before it finishes
//! - `require_runtime_permissions`: Ask for connect/scan/advertise before use
//! - `pre_granted`: Permissions treated as granted at startup
//! - `short_notice_ms` / `long_notice_ms`: How long notices stay on screen
//!
//! ## Storage Location
//! - macOS: ~/Library/Application Support/bluelist/config.toml
//! - Linux: ~/.config/bluelist/config.toml
//! - Windows: %APPDATA%\bluelist\config.toml

use crate::error::ConfigError;
use crate::permissions::Permission;
use crate::session::NoticeLength;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub discoverable_timeout_secs: u64,
    pub discovery_duration_secs: u64,
    pub require_runtime_permissions: bool,
    pub pre_granted: Vec<Permission>,
    pub short_notice_ms: u64,
    pub long_notice_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discoverable_timeout_secs: 120,
            discovery_duration_secs: 12,
            require_runtime_permissions: true,
            pre_granted: Vec::new(),
            short_notice_ms: 2000,
            long_notice_ms: 3500,
        }
    }
}

impl Config {
    /// Get the path to the config file
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("bluelist")
            .join("config.toml")
    }

    /// Load config from the default location, creating it if missing
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load config from `path`, or create a default one there if it doesn't exist
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let config = toml::from_str(&contents).map_err(ConfigError::ParseFailed)?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.save_to(path)?;
                Ok(config)
            }
            Err(e) => Err(ConfigError::ReadFailed(e)),
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::WriteFailed)?;
        }

        let toml_string = toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)?;
        fs::write(path, toml_string).map_err(ConfigError::WriteFailed)?;

        Ok(())
    }

    pub fn discoverable_window(&self) -> Duration {
        Duration::from_secs(self.discoverable_timeout_secs)
    }

    pub fn discovery_duration(&self) -> Duration {
        Duration::from_secs(self.discovery_duration_secs)
    }

    pub fn notice_duration(&self, length: NoticeLength) -> Duration {
        match length {
            NoticeLength::Short => Duration::from_millis(self.short_notice_ms),
            NoticeLength::Long => Duration::from_millis(self.long_notice_ms),
        }
    }
}
