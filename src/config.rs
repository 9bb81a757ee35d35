//! Configuration file support for rbtask.
//!
//! Settings are stored as versioned JSON. Credentials are never part of the
//! file; the profile section only names where a project lives.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::model::MaskMode;

/// Log level setting for the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Show only errors
    Error,
    /// Show errors and warnings
    Warn,
    /// Show errors, warnings, and info messages
    #[default]
    Info,
    /// Show debug-level logging
    Debug,
    /// Show all log messages including trace
    Trace,
}

impl LogLevel {
    /// Get the display name for this log level.
    pub fn name(&self) -> &'static str {
        match self {
            LogLevel::Error => "Error",
            LogLevel::Warn => "Warn",
            LogLevel::Info => "Info",
            LogLevel::Debug => "Debug",
            LogLevel::Trace => "Trace",
        }
    }

    /// One step more verbose, saturating at trace.
    pub fn more_verbose(&self) -> LogLevel {
        match self {
            LogLevel::Error => LogLevel::Warn,
            LogLevel::Warn => LogLevel::Info,
            LogLevel::Info => LogLevel::Debug,
            LogLevel::Debug | LogLevel::Trace => LogLevel::Trace,
        }
    }

    /// Convert to log crate's LevelFilter.
    pub fn to_level_filter(&self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Current configuration file format version.
/// Increment this when making breaking changes to the config format.
pub const CONFIG_VERSION: u32 = 1;

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Version of the configuration file format
    pub version: u32,

    /// General preferences
    #[serde(default)]
    pub preferences: Preferences,

    /// Export defaults
    #[serde(default)]
    pub export: ExportSettings,

    /// Platform location
    #[serde(default)]
    pub profile: Profile,
}

/// General preferences section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    /// Log verbosity level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Number of tasks converted at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_concurrency() -> usize {
    4
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            concurrency: default_concurrency(),
        }
    }
}

/// Export defaults section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSettings {
    /// Format id ("native", "coco", "png")
    #[serde(default = "default_format")]
    pub format: String,

    /// Write category class values instead of instance ids
    #[serde(default)]
    pub semantic_mask: bool,

    /// Write one file per segment
    #[serde(default)]
    pub binary_mask: bool,

    /// Write 2D masks as PNG
    #[serde(default)]
    pub png_mask: bool,

    /// Log every conversion warning, not just the count
    #[serde(default = "default_include_warnings")]
    pub include_warnings: bool,
}

fn default_format() -> String {
    "native".to_string()
}

fn default_include_warnings() -> bool {
    true
}

impl ExportSettings {
    /// Mask mode selected by the flags, binary taking precedence.
    pub fn mask_mode(&self) -> MaskMode {
        if self.binary_mask {
            MaskMode::Binary
        } else if self.semantic_mask {
            MaskMode::Semantic
        } else {
            MaskMode::Instance
        }
    }
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            format: default_format(),
            semantic_mask: false,
            binary_mask: false,
            png_mask: false,
            include_warnings: default_include_warnings(),
        }
    }
}

/// Platform location section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Base URL of the platform API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Organization id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,

    /// Project id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

impl ClientConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self {
            version: CONFIG_VERSION,
            preferences: Preferences::default(),
            export: ExportSettings::default(),
            profile: Profile::default(),
        }
    }

    /// Serialize the configuration to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;

        if config.version > CONFIG_VERSION {
            return Err(ConfigError::VersionTooNew {
                file_version: config.version,
                supported_version: CONFIG_VERSION,
            });
        }
        if config.preferences.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "preferences.concurrency must be at least 1".to_string(),
            ));
        }

        Ok(config)
    }

    /// Get the default config file name.
    pub fn default_filename() -> &'static str {
        "rbtask.json"
    }

    /// Get the default config file path.
    pub fn default_path() -> Option<PathBuf> {
        // Try to use XDG config directory, fall back to home directory
        if let Some(config_dir) = dirs::config_dir() {
            Some(config_dir.join("rbtask").join(Self::default_filename()))
        } else {
            dirs::home_dir().map(|home_dir| {
                home_dir
                    .join(".config")
                    .join("rbtask")
                    .join(Self::default_filename())
            })
        }
    }

    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json(&json)?;
        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Try to load configuration from the default path.
    /// Returns None if the file doesn't exist or can't be read.
    pub fn load_from_default_path() -> Option<Self> {
        let path = Self::default_path()?;
        if !path.exists() {
            log::debug!("No config file found at {:?}", path);
            return None;
        }

        match Self::load(&path) {
            Ok(config) => Some(config),
            Err(e) => {
                log::warn!("Failed to load config file {:?}: {}", path, e);
                None
            }
        }
    }

    /// Save configuration to a file, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Save configuration to the default path.
    pub fn save_to_default_path(&self) -> Result<(), ConfigError> {
        let path = Self::default_path().ok_or_else(|| {
            ConfigError::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not determine config directory",
            ))
        })?;
        self.save(&path)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] serde_json::Error),

    /// Configuration version is newer than supported
    #[error(
        "Configuration file version {file_version} is newer than supported version {supported_version}"
    )]
    VersionTooNew {
        file_version: u32,
        supported_version: u32,
    },

    /// A setting is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// I/O error when reading/writing config
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config = ClientConfig::from_json(r#"{"version": 1}"#).unwrap();
        assert_eq!(config, ClientConfig::new());
        assert_eq!(config.export.format, "native");
        assert_eq!(config.export.mask_mode(), MaskMode::Instance);
    }

    #[test]
    fn test_version_too_new() {
        let err = ClientConfig::from_json(r#"{"version": 99}"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::VersionTooNew {
                file_version: 99,
                ..
            }
        ));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = ClientConfig::from_json(r#"{"version": 1, "preferences": {"concurrency": 0}}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("rbtask.json");
        let mut config = ClientConfig::new();
        config.preferences.log_level = LogLevel::Debug;
        config.export.binary_mask = true;
        config.export.semantic_mask = true;
        config.profile.project_id = Some("proj-1".into());
        config.save(&path).unwrap();

        let loaded = ClientConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.export.mask_mode(), MaskMode::Binary);
        assert!(!std::fs::read_to_string(&path).unwrap().contains("url"));
    }

    #[test]
    fn test_log_level_names() {
        assert_eq!(LogLevel::Warn.more_verbose(), LogLevel::Info);
        assert_eq!(LogLevel::Trace.more_verbose(), LogLevel::Trace);
        assert_eq!(LogLevel::Debug.to_level_filter(), log::LevelFilter::Debug);
        assert_eq!(
            serde_json::to_string(&LogLevel::Trace).unwrap(),
            "\"trace\""
        );
    }
}
