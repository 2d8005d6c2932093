//! # endit-config
//!
//! Configuration management for the Endit nearline storage provider.
//!
//! Loads configuration from:
//! 1. `~/.endit/config.toml` (global)
//! 2. An explicit file passed by the host or CLI (overrides global)
//! 3. Environment variables (highest priority)
//!
//! Hosts that hand over plugin arguments as key/value pairs use
//! [`Config::from_properties`] instead.

pub mod logging;
pub mod path;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

pub use logging::{init_logging, LogLevel};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Missing required property: {0}")]
    MissingProperty(&'static str),
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
    #[error("Not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderConfig,
    pub directories: DirectoryConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load config from the global location, then `explicit` (if any), then the environment
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = Config::default();

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                config = Self::from_file(&global_path)?;
            }
        }

        if let Some(path) = explicit {
            debug!("Loading config from {:?}", path);
            let other = Self::from_file(path)?;
            config.merge(other);
        }

        config.apply_env_overrides()?;

        Ok(config)
    }

    /// Parse a single TOML file without layering
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Global config path: ~/.endit/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".endit/config.toml"))
    }

    /// Build a config from host plugin arguments (`directory=/endit type=osm ...`).
    ///
    /// `directory` is required. Unknown keys belong to the host and are skipped.
    pub fn from_properties(properties: &HashMap<String, String>) -> Result<Self> {
        let mut config = Config::default();

        let base = properties
            .get("directory")
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::MissingProperty("directory"))?;
        config.directories.base = PathBuf::from(base);

        for (key, value) in properties {
            match key.as_str() {
                "directory" => {}
                "type" => config.provider.hsm_type = value.clone(),
                "name" => config.provider.name = value.clone(),
                "flush-request" => config.directories.flush_request = Some(value.into()),
                "stage-request" => config.directories.stage_request = Some(value.into()),
                "in" => config.directories.input = Some(value.into()),
                "out" => config.directories.output = Some(value.into()),
                "trash" => config.directories.trash = Some(value.into()),
                "log-level" => {
                    config.logging.level =
                        value.parse().map_err(|_| ConfigError::InvalidValue {
                            key: "log-level",
                            value: value.clone(),
                        })?
                }
                other => debug!(key = other, "Ignoring unrelated property"),
            }
        }

        Ok(config)
    }

    /// Merge another config (explicit file overrides global)
    fn merge(&mut self, other: Config) {
        let defaults = Config::default();

        if other.provider.hsm_type != defaults.provider.hsm_type {
            self.provider.hsm_type = other.provider.hsm_type;
        }
        if other.provider.name != defaults.provider.name {
            self.provider.name = other.provider.name;
        }
        let dirs = other.directories;
        if dirs.base != defaults.directories.base {
            self.directories.base = dirs.base;
        }
        self.directories.flush_request = dirs.flush_request.or(self.directories.flush_request.take());
        self.directories.stage_request = dirs.stage_request.or(self.directories.stage_request.take());
        self.directories.input = dirs.input.or(self.directories.input.take());
        self.directories.output = dirs.output.or(self.directories.output.take());
        self.directories.trash = dirs.trash.or(self.directories.trash.take());
        if other.logging.level != defaults.logging.level {
            self.logging.level = other.logging.level;
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(dir) = std::env::var("ENDIT_DIR") {
            self.directories.base = PathBuf::from(dir);
        }
        if let Ok(hsm_type) = std::env::var("ENDIT_TYPE") {
            self.provider.hsm_type = hsm_type;
        }
        if let Ok(name) = std::env::var("ENDIT_NAME") {
            self.provider.name = name;
        }
        if let Ok(level) = std::env::var("ENDIT_LOG") {
            self.logging.level = level.parse().map_err(|_| ConfigError::InvalidValue {
                key: "ENDIT_LOG",
                value: level,
            })?;
        }
        Ok(())
    }

    /// Render config as TOML
    pub fn to_toml(&self) -> std::result::Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Generate default config TOML string
    pub fn default_toml() -> std::result::Result<String, toml::ser::Error> {
        Config::default().to_toml()
    }
}

/// Identity of the tertiary storage agent, used in flush locators
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Agent type, the locator scheme (e.g. `osm`)
    #[serde(rename = "type")]
    pub hsm_type: String,
    /// Agent instance name, the locator authority
    pub name: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            hsm_type: "endit".to_string(),
            name: "endit".to_string(),
        }
    }
}

/// Directory layout shared with the agent.
///
/// Everything defaults to a subdirectory of `base`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub base: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flush_request: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_request: Option<PathBuf>,
    #[serde(rename = "in", skip_serializing_if = "Option::is_none")]
    pub input: Option<PathBuf>,
    #[serde(rename = "out", skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trash: Option<PathBuf>,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            base: PathBuf::from("/var/spool/endit"),
            flush_request: None,
            stage_request: None,
            input: None,
            output: None,
            trash: None,
        }
    }
}

impl DirectoryConfig {
    /// Resolve overrides against `base`
    pub fn resolve(&self) -> Directories {
        let base = path::expand_home(&self.base);
        let pick = |dir: &Option<PathBuf>, default: &str| match dir {
            Some(dir) => path::expand_home(dir),
            None => base.join(default),
        };
        Directories {
            flush_request: pick(&self.flush_request, "request"),
            flush_result: pick(&self.output, "out"),
            stage_request: pick(&self.stage_request, "request"),
            stage_input: pick(&self.input, "in"),
            trash: pick(&self.trash, "trash"),
        }
    }
}

/// Fully resolved directories
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directories {
    /// Flush request files, written by us
    pub flush_request: PathBuf,
    /// `<id>` and `<id>.err` written by the agent after a flush
    pub flush_result: PathBuf,
    /// Stage request files, written by us
    pub stage_request: PathBuf,
    /// Staged data and `<id>.err` written by the agent
    pub stage_input: PathBuf,
    /// Removal requests, written by us
    pub trash: PathBuf,
}

impl Directories {
    /// Lay out every role under one root
    pub fn under(base: &Path) -> Self {
        DirectoryConfig {
            base: base.to_path_buf(),
            ..Default::default()
        }
        .resolve()
    }

    /// All distinct directories
    pub fn all(&self) -> Vec<&Path> {
        let mut dirs: Vec<&Path> = Vec::with_capacity(5);
        for dir in [
            &self.flush_request,
            &self.flush_result,
            &self.stage_request,
            &self.stage_input,
            &self.trash,
        ] {
            if !dirs.contains(&dir.as_path()) {
                dirs.push(dir);
            }
        }
        dirs
    }

    /// Fail if any directory is missing
    pub fn validate(&self) -> Result<()> {
        for dir in self.all() {
            if !dir.is_dir() {
                return Err(ConfigError::NotADirectory(dir.to_path_buf()));
            }
        }
        Ok(())
    }

    /// Create any missing directory
    pub fn create_all(&self) -> Result<()> {
        for dir in self.all() {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
}
