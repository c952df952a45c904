//! Host configuration.
//!
//! Loaded from a TOML file, then overlaid with `ISOHOST_*` environment
//! variables.

use std::path::{Path, PathBuf};

use isohost_sdk::{EnumFallback, TypeDescriptor};
use serde::{Deserialize, Serialize};

use crate::plugin_loader::StreamMode;
use crate::scanner::ScanOptions;

/// Default values
pub mod defaults {
    pub const FILE_TYPES: &[&str] = crate::scanner::DEFAULT_FILE_TYPES;
    pub const EXCLUDED_DIRS: &[&str] = crate::scanner::DEFAULT_EXCLUDED_DIRS;
    pub const HOST_FRAMEWORK: &str = isohost_sdk::HOST_FRAMEWORK;
    /// Plugins built for a compatible runtime load with a warning.
    pub const IGNORE_PLATFORM_INCONSISTENCIES: bool = true;
}

/// Environment variable names
pub mod env_vars {
    pub const PLUGIN_ROOT: &str = "ISOHOST_PLUGIN_ROOT";
    /// Comma-separated glob patterns.
    pub const FILE_TYPES: &str = "ISOHOST_FILE_TYPES";
    pub const HOST_FRAMEWORK: &str = "ISOHOST_HOST_FRAMEWORK";
    pub const IGNORE_PLATFORM: &str = "ISOHOST_IGNORE_PLATFORM";
    /// `fail_fast` or `best_effort`.
    pub const STREAM_MODE: &str = "ISOHOST_STREAM_MODE";
    /// `numeric` or `strict`.
    pub const ENUM_FALLBACK: &str = "ISOHOST_ENUM_FALLBACK";
    pub const LOG_JSON: &str = "ISOHOST_LOG_JSON";
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {key}: `{value}`")]
    InvalidEnv { key: &'static str, value: String },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Absolute directory scanned for plugins.
    pub plugin_root: Option<PathBuf>,
    pub file_types: Vec<String>,
    pub excluded_dirs: Vec<String>,
    pub host_framework: String,
    pub ignore_platform_inconsistencies: bool,
    pub stream_mode: StreamMode,
    pub enum_fallback: EnumFallback,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            plugin_root: None,
            file_types: defaults::FILE_TYPES.iter().map(|s| s.to_string()).collect(),
            excluded_dirs: defaults::EXCLUDED_DIRS.iter().map(|s| s.to_string()).collect(),
            host_framework: defaults::HOST_FRAMEWORK.to_string(),
            ignore_platform_inconsistencies: defaults::IGNORE_PLATFORM_INCONSISTENCIES,
            stream_mode: StreamMode::default(),
            enum_fallback: EnumFallback::default(),
        }
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            key,
            value: value.to_string(),
        }),
    }
}

impl HostConfig {
    /// Read `path`, overlay the environment and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: HostConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Overlay values produced by `lookup`, keyed by [`env_vars`] names.
    pub fn apply_env_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(root) = lookup(env_vars::PLUGIN_ROOT) {
            self.plugin_root = Some(PathBuf::from(root));
        }
        if let Some(types) = lookup(env_vars::FILE_TYPES) {
            self.file_types = types
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(framework) = lookup(env_vars::HOST_FRAMEWORK) {
            self.host_framework = framework;
        }
        if let Some(value) = lookup(env_vars::IGNORE_PLATFORM) {
            self.ignore_platform_inconsistencies = parse_bool(env_vars::IGNORE_PLATFORM, &value)?;
        }
        if let Some(value) = lookup(env_vars::STREAM_MODE) {
            self.stream_mode = match value.trim() {
                "fail_fast" => StreamMode::FailFast,
                "best_effort" => StreamMode::BestEffort,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        key: env_vars::STREAM_MODE,
                        value,
                    })
                }
            };
        }
        if let Some(value) = lookup(env_vars::ENUM_FALLBACK) {
            self.enum_fallback = match value.trim() {
                "numeric" => EnumFallback::Numeric,
                "strict" => EnumFallback::Strict,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        key: env_vars::ENUM_FALLBACK,
                        value,
                    })
                }
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(root) = &self.plugin_root {
            if !root.is_absolute() {
                return Err(ConfigError::Invalid(format!(
                    "plugin_root must be absolute: {}",
                    root.display()
                )));
            }
        }
        if self.file_types.is_empty() {
            return Err(ConfigError::Invalid("file_types is empty".to_string()));
        }
        if self.host_framework.trim().is_empty() {
            return Err(ConfigError::Invalid("host_framework is empty".to_string()));
        }
        Ok(())
    }

    /// Scan options for `contract` under `root` with this config's patterns.
    pub fn scan_options(&self, root: impl Into<PathBuf>, contract: TypeDescriptor) -> ScanOptions {
        ScanOptions::new(root, contract)
            .with_file_types(self.file_types.iter().cloned())
            .with_excluded_dirs(self.excluded_dirs.iter().cloned())
    }
}
