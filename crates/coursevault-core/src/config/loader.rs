//! Configuration file loading and parsing

use crate::error::{Error, Result};
use crate::types::LogLevel;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;

/// Configuration file names to search for
const CONFIG_FILE_NAMES: &[&str] = &["coursevault.yaml", "coursevault.yml"];

/// Default gzip level for archives
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Parsed `coursevault.yaml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct VaultConfigFile {
    pub backup: BackupDefaults,
    pub restore: RestoreDefaults,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BackupDefaults {
    /// gzip level, clamped to 1-9
    pub compression_level: u32,

    /// Setting overrides applied to every backup before it executes
    pub settings: BTreeMap<String, String>,
}

impl Default for BackupDefaults {
    fn default() -> Self {
        Self {
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            settings: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RestoreDefaults {
    /// Restore legacy log rows through the log rules
    pub restore_logs: bool,

    /// Map archived users onto existing users with the same username
    pub match_existing_users: bool,
}

impl Default for RestoreDefaults {
    fn default() -> Self {
        Self {
            restore_logs: true,
            match_existing_users: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LoggingConfig {
    pub level: LogLevel,

    /// Optional job log file appended to by every job
    pub file: Option<Utf8PathBuf>,
}

/// Loaded configuration
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// The parsed configuration
    pub config: VaultConfigFile,

    /// Path to the configuration file, if one was found
    pub config_path: Option<Utf8PathBuf>,
}

impl VaultConfig {
    /// Load configuration from the specified path or search for it
    pub fn load(path: Option<&Utf8Path>) -> Result<Self> {
        let (config_path, content) = match path {
            Some(p) => {
                let content = fs::read_to_string(p).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        Error::config_not_found(p.as_str())
                    } else {
                        Error::Io(e)
                    }
                })?;
                (p.to_owned(), content)
            }
            None => Self::find_config()?,
        };

        let mut config: VaultConfigFile = if content.trim().is_empty() {
            VaultConfigFile::default()
        } else {
            serde_yaml_ng::from_str(&content)?
        };
        config.backup.compression_level = config.backup.compression_level.clamp(1, 9);

        let config = Self::apply_env_overrides(config)?;

        tracing::debug!("Loaded configuration from {}", config_path);

        Ok(Self {
            config,
            config_path: Some(config_path),
        })
    }

    /// Load configuration, falling back to defaults when no file exists.
    ///
    /// Parse errors are still reported.
    pub fn load_or_default(path: Option<&Utf8Path>) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e) if e.is_not_found() => {
                tracing::debug!("No configuration file found, using defaults");
                Ok(Self {
                    config: Self::apply_env_overrides(VaultConfigFile::default())?,
                    config_path: None,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Find configuration file in current or parent directories
    fn find_config() -> Result<(Utf8PathBuf, String)> {
        let cwd = env::current_dir().map_err(Error::Io)?;
        let cwd = Utf8PathBuf::try_from(cwd)
            .map_err(|_| Error::invalid_config("Current directory path is not valid UTF-8"))?;

        let mut current = cwd.as_path();

        loop {
            for name in CONFIG_FILE_NAMES {
                let path = current.join(name);
                if path.exists() {
                    let content = fs::read_to_string(&path)?;
                    return Ok((path, content));
                }
            }

            match current.parent() {
                Some(parent) => current = parent,
                None => break,
            }
        }

        Err(Error::config_not_found(
            "coursevault.yaml (searched current and parent directories)",
        ))
    }

    /// Apply COURSEVAULT_* environment variable overrides
    fn apply_env_overrides(mut config: VaultConfigFile) -> Result<VaultConfigFile> {
        if let Ok(val) = env::var("COURSEVAULT_COMPRESSION_LEVEL") {
            let level: u32 = val.parse().map_err(|_| {
                Error::invalid_config("COURSEVAULT_COMPRESSION_LEVEL must be a valid number")
            })?;
            config.backup.compression_level = level.clamp(1, 9);
        }

        if let Ok(val) = env::var("COURSEVAULT_LOG_LEVEL") {
            config.logging.level = val.parse().map_err(|_| {
                Error::invalid_config(format!(
                    "COURSEVAULT_LOG_LEVEL must be error, warning, info, debug or none (got {})",
                    val
                ))
            })?;
        }

        if let Ok(val) = env::var("COURSEVAULT_LOG_FILE") {
            config.logging.file = if val.is_empty() {
                None
            } else {
                Some(Utf8PathBuf::from(val))
            };
        }

        Ok(config)
    }

    pub fn backup(&self) -> &BackupDefaults {
        &self.config.backup
    }

    pub fn restore(&self) -> &RestoreDefaults {
        &self.config.restore
    }

    pub fn logging(&self) -> &LoggingConfig {
        &self.config.logging
    }
}
