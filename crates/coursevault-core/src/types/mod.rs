//! Shared enums used by the engine, the config file and the CLI

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Severity of a job log message.
///
/// Ordered from most to least severe, so a logger configured at `Info`
/// emits every message whose level is `<= Info`. `None` disables a logger
/// and is never used as a message level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Debug,
    None,
}

impl LogLevel {
    /// Whether a logger at this level emits a message at `message_level`.
    pub fn admits(&self, message_level: LogLevel) -> bool {
        *self != LogLevel::None && message_level != LogLevel::None && message_level <= *self
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warning => "warning",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::None => "none",
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "none" | "off" => Ok(LogLevel::None),
            other => Err(Error::unknown_variant("log level", other)),
        }
    }
}

/// Where a setting lives in the backup hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingLevel {
    Root,
    Course,
    Section,
    Activity,
}

impl fmt::Display for SettingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingLevel::Root => write!(f, "root"),
            SettingLevel::Course => write!(f, "course"),
            SettingLevel::Section => write!(f, "section"),
            SettingLevel::Activity => write!(f, "activity"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Visibility::Visible => write!(f, "visible"),
            Visibility::Hidden => write!(f, "hidden"),
        }
    }
}

/// Why (if at all) a setting cannot be changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LockStatus {
    #[default]
    NotLocked,
    LockedByConfig,
    LockedByHierarchy,
    LockedByPermission,
}

impl LockStatus {
    pub fn is_locked(&self) -> bool {
        !matches!(self, LockStatus::NotLocked)
    }
}

impl fmt::Display for LockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockStatus::NotLocked => write!(f, "not-locked"),
            LockStatus::LockedByConfig => write!(f, "locked-by-config"),
            LockStatus::LockedByHierarchy => write!(f, "locked-by-hierarchy"),
            LockStatus::LockedByPermission => write!(f, "locked-by-permission"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Backup,
    Restore,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Backup => write!(f, "backup"),
            JobKind::Restore => write!(f, "restore"),
        }
    }
}
