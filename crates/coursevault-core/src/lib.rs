//! # coursevault-core
//!
//! Core library for coursevault providing:
//! - Configuration file parsing (coursevault.yaml)
//! - The shared error type
//! - Enums shared by the engine, the config file and the CLI

pub mod config;
pub mod error;
pub mod types;

pub use config::VaultConfig;
pub use error::{Error, Result};
pub use types::{JobKind, LockStatus, LogLevel, SettingLevel, Visibility};
