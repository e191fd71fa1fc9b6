//! Configuration loading and management

mod loader;

pub use loader::{
    BackupDefaults, LoggingConfig, RestoreDefaults, VaultConfig, VaultConfigFile,
    DEFAULT_COMPRESSION_LEVEL,
};
