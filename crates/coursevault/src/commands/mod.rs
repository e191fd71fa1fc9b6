//! CLI command implementations

pub mod backup;
pub mod inspect;
pub mod restore;
pub mod settings;

use anyhow::{Context, Result};
use coursevault_backup::{
    BarProgress, FileLogger, LoggerChain, NullProgress, ProgressReporter, TracingLogger,
};
use coursevault_core::{LogLevel, VaultConfig};
use std::collections::BTreeMap;

/// Parse a `NAME=VALUE` setting override
pub fn parse_setting(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected NAME=VALUE, got '{}'", raw)),
    }
}

/// Config overrides first, command line overrides last
pub fn merge_overrides(
    defaults: &BTreeMap<String, String>,
    cli: &[(String, String)],
) -> BTreeMap<String, String> {
    let mut merged = defaults.clone();
    merged.extend(cli.iter().cloned());
    merged
}

/// Logger chain for a job: tracing output plus the configured log file
pub fn job_logger(config: &VaultConfig, quiet: bool) -> Result<LoggerChain> {
    let logging = config.logging();
    let mut chain = LoggerChain::new();

    let console_level = if quiet { LogLevel::Error } else { logging.level };
    chain.add_logger(Box::new(TracingLogger::new(console_level)));

    if let Some(path) = &logging.file {
        let file = FileLogger::open(logging.level, path.clone())
            .with_context(|| format!("Failed to open log file {}", path))?;
        chain.add_logger(Box::new(file));
    }

    Ok(chain)
}

pub fn job_progress(quiet: bool) -> Box<dyn ProgressReporter> {
    if quiet {
        Box::new(NullProgress)
    } else {
        Box::new(BarProgress::new())
    }
}
