//! coursevault CLI - course backup and restore
//!
//! This is the main entry point for the coursevault command-line interface.

mod cli;
mod commands;
mod output;

use anyhow::{Context, Result};
use clap::Parser;
use coursevault_core::VaultConfig;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Cli, Commands};

fn main() -> Result<()> {
    // Parse CLI args
    let cli = Cli::parse();

    // Initialize tracing
    init_tracing(cli.verbose, cli.quiet);

    let config = VaultConfig::load_or_default(cli.config.as_deref())
        .context("Failed to load coursevault configuration")?;
    match &config.config_path {
        Some(path) => tracing::debug!("Using configuration {}", path),
        None => tracing::debug!("Using default configuration"),
    }

    // Run command
    match cli.command {
        Commands::Backup(args) => commands::backup::run(args, &config, cli.quiet),
        Commands::Restore(args) => commands::restore::run(args, &config, cli.quiet),
        Commands::Inspect(args) => commands::inspect::run(args),
        Commands::Settings(args) => commands::settings::run(args, &config),
    }
}

/// Initialize tracing with appropriate verbosity
fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            // Job progress is logged at info
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}
