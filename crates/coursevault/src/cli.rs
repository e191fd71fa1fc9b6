//! CLI argument parsing with clap

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};

// Re-export command types for convenience
pub use crate::commands::backup::BackupArgs;
pub use crate::commands::inspect::InspectArgs;
pub use crate::commands::restore::RestoreArgs;
pub use crate::commands::settings::SettingsArgs;

/// coursevault - back up and restore courses
#[derive(Parser, Debug)]
#[command(name = "coursevault")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to coursevault.yaml config file
    #[arg(short, long, global = true)]
    pub config: Option<Utf8PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Back up a course into an archive
    Backup(BackupArgs),

    /// Restore a course archive into a store
    Restore(RestoreArgs),

    /// Show the manifest of an archive
    Inspect(InspectArgs),

    /// Show the backup settings of a course
    Settings(SettingsArgs),
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_backup_with_overrides() {
        let cli = Cli::try_parse_from([
            "coursevault",
            "backup",
            "--store",
            "data.json",
            "--course",
            "2",
            "--set",
            "users=0",
            "--set",
            "forum_5_included=1",
        ])
        .unwrap();

        let Commands::Backup(args) = cli.command else {
            panic!("expected backup");
        };
        assert_eq!(args.course, 2);
        assert_eq!(
            args.set,
            vec![
                ("users".to_string(), "0".to_string()),
                ("forum_5_included".to_string(), "1".to_string()),
            ]
        );
        assert!(args.output.is_none());
    }

    #[test]
    fn test_parse_rejects_malformed_override() {
        let err = Cli::try_parse_from([
            "coursevault",
            "backup",
            "--store",
            "data.json",
            "--course",
            "2",
            "--set",
            "users",
        ])
        .unwrap_err();
        assert!(err.to_string().contains("NAME=VALUE"));
    }

    #[test]
    fn test_parse_restore_with_global_flags() {
        let cli = Cli::try_parse_from([
            "coursevault",
            "restore",
            "course.tar.gz",
            "--store",
            "data.json",
            "--into-course",
            "3",
            "--no-logs",
            "-vv",
            "-c",
            "custom.yaml",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config.as_deref().map(|p| p.as_str()), Some("custom.yaml"));
        let Commands::Restore(args) = cli.command else {
            panic!("expected restore");
        };
        assert_eq!(args.archive.as_str(), "course.tar.gz");
        assert_eq!(args.into_course, Some(3));
        assert!(args.no_logs);
        assert!(!args.dry_run);
    }
}
