//! Restore command
//!
//! Connects the CLI restore UI to the coursevault-backup restore manager.

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::Args;
use coursevault_backup::{
    ArchiveReader, MemoryStore, RestoreManager, RestoreOptions, RestoreOutcome, RestoreTarget,
};
use coursevault_core::VaultConfig;

use super::{job_logger, job_progress, parse_setting};
use crate::output;

#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// Backup archive (.tar.gz)
    pub archive: Utf8PathBuf,

    /// Record store to restore into (JSON dataset)
    #[arg(short, long)]
    pub store: Utf8PathBuf,

    /// Merge into an existing course instead of creating a new one
    #[arg(long, value_name = "ID")]
    pub into_course: Option<i64>,

    /// Leave legacy log rows out
    #[arg(long)]
    pub no_logs: bool,

    /// Always insert archived users instead of matching existing usernames
    #[arg(long)]
    pub no_user_matching: bool,

    /// Override a restore setting, e.g. --set forum_5_included=0
    #[arg(long = "set", value_name = "NAME=VALUE", value_parser = parse_setting)]
    pub set: Vec<(String, String)>,

    /// Run the restore, then roll it back
    #[arg(long)]
    pub dry_run: bool,

    /// Skip confirmation prompts
    #[arg(short, long)]
    pub yes: bool,
}

impl RestoreArgs {
    fn options(&self, config: &VaultConfig) -> RestoreOptions {
        let mut options = RestoreOptions::from_config(config.restore());
        if let Some(course) = self.into_course {
            options.target = RestoreTarget::ExistingCourse(course);
        }
        if self.no_logs {
            options.restore_logs = false;
        }
        if self.no_user_matching {
            options.match_existing_users = false;
        }
        options.overrides.extend(self.set.iter().cloned());
        options.dry_run = self.dry_run;
        options
    }
}

pub fn run(args: RestoreArgs, config: &VaultConfig, quiet: bool) -> Result<()> {
    output::header("Restore Course");

    let archive = ArchiveReader::open(&args.archive)
        .with_context(|| format!("Failed to open archive {}", args.archive))?;
    let store = MemoryStore::load(&args.store)
        .with_context(|| format!("Failed to load store {}", args.store))?;
    let options = args.options(config);

    let manifest = archive.manifest();
    output::kv("Archive", args.archive.as_str());
    output::kv(
        "Created",
        &manifest.created_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    );
    output::kv("Source course", &manifest.course_id.to_string());
    output::kv("Store", args.store.as_str());
    output::kv(
        "Target",
        &match options.target {
            RestoreTarget::NewCourse => "new course".to_string(),
            RestoreTarget::ExistingCourse(id) => format!("existing course {}", id),
        },
    );
    output::kv("Logs", if options.restore_logs { "yes" } else { "no" });
    if args.dry_run {
        output::warning("DRY RUN MODE - The restore will be rolled back");
    }
    println!();

    if !confirm(&args, &options)? {
        output::info("Restore cancelled");
        return Ok(());
    }

    let run = RestoreManager::new(options).restore(
        archive,
        store,
        job_logger(config, quiet)?,
        job_progress(quiet),
    );
    let outcome = run
        .result
        .context("Restore failed, the store was left unchanged")?;

    if !outcome.dry_run {
        run.store
            .save(&args.store)
            .with_context(|| format!("Failed to save store {}", args.store))?;
    }

    print_outcome(&outcome);
    Ok(())
}

/// Merging into a live course asks first
fn confirm(args: &RestoreArgs, options: &RestoreOptions) -> Result<bool> {
    let RestoreTarget::ExistingCourse(course) = options.target else {
        return Ok(true);
    };
    if args.yes || args.dry_run || !console::user_attended() {
        return Ok(true);
    }

    use dialoguer::Confirm;
    Ok(Confirm::new()
        .with_prompt(format!("Merge the archive into course {}?", course))
        .default(false)
        .interact()?)
}

fn print_outcome(outcome: &RestoreOutcome) {
    println!();
    if outcome.dry_run {
        output::success("Dry run complete, nothing was kept");
    } else {
        output::success("Restore completed successfully");
    }
    println!();
    output::kv("Course", &outcome.course_id.to_string());
    output::kv("Id mappings", &outcome.mappings.to_string());
    for (table, count) in &outcome.stats.inserted {
        output::kv(&format!("Inserted {}", table), &count.to_string());
    }
    for (table, count) in &outcome.stats.reused {
        output::kv(&format!("Reused {}", table), &count.to_string());
    }
    for (itemtype, count) in &outcome.stats.skipped {
        output::kv(&format!("Skipped {}", itemtype), &count.to_string());
    }
    if !outcome.report.skipped.is_empty() {
        output::kv("Skipped steps", &outcome.report.skipped.join(", "));
    }
    output::kv(
        "Duration",
        &format!("{:.1}s", outcome.report.duration.as_secs_f64()),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use coursevault_core::config::VaultConfigFile;

    fn args(extra: impl FnOnce(&mut RestoreArgs)) -> RestoreArgs {
        let mut args = RestoreArgs {
            archive: "course.tar.gz".into(),
            store: "data.json".into(),
            into_course: None,
            no_logs: false,
            no_user_matching: false,
            set: Vec::new(),
            dry_run: false,
            yes: false,
        };
        extra(&mut args);
        args
    }

    fn config(file: VaultConfigFile) -> VaultConfig {
        VaultConfig {
            config: file,
            config_path: None,
        }
    }

    #[test]
    fn test_options_follow_config_defaults() {
        let mut file = VaultConfigFile::default();
        file.restore.restore_logs = false;
        let options = args(|_| {}).options(&config(file));

        assert!(!options.restore_logs);
        assert!(options.match_existing_users);
        assert_eq!(options.target, RestoreTarget::NewCourse);
        assert!(!options.dry_run);
    }

    #[test]
    fn test_flags_override_config() {
        let options = args(|a| {
            a.into_course = Some(7);
            a.no_logs = true;
            a.no_user_matching = true;
            a.dry_run = true;
            a.set = vec![("users".to_string(), "0".to_string())];
        })
        .options(&config(VaultConfigFile::default()));

        assert_eq!(options.target, RestoreTarget::ExistingCourse(7));
        assert!(!options.restore_logs);
        assert!(!options.match_existing_users);
        assert!(options.dry_run);
        assert_eq!(options.overrides["users"], "0");
    }

    #[test]
    fn test_new_course_needs_no_confirmation() {
        let args = args(|_| {});
        let options = args.options(&config(VaultConfigFile::default()));
        assert!(confirm(&args, &options).unwrap());
    }
}
