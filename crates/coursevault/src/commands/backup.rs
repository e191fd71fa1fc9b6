//! Backup command

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::Args;
use coursevault_backup::{backup_controller, human_bytes, ArchiveBuilder, MemoryStore};
use coursevault_core::VaultConfig;

use super::{job_logger, job_progress, merge_overrides, parse_setting};
use crate::output;

#[derive(Args, Debug)]
pub struct BackupArgs {
    /// Record store to read from (JSON dataset)
    #[arg(short, long)]
    pub store: Utf8PathBuf,

    /// Id of the course to back up
    #[arg(long)]
    pub course: i64,

    /// Archive to write (default: course-<id>-<timestamp>.tar.gz)
    #[arg(short, long)]
    pub output: Option<Utf8PathBuf>,

    /// Override a backup setting, e.g. --set users=0
    #[arg(long = "set", value_name = "NAME=VALUE", value_parser = parse_setting)]
    pub set: Vec<(String, String)>,

    /// Run the backup but do not write the archive
    #[arg(long)]
    pub dry_run: bool,
}

pub fn run(args: BackupArgs, config: &VaultConfig, quiet: bool) -> Result<()> {
    output::header("Backup Course");

    let store = MemoryStore::load(&args.store)
        .with_context(|| format!("Failed to load store {}", args.store))?;
    let overrides = merge_overrides(&config.backup().settings, &args.set);

    let output_path = args.output.clone().unwrap_or_else(|| {
        let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        Utf8PathBuf::from(format!("course-{}-{}.tar.gz", args.course, timestamp))
    });

    output::kv("Store", args.store.as_str());
    output::kv("Course", &args.course.to_string());
    output::kv("Output", output_path.as_str());
    for (name, value) in &overrides {
        output::kv("Setting", &format!("{}={}", name, value));
    }
    if args.dry_run {
        output::warning("DRY RUN MODE - No archive will be written");
    }
    println!();

    let mut controller = backup_controller(store, args.course, &overrides)
        .context("Failed to prepare backup")?
        .with_logger(job_logger(config, quiet)?)
        .with_progress(job_progress(quiet));
    let backup = controller.execute().context("Backup failed")?;

    if args.dry_run {
        output::info("Files that would be written:");
        for (path, bytes) in &backup.files {
            println!(
                "  {} ({})",
                console::style(path).cyan(),
                human_bytes(bytes.len() as u64)
            );
        }
        if !backup.report.skipped.is_empty() {
            output::kv("Skipped steps", &backup.report.skipped.join(", "));
        }
        println!();
        output::success("Dry run complete");
        return Ok(());
    }

    let summary = ArchiveBuilder::new(config.backup().compression_level)
        .write(&backup.files, &backup.manifest, &output_path)
        .with_context(|| format!("Failed to write archive {}", output_path))?;

    println!();
    output::success("Backup created successfully");
    println!();
    output::kv("Location", summary.archive_path.as_str());
    output::kv("Files", &summary.file_count.to_string());
    output::kv("Size", &human_bytes(summary.size_bytes));
    for (itemtype, count) in &backup.manifest.statistics.annotated {
        output::kv(&format!("Annotated {}", itemtype), &count.to_string());
    }
    if !backup.report.skipped.is_empty() {
        output::kv("Skipped steps", &backup.report.skipped.join(", "));
    }
    output::kv("Duration", &format!("{:.1}s", backup.report.duration.as_secs_f64()));
    println!();

    output::info("Restore with:");
    println!("  coursevault restore {} --store {}", summary.archive_path, args.store);

    Ok(())
}
