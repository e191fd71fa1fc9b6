//! Inspect command

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::Args;
use coursevault_backup::{human_bytes, ArchiveReader, BackupManifest};
use tabled::{settings::Style, Table, Tabled};

use crate::output;

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Backup archive (.tar.gz)
    pub archive: Utf8PathBuf,

    /// Print the manifest as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct FileRow {
    path: String,
    size: String,
    sha256: String,
}

#[derive(Tabled)]
struct SettingRow {
    setting: String,
    value: String,
}

pub fn run(args: InspectArgs) -> Result<()> {
    // Opening verifies every checksum
    let archive = ArchiveReader::open(&args.archive)
        .with_context(|| format!("Failed to open archive {}", args.archive))?;
    let manifest = archive.manifest();

    if args.json {
        println!("{}", serde_json::to_string_pretty(manifest)?);
        return Ok(());
    }

    output::header("Backup Archive");
    output::kv("Archive", args.archive.as_str());
    output::kv("Format", &manifest.version);
    output::kv(
        "Created",
        &manifest.created_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    );
    output::kv("Created by", &manifest.created_by);
    output::kv("Job", &manifest.job_id);
    output::kv("Course", &manifest.course_id.to_string());
    output::kv(
        "Steps",
        &manifest
            .steps
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(", "),
    );
    output::kv(
        "Total size",
        &human_bytes(manifest.statistics.total_size_bytes),
    );
    for (itemtype, count) in &manifest.statistics.annotated {
        output::kv(&format!("Annotated {}", itemtype), &count.to_string());
    }

    output::header("Files");
    let mut files = Table::new(file_rows(manifest));
    files.with(Style::sharp());
    println!("{}", files);

    output::header("Settings");
    let mut settings = Table::new(setting_rows(manifest));
    settings.with(Style::sharp());
    println!("{}", settings);

    output::success("All checksums verified");
    Ok(())
}

fn file_rows(manifest: &BackupManifest) -> Vec<FileRow> {
    manifest
        .files
        .iter()
        .map(|(path, info)| FileRow {
            path: path.clone(),
            size: human_bytes(info.size),
            sha256: info.value.chars().take(12).collect(),
        })
        .collect()
}

fn setting_rows(manifest: &BackupManifest) -> Vec<SettingRow> {
    manifest
        .settings
        .iter()
        .map(|(name, value)| SettingRow {
            setting: name.clone(),
            value: value.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_rows_follow_manifest_order() {
        let files = BTreeMap::from([
            ("users/users.xml".to_string(), b"<users/>".to_vec()),
            ("course/course.xml".to_string(), b"<course/>".to_vec()),
        ]);
        let settings = BTreeMap::from([
            ("users".to_string(), "1".to_string()),
            ("logs".to_string(), "0".to_string()),
        ]);
        let manifest = BackupManifest::new("job", 2, settings, &files);

        let rows = file_rows(&manifest);
        assert_eq!(rows[0].path, "course/course.xml");
        assert_eq!(rows[0].size, "9 B");
        assert_eq!(rows[0].sha256.len(), 12);

        let rows = setting_rows(&manifest);
        assert_eq!(rows[0].setting, "logs");
        assert_eq!(rows[1].value, "1");
    }
}
