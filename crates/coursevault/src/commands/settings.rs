//! Settings command

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::Args;
use coursevault_backup::{course_settings, MemoryStore, SettingTree};
use coursevault_core::VaultConfig;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use super::{merge_overrides, parse_setting};
use crate::output;

#[derive(Args, Debug)]
pub struct SettingsArgs {
    /// Record store to read from (JSON dataset)
    #[arg(short, long)]
    pub store: Utf8PathBuf,

    /// Id of the course
    #[arg(long)]
    pub course: i64,

    /// Preview an override, e.g. --set users=0
    #[arg(long = "set", value_name = "NAME=VALUE", value_parser = parse_setting)]
    pub set: Vec<(String, String)>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled, Serialize)]
struct SettingRow {
    name: String,
    level: String,
    #[tabled(rename = "type")]
    #[serde(rename = "type")]
    value_type: String,
    value: String,
    status: String,
    visibility: String,
}

pub fn run(args: SettingsArgs, config: &VaultConfig) -> Result<()> {
    let store = MemoryStore::load(&args.store)
        .with_context(|| format!("Failed to load store {}", args.store))?;

    let mut tree = course_settings(&store, args.course)
        .with_context(|| format!("Failed to build settings for course {}", args.course))?;
    let overrides = merge_overrides(&config.backup().settings, &args.set);
    tree.apply_overrides(&overrides)
        .context("Invalid setting override")?;

    let rows = setting_rows(&tree);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    output::header(&format!("Backup settings for course {}", args.course));
    let mut table = Table::new(rows);
    table.with(Style::sharp());
    println!("{}", table);

    if !overrides.is_empty() {
        output::info(&format!("{} override(s) applied", overrides.len()));
    }
    Ok(())
}

fn setting_rows(tree: &SettingTree) -> Vec<SettingRow> {
    tree.iter()
        .map(|s| SettingRow {
            name: s.name.clone(),
            level: s.level.to_string(),
            value_type: s.value_type.to_string(),
            value: s.value.to_string(),
            status: s.status.to_string(),
            visibility: s.visibility.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use coursevault_backup::{record, RecordStore};
    use std::collections::BTreeMap;

    fn store() -> MemoryStore {
        let mut store = MemoryStore::new();
        store
            .insert_with_id("course", record([("id", "2"), ("fullname", "Rust 101")]))
            .unwrap();
        store
            .insert_with_id(
                "course_modules",
                record([("id", "5"), ("course", "2"), ("modname", "forum")]),
            )
            .unwrap();
        store
    }

    #[test]
    fn test_rows_show_locks_after_overrides() {
        let store = store();
        assert!(store.get("course", 2).unwrap().is_some());

        let mut tree = course_settings(&store, 2).unwrap();
        tree.apply_overrides(&BTreeMap::from([("users".to_string(), "0".to_string())]))
            .unwrap();
        let rows = setting_rows(&tree);

        let logs = rows.iter().find(|r| r.name == "logs").unwrap();
        assert_eq!(logs.value, "0");
        assert_eq!(logs.status, tree.get("logs").unwrap().status.to_string());
        assert!(rows.iter().any(|r| r.name == "forum_5_included"));
        assert!(rows.iter().any(|r| r.name == "forum_5_userinfo"));
    }
}
