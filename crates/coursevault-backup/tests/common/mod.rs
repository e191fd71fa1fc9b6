//! Common test utilities for coursevault-backup
//!
//! Provides a seeded record store with two courses and helpers to back a
//! course up and read the result back as an archive.

#![allow(dead_code)]

use camino::Utf8PathBuf;
use coursevault_backup::{
    backup_controller, record, ArchiveBuilder, ArchiveReader, BackupOutput, MemoryStore, Record,
    RecordStore,
};
use std::collections::BTreeMap;
use tempfile::TempDir;

/// Course every test backs up
pub const COURSE_ID: i64 = 2;

/// Course 2 with two sections, a forum with two entries and a page; course
/// 3 next to it. User 43 only appears in the logs of course 2; user 42 only
/// in course 3.
pub fn seeded_store() -> MemoryStore {
    let mut store = MemoryStore::new();
    let mut seed = |table: &str, fields: &[(&str, &str)]| {
        store
            .insert_with_id(table, record(fields.iter().copied()))
            .unwrap();
    };

    seed(
        "course",
        &[
            ("id", "2"),
            ("fullname", "Rust 101"),
            ("shortname", "rust101"),
            ("summary", "Learn <Rust> & build"),
        ],
    );
    seed(
        "course",
        &[("id", "3"), ("fullname", "Other"), ("shortname", "other"), ("summary", "")],
    );

    for (id, course, section, name) in [
        ("10", "2", "0", "General"),
        ("11", "2", "1", "Week 1"),
        ("12", "3", "0", "General"),
    ] {
        seed(
            "course_sections",
            &[("id", id), ("course", course), ("section", section), ("name", name), ("summary", "")],
        );
    }

    for (id, course, section, modname, name) in [
        ("5", "2", "10", "forum", "News"),
        ("6", "2", "11", "page", "Reading"),
        ("7", "3", "12", "quiz", "Quiz"),
    ] {
        seed(
            "course_modules",
            &[
                ("id", id),
                ("course", course),
                ("section", section),
                ("modname", modname),
                ("name", name),
                ("intro", ""),
            ],
        );
    }

    for (id, activity, userid, content) in [
        ("30", "5", "40", "Hello"),
        ("31", "5", "41", "Hi there"),
        ("32", "7", "42", "Other course"),
    ] {
        seed(
            "activity_entries",
            &[
                ("id", id),
                ("activity", activity),
                ("userid", userid),
                ("content", content),
                ("timecreated", "1700000000"),
            ],
        );
    }

    for (id, username, firstname) in [
        ("40", "ada", "Ada"),
        ("41", "grace", "Grace"),
        ("42", "linus", "Linus"),
        ("43", "ken", "Ken"),
    ] {
        seed(
            "user",
            &[
                ("id", id),
                ("username", username),
                ("firstname", firstname),
                ("lastname", "Test"),
                ("email", ""),
            ],
        );
    }

    for (id, course, userid, module, action, cmid, url, info) in [
        ("100", "2", "43", "course", "view", "0", "view.php?id=2", "2"),
        ("101", "2", "40", "forum", "view", "5", "view.php?id=5", "5"),
        ("102", "2", "41", "forum", "add entry", "5", "view.php?id=5", "31"),
        ("103", "2", "40", "page", "delete", "6", "x", "y"),
        ("104", "3", "42", "quiz", "view", "7", "view.php?id=7", "7"),
    ] {
        seed(
            "log",
            &[
                ("id", id),
                ("time", "1700000100"),
                ("userid", userid),
                ("course", course),
                ("module", module),
                ("action", action),
                ("cmid", cmid),
                ("url", url),
                ("info", info),
            ],
        );
    }

    store
}

/// Back up course 2 of `store` with the given setting overrides
pub fn backup_course(store: MemoryStore, overrides: &[(&str, &str)]) -> (MemoryStore, BackupOutput) {
    let overrides: BTreeMap<String, String> = overrides
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let mut controller = backup_controller(store, COURSE_ID, &overrides).unwrap();
    let output = controller.execute().unwrap();
    (controller.into_store(), output)
}

/// Write the backup to a temporary archive file and read it back
pub fn through_archive(output: &BackupOutput) -> (ArchiveReader, TempDir) {
    let temp = TempDir::new().unwrap();
    let path = Utf8PathBuf::from_path_buf(temp.path().join("course.tar.gz")).unwrap();
    ArchiveBuilder::default()
        .write(&output.files, &output.manifest, &path)
        .unwrap();
    (ArchiveReader::open(&path).unwrap(), temp)
}

/// Rows of `table` whose `field` equals `value`
pub fn rows_where(store: &MemoryStore, table: &str, field: &str, value: &str) -> Vec<Record> {
    store.select(table, &[(field, value)]).unwrap()
}

/// The single row of `table` whose `field` equals `value`
pub fn row_where(store: &MemoryStore, table: &str, field: &str, value: &str) -> Record {
    let rows = rows_where(store, table, field, value);
    assert_eq!(rows.len(), 1, "expected one {} row with {}={}", table, field, value);
    rows.into_iter().next().unwrap()
}
