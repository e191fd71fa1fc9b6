//! Record storage the engine reads from (backup) and writes to (restore).

use crate::error::{BackupError, Result};
use camino::Utf8Path;
use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;

/// One row: field name -> textual value, ordered by field name
pub type Record = BTreeMap<String, String>;

/// Build a record from field/value pairs
pub fn record<K, V, I>(fields: I) -> Record
where
    K: Into<String>,
    V: Into<String>,
    I: IntoIterator<Item = (K, V)>,
{
    fields
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Parse an integer field; a missing or empty field is a data error
pub fn field_i64(record: &Record, field: &str) -> Result<i64> {
    let raw = record
        .get(field)
        .map(String::as_str)
        .ok_or_else(|| BackupError::xml(format!("record has no '{}' field", field)))?;
    raw.trim()
        .parse()
        .map_err(|_| BackupError::xml(format!("field '{}' is not an integer: '{}'", field, raw)))
}

/// The `id` field of a record
pub fn record_id(record: &Record) -> Result<i64> {
    field_i64(record, "id")
}

/// Table-oriented row storage
pub trait RecordStore {
    /// Rows of `table` whose fields equal every filter value, ordered by id
    fn select(&self, table: &str, filter: &[(&str, &str)]) -> Result<Vec<Record>>;

    fn get(&self, table: &str, id: i64) -> Result<Option<Record>>;

    /// Insert a row under a freshly allocated id and return that id.
    /// Any `id` field in `record` is replaced.
    fn insert(&mut self, table: &str, record: Record) -> Result<i64>;

    /// Remove a row; returns whether it existed
    fn delete(&mut self, table: &str, id: i64) -> Result<bool>;

    fn find_one(&self, table: &str, field: &str, value: &str) -> Result<Option<Record>> {
        Ok(self.select(table, &[(field, value)])?.into_iter().next())
    }
}

/// In-memory store, persisted as a JSON dataset file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryStore {
    tables: BTreeMap<String, BTreeMap<i64, Record>>,
}

/// On-disk shape: table -> list of rows. Scalar JSON values are accepted
/// and stored as text.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Dataset {
    tables: BTreeMap<String, Vec<BTreeMap<String, serde_json::Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a dataset file
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let dataset: Dataset = serde_json::from_str(&content)?;

        let mut store = Self::new();
        for (table, rows) in dataset.tables {
            let entries = store.tables.entry(table.clone()).or_default();
            for row in rows {
                let record: Record = row
                    .into_iter()
                    .map(|(k, v)| {
                        let text = match v {
                            serde_json::Value::String(s) => s,
                            serde_json::Value::Null => String::new(),
                            other => other.to_string(),
                        };
                        (k, text)
                    })
                    .collect();
                let id = record_id(&record).map_err(|_| {
                    BackupError::archive(format!("row in table '{}' has no valid id", table))
                })?;
                if entries.insert(id, record).is_some() {
                    return Err(BackupError::archive(format!(
                        "duplicate id {} in table '{}'",
                        id, table
                    )));
                }
            }
        }
        Ok(store)
    }

    /// Write the dataset file while holding an exclusive lock on it
    pub fn save(&self, path: &Utf8Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let dataset = Dataset {
            tables: self
                .tables
                .iter()
                .map(|(table, rows)| {
                    let rows = rows
                        .values()
                        .map(|r| {
                            r.iter()
                                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                                .collect()
                        })
                        .collect();
                    (table.clone(), rows)
                })
                .collect(),
        };
        let json = serde_json::to_string_pretty(&dataset)?;

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;
        // Lock is released when `file` is dropped
        file.lock_exclusive()?;
        file.set_len(0)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn count(&self, table: &str) -> usize {
        self.tables.get(table).map(|t| t.len()).unwrap_or(0)
    }

    /// Insert a row keeping its own `id`; used to seed fixtures
    pub fn insert_with_id(&mut self, table: &str, record: Record) -> Result<i64> {
        let id = record_id(&record)?;
        self.tables
            .entry(table.to_string())
            .or_default()
            .insert(id, record);
        Ok(id)
    }
}

impl RecordStore for MemoryStore {
    fn select(&self, table: &str, filter: &[(&str, &str)]) -> Result<Vec<Record>> {
        let Some(rows) = self.tables.get(table) else {
            return Ok(Vec::new());
        };
        Ok(rows
            .values()
            .filter(|row| {
                filter
                    .iter()
                    .all(|(field, value)| row.get(*field).map(String::as_str) == Some(*value))
            })
            .cloned()
            .collect())
    }

    fn get(&self, table: &str, id: i64) -> Result<Option<Record>> {
        Ok(self.tables.get(table).and_then(|t| t.get(&id)).cloned())
    }

    fn insert(&mut self, table: &str, mut record: Record) -> Result<i64> {
        let rows = self.tables.entry(table.to_string()).or_default();
        let id = rows.keys().next_back().map(|last| last + 1).unwrap_or(1);
        record.insert("id".to_string(), id.to_string());
        rows.insert(id, record);
        Ok(id)
    }

    fn delete(&mut self, table: &str, id: i64) -> Result<bool> {
        Ok(self
            .tables
            .get_mut(table)
            .map(|t| t.remove(&id).is_some())
            .unwrap_or(false))
    }
}
