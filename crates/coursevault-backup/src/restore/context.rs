//! State shared by the steps of one restore

use super::mapping::IdMappings;
use super::transaction::RestoreTransaction;
use crate::error::Result;
use crate::plan::JobContext;
use crate::settings::SettingTree;
use crate::store::{Record, RecordStore};
use coursevault_core::JobKind;
use std::collections::{BTreeMap, BTreeSet};

/// Where the restored course ends up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestoreTarget {
    /// Create a new course
    #[default]
    NewCourse,
    /// Merge into an existing course
    ExistingCourse(i64),
}

/// Row counts per table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreStats {
    pub inserted: BTreeMap<String, usize>,
    pub reused: BTreeMap<String, usize>,
    /// Elements left out, keyed by item type
    pub skipped: BTreeMap<String, usize>,
}

impl RestoreStats {
    pub fn inserted(&self, table: &str) -> usize {
        self.inserted.get(table).copied().unwrap_or(0)
    }

    pub fn skipped(&self, itemtype: &str) -> usize {
        self.skipped.get(itemtype).copied().unwrap_or(0)
    }
}

pub struct RestoreContext<S: RecordStore> {
    pub store: S,
    pub settings: SettingTree,
    pub mappings: IdMappings,
    pub transaction: RestoreTransaction,
    pub target: RestoreTarget,
    /// Id of the course being restored into, known once the course step ran
    pub course_id: Option<i64>,
    pub stats: RestoreStats,
    files: BTreeMap<String, Vec<u8>>,
    excluded: BTreeMap<String, BTreeSet<i64>>,
}

impl<S: RecordStore> RestoreContext<S> {
    pub fn new(
        store: S,
        files: BTreeMap<String, Vec<u8>>,
        settings: SettingTree,
        target: RestoreTarget,
    ) -> Self {
        Self {
            store,
            settings,
            mappings: IdMappings::new(),
            transaction: RestoreTransaction::begin(),
            target,
            course_id: None,
            stats: RestoreStats::default(),
            files,
            excluded: BTreeMap::new(),
        }
    }

    /// Contents of an archive file
    pub fn file(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    /// Insert a row and journal it
    pub fn insert(&mut self, table: &str, record: Record) -> Result<i64> {
        let id = self.store.insert(table, record)?;
        self.transaction.record_row_inserted(table, id);
        *self.stats.inserted.entry(table.to_string()).or_default() += 1;
        Ok(id)
    }

    /// Journal that an existing row stands in for a restored one
    pub fn reuse(&mut self, table: &str, id: i64) {
        self.transaction.record_row_reused(table, id);
        *self.stats.reused.entry(table.to_string()).or_default() += 1;
    }

    /// Leave an element out of the restore; children of excluded elements
    /// are left out too
    pub fn exclude(&mut self, itemtype: &str, old_id: i64) {
        self.excluded
            .entry(itemtype.to_string())
            .or_default()
            .insert(old_id);
        *self.stats.skipped.entry(itemtype.to_string()).or_default() += 1;
    }

    pub fn is_excluded(&self, itemtype: &str, old_id: i64) -> bool {
        self.excluded
            .get(itemtype)
            .is_some_and(|ids| ids.contains(&old_id))
    }

    /// Count an element dropped without tracking its id
    pub fn skip(&mut self, itemtype: &str) {
        *self.stats.skipped.entry(itemtype.to_string()).or_default() += 1;
    }

    /// Undo every journaled insert
    pub fn rollback(&mut self) -> Result<usize> {
        self.transaction.rollback(&mut self.store)
    }

    pub fn into_store(self) -> S {
        self.store
    }
}

impl<S: RecordStore> JobContext for RestoreContext<S> {
    fn kind(&self) -> JobKind {
        JobKind::Restore
    }

    fn settings(&self) -> &SettingTree {
        &self.settings
    }

    fn settings_mut(&mut self) -> &mut SettingTree {
        &mut self.settings
    }
}
