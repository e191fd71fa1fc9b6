//! Old id -> new id mappings collected during a restore.

use crate::error::{BackupError, Result};
use std::collections::{BTreeMap, HashMap};

/// Per-job map of (itemtype, old id) -> new id.
///
/// A mapping, once set, never changes for the rest of the job.
#[derive(Debug, Clone, Default)]
pub struct IdMappings {
    items: HashMap<String, BTreeMap<i64, i64>>,
}

impl IdMappings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `old_id` of `itemtype` became `new_id`. Setting the same
    /// mapping twice is harmless; remapping to a different id is a coding
    /// error.
    pub fn set_mapping(&mut self, itemtype: &str, old_id: i64, new_id: i64) -> Result<()> {
        let ids = self.items.entry(itemtype.to_string()).or_default();
        match ids.get(&old_id) {
            Some(&existing) if existing == new_id => Ok(()),
            Some(&existing) => Err(BackupError::coding(format!(
                "{} {} is already mapped to {}, refusing to remap to {}",
                itemtype, old_id, existing, new_id
            ))),
            None => {
                ids.insert(old_id, new_id);
                Ok(())
            }
        }
    }

    pub fn get_mappingid(&self, itemtype: &str, old_id: i64) -> Option<i64> {
        self.items.get(itemtype)?.get(&old_id).copied()
    }

    /// Like `get_mappingid` but a missing mapping is an error
    pub fn require_mappingid(&self, itemtype: &str, old_id: i64) -> Result<i64> {
        self.get_mappingid(itemtype, old_id)
            .ok_or_else(|| BackupError::missing_mapping(itemtype, old_id))
    }

    pub fn len(&self) -> usize {
        self.items.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Item types with at least one mapping, sorted
    pub fn itemtypes(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self
            .items
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(t, _)| t.as_str())
            .collect();
        types.sort_unstable();
        types
    }

    /// (old, new) pairs of one item type, by old id
    pub fn mappings_for(&self, itemtype: &str) -> Vec<(i64, i64)> {
        self.items
            .get(itemtype)
            .map(|ids| ids.iter().map(|(&o, &n)| (o, n)).collect())
            .unwrap_or_default()
    }
}
