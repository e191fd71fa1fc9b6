//! Restore transaction: a journal of store writes that can be undone

use crate::error::{BackupError, Result};
use crate::store::RecordStore;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreChange {
    /// A row the restore created
    RowInserted { table: String, id: i64 },
    /// An existing row the restore mapped onto; left alone on rollback
    RowReused { table: String, id: i64 },
}

#[derive(Debug)]
pub struct RestoreTransaction {
    pub id: String,
    changes: Vec<RestoreChange>,
    committed: bool,
    rolled_back: bool,
}

impl Default for RestoreTransaction {
    fn default() -> Self {
        Self::begin()
    }
}

impl RestoreTransaction {
    pub fn begin() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            changes: Vec::new(),
            committed: false,
            rolled_back: false,
        }
    }

    pub fn record_row_inserted(&mut self, table: &str, id: i64) {
        self.changes.push(RestoreChange::RowInserted {
            table: table.to_string(),
            id,
        });
    }

    pub fn record_row_reused(&mut self, table: &str, id: i64) {
        self.changes.push(RestoreChange::RowReused {
            table: table.to_string(),
            id,
        });
    }

    pub fn commit(&mut self) -> Result<()> {
        if self.rolled_back {
            return Err(BackupError::coding("cannot commit a rolled back transaction"));
        }
        info!("Committing restore transaction {}", self.id);
        self.committed = true;
        Ok(())
    }

    /// Delete every inserted row, newest first. Returns the number of rows
    /// removed. Rows that are already gone, or whose delete fails, are
    /// skipped with a warning.
    pub fn rollback<S: RecordStore + ?Sized>(&mut self, store: &mut S) -> Result<usize> {
        if self.committed {
            return Err(BackupError::coding("cannot roll back a committed transaction"));
        }
        if self.rolled_back {
            return Ok(0);
        }
        warn!("Rolling back restore transaction {}", self.id);

        let mut removed = 0;
        for change in self.changes.iter().rev() {
            if let RestoreChange::RowInserted { table, id } = change {
                match store.delete(table, *id) {
                    Ok(true) => removed += 1,
                    Ok(false) => warn!("Row {} {} was already gone during rollback", table, id),
                    Err(e) => warn!("Failed to delete row {} {} during rollback: {}", table, id, e),
                }
            }
        }
        self.rolled_back = true;
        Ok(removed)
    }

    pub fn changes(&self) -> &[RestoreChange] {
        &self.changes
    }

    pub fn change_count(&self) -> usize {
        self.changes.len()
    }

    pub fn inserted_count(&self) -> usize {
        self.changes
            .iter()
            .filter(|c| matches!(c, RestoreChange::RowInserted { .. }))
            .count()
    }

    pub fn reused_count(&self) -> usize {
        self.change_count() - self.inserted_count()
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    pub fn is_rolled_back(&self) -> bool {
        self.rolled_back
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{record, MemoryStore, Record};

    /// Store whose deletes from one table always fail
    struct FailingDeletes {
        inner: MemoryStore,
        table: &'static str,
    }

    impl RecordStore for FailingDeletes {
        fn select(&self, table: &str, filter: &[(&str, &str)]) -> Result<Vec<Record>> {
            self.inner.select(table, filter)
        }

        fn get(&self, table: &str, id: i64) -> Result<Option<Record>> {
            self.inner.get(table, id)
        }

        fn insert(&mut self, table: &str, record: Record) -> Result<i64> {
            self.inner.insert(table, record)
        }

        fn delete(&mut self, table: &str, id: i64) -> Result<bool> {
            if table == self.table {
                return Err(BackupError::coding("delete failed"));
            }
            self.inner.delete(table, id)
        }
    }

    #[test]
    fn test_rollback_removes_inserted_rows_only() {
        let mut store = MemoryStore::new();
        store
            .insert_with_id("user", record([("id", "1"), ("username", "ada")]))
            .unwrap();

        let mut tx = RestoreTransaction::begin();
        let course = store.insert("course", record([("fullname", "Copy")])).unwrap();
        tx.record_row_inserted("course", course);
        tx.record_row_reused("user", 1);
        let section = store.insert("course_sections", record([("course", "1")])).unwrap();
        tx.record_row_inserted("course_sections", section);

        assert_eq!(tx.inserted_count(), 2);
        assert_eq!(tx.reused_count(), 1);

        assert_eq!(tx.rollback(&mut store).unwrap(), 2);
        assert!(tx.is_rolled_back());
        assert_eq!(store.count("course"), 0);
        assert_eq!(store.count("course_sections"), 0);
        assert_eq!(store.count("user"), 1);

        // a second rollback does nothing
        assert_eq!(tx.rollback(&mut store).unwrap(), 0);
    }

    #[test]
    fn test_failed_delete_does_not_stop_rollback() {
        let mut store = FailingDeletes {
            inner: MemoryStore::new(),
            table: "user",
        };
        let mut tx = RestoreTransaction::begin();
        let course = store.insert("course", record([("fullname", "Copy")])).unwrap();
        tx.record_row_inserted("course", course);
        let user = store.insert("user", record([("username", "ada")])).unwrap();
        tx.record_row_inserted("user", user);

        assert_eq!(tx.rollback(&mut store).unwrap(), 1);
        assert!(tx.is_rolled_back());
        assert_eq!(store.inner.count("course"), 0);
        assert_eq!(store.inner.count("user"), 1);
    }

    #[test]
    fn test_committed_transaction_cannot_roll_back() {
        let mut store = MemoryStore::new();
        let mut tx = RestoreTransaction::begin();
        tx.record_row_inserted("log", store.insert("log", Default::default()).unwrap());
        tx.commit().unwrap();

        assert!(tx.is_committed());
        assert!(tx.rollback(&mut store).unwrap_err().is_coding());
        assert_eq!(store.count("log"), 1);
    }

    #[test]
    fn test_rolled_back_transaction_cannot_commit() {
        let mut tx = RestoreTransaction::begin();
        tx.rollback(&mut MemoryStore::new()).unwrap();
        assert!(tx.commit().unwrap_err().is_coding());
    }
}
