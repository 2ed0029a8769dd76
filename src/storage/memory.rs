use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{Journal, Record, StorageError, TableStorage, Tables};

/// Volatile journal. Commits only count records; the switch makes them fail.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    fail_commits: Arc<AtomicBool>,
    committed_records: u64,
}

impl MemoryJournal {
    pub fn committed_records(&self) -> u64 {
        self.committed_records
    }
}

impl Journal for MemoryJournal {
    fn commit(&mut self, records: &[Record], _tables: &Tables) -> Result<(), StorageError> {
        if self.fail_commits.load(Ordering::Acquire) {
            return Err(StorageError::Io("commit rejected".into()));
        }
        self.committed_records += records.len() as u64;
        Ok(())
    }
}

pub type MemoryStorage = TableStorage<MemoryJournal>;

impl MemoryStorage {
    pub fn new() -> Self {
        Self::with_journal(Tables::default(), MemoryJournal::default())
    }

    /// Shared switch: while set, every non-empty commit fails with an I/O error.
    pub fn commit_failure_switch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.journal().fail_commits)
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}
