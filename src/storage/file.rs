use std::path::Path;
use std::time::Instant;

use tracing::{debug, error, info};

use super::{Journal, Record, StorageError, TableStorage, Tables, Wal};
use crate::observability;

/// Journal backed by a [`Wal`]. Compacts to a snapshot once the log grows
/// past `compact_threshold` appends, or whenever a commit erases everything.
pub struct WalJournal {
    wal: Wal,
    compact_threshold: u64,
}

impl WalJournal {
    pub fn wal(&self) -> &Wal {
        &self.wal
    }

    fn compact(&mut self, tables: &Tables) -> Result<(), StorageError> {
        let snapshot = tables.snapshot_records();
        self.wal.compact(&snapshot)?;
        debug!(
            path = %self.wal.path().display(),
            records = snapshot.len(),
            "journal compacted"
        );
        Ok(())
    }
}

impl Journal for WalJournal {
    fn commit(&mut self, records: &[Record], tables: &Tables) -> Result<(), StorageError> {
        let start = Instant::now();
        let written = records
            .iter()
            .try_for_each(|record| self.wal.append_buffered(record))
            .and_then(|()| self.wal.flush_sync());
        if let Err(e) = written {
            // The caller rolls back, so none of these records may surface later.
            if let Err(discard) = self.wal.discard_pending() {
                error!(path = %self.wal.path().display(), error = %discard, "could not discard unwritten records");
            }
            return Err(e.into());
        }
        metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
            .record(start.elapsed().as_secs_f64());

        // The records are durable from here on; compaction failing must not
        // fail the commit. It is retried on the next one.
        let erased = records.iter().any(|r| matches!(r, Record::AllDeleted));
        if (erased || self.wal.appends_since_compact() >= self.compact_threshold)
            && let Err(e) = self.compact(tables)
        {
            error!(path = %self.wal.path().display(), error = %e, "journal compaction failed");
        }
        Ok(())
    }
}

pub type FileStorage = TableStorage<WalJournal>;

impl FileStorage {
    /// Open the journal at `path`, replaying whatever it already holds.
    pub fn open(path: &Path, compact_threshold: u64) -> Result<Self, StorageError> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)?;
        }
        let records = Wal::replay(path)?;
        let mut tables = Tables::default();
        for record in &records {
            tables.apply(record)?;
        }
        info!(
            path = %path.display(),
            records = records.len(),
            hotels = tables.hotel_count(),
            reservations = tables.reservation_count(),
            "storage opened"
        );
        let journal = WalJournal {
            wal: Wal::open(path)?,
            compact_threshold: compact_threshold.max(1),
        };
        Ok(Self::with_journal(tables, journal))
    }
}
