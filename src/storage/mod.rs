mod file;
mod memory;
mod tables;
mod wal;

pub use file::{FileStorage, WalJournal};
pub use memory::{MemoryJournal, MemoryStorage};
pub use tables::{Record, Tables};
pub use wal::Wal;

use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    Io(String),
    NotFound { kind: EntityKind, id: Id },
    Constraint(String),
    Corrupt(String),
    NoTransaction,
    TransactionActive,
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Io(e) => write!(f, "storage I/O error: {e}"),
            StorageError::NotFound { kind, id } => write!(f, "{kind} {id} not found"),
            StorageError::Constraint(msg) => write!(f, "constraint violated: {msg}"),
            StorageError::Corrupt(msg) => write!(f, "storage corrupt: {msg}"),
            StorageError::NoTransaction => write!(f, "no transaction is open"),
            StorageError::TransactionActive => write!(f, "a transaction is already open"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e.to_string())
    }
}

/// Transactional persistence backend, owned by the worker thread.
///
/// Mutations are only accepted inside a transaction. `store_new_*` assign
/// ids to the object and all its unpersisted children; `update_*` bump the
/// revision. A failed mutation leaves the transaction open but unchanged.
pub trait Storage: Send + 'static {
    fn begin_transaction(&mut self) -> Result<(), StorageError>;
    fn commit_transaction(&mut self) -> Result<(), StorageError>;
    fn rollback_transaction(&mut self);

    fn store_new_hotel(&mut self, hotel: &mut Hotel) -> Result<(), StorageError>;
    fn store_new_reservation(&mut self, reservation: &mut Reservation) -> Result<(), StorageError>;
    fn update_hotel(&mut self, hotel: &mut Hotel) -> Result<(), StorageError>;
    fn update_reservation(&mut self, reservation: &mut Reservation) -> Result<(), StorageError>;
    fn delete_hotel(&mut self, id: Id) -> Result<(), StorageError>;
    fn delete_reservation(&mut self, id: Id) -> Result<(), StorageError>;
    fn delete_all(&mut self) -> Result<(), StorageError>;

    fn load_hotels(&self) -> Result<Vec<Hotel>, StorageError>;
    fn load_reservations(&self) -> Result<Vec<Reservation>, StorageError>;
    fn load_hotel(&self, id: Id) -> Result<Option<Hotel>, StorageError>;
    fn load_reservation(&self, id: Id) -> Result<Option<Reservation>, StorageError>;
}

/// Where committed records end up.
pub trait Journal: Send + 'static {
    /// Make `records` durable. `tables` is the state after applying them.
    fn commit(&mut self, records: &[Record], tables: &Tables) -> Result<(), StorageError>;
}

/// [`Tables`] with snapshot transactions on top of a [`Journal`].
pub struct TableStorage<J> {
    tables: Tables,
    /// State at `begin_transaction`; `Some` while a transaction is open.
    backup: Option<Tables>,
    staged: Vec<Record>,
    journal: J,
}

impl<J: Journal> TableStorage<J> {
    pub fn with_journal(tables: Tables, journal: J) -> Self {
        Self {
            tables,
            backup: None,
            staged: Vec::new(),
            journal,
        }
    }

    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    pub fn journal(&self) -> &J {
        &self.journal
    }

    pub fn in_transaction(&self) -> bool {
        self.backup.is_some()
    }

    fn mutate(
        &mut self,
        f: impl FnOnce(&mut Tables) -> Result<Record, StorageError>,
    ) -> Result<(), StorageError> {
        if self.backup.is_none() {
            return Err(StorageError::NoTransaction);
        }
        let record = f(&mut self.tables)?;
        self.staged.push(record);
        Ok(())
    }
}

impl<J: Journal> Storage for TableStorage<J> {
    fn begin_transaction(&mut self) -> Result<(), StorageError> {
        if self.backup.is_some() {
            return Err(StorageError::TransactionActive);
        }
        self.backup = Some(self.tables.clone());
        self.staged.clear();
        Ok(())
    }

    fn commit_transaction(&mut self) -> Result<(), StorageError> {
        if self.backup.is_none() {
            return Err(StorageError::NoTransaction);
        }
        if !self.staged.is_empty() {
            // On failure the transaction stays open so the caller can roll back.
            self.journal.commit(&self.staged, &self.tables)?;
        }
        self.staged.clear();
        self.backup = None;
        Ok(())
    }

    fn rollback_transaction(&mut self) {
        if let Some(backup) = self.backup.take() {
            self.tables = backup;
        }
        self.staged.clear();
    }

    fn store_new_hotel(&mut self, hotel: &mut Hotel) -> Result<(), StorageError> {
        self.mutate(|t| t.store_new_hotel(hotel))
    }

    fn store_new_reservation(&mut self, reservation: &mut Reservation) -> Result<(), StorageError> {
        self.mutate(|t| t.store_new_reservation(reservation))
    }

    fn update_hotel(&mut self, hotel: &mut Hotel) -> Result<(), StorageError> {
        self.mutate(|t| t.update_hotel(hotel))
    }

    fn update_reservation(&mut self, reservation: &mut Reservation) -> Result<(), StorageError> {
        self.mutate(|t| t.update_reservation(reservation))
    }

    fn delete_hotel(&mut self, id: Id) -> Result<(), StorageError> {
        self.mutate(|t| t.delete_hotel(id))
    }

    fn delete_reservation(&mut self, id: Id) -> Result<(), StorageError> {
        self.mutate(|t| t.delete_reservation(id))
    }

    fn delete_all(&mut self) -> Result<(), StorageError> {
        self.mutate(|t| Ok(t.delete_all()))
    }

    fn load_hotels(&self) -> Result<Vec<Hotel>, StorageError> {
        Ok(self.tables.hotels())
    }

    fn load_reservations(&self) -> Result<Vec<Reservation>, StorageError> {
        Ok(self.tables.reservations())
    }

    fn load_hotel(&self, id: Id) -> Result<Option<Hotel>, StorageError> {
        Ok(self.tables.hotel(id))
    }

    fn load_reservation(&self, id: Id) -> Result<Option<Reservation>, StorageError> {
        Ok(self.tables.reservation(id))
    }
}
