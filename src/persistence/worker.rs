use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::change_queue::ChangeQueue;
use super::op::{Operation, OperationResult};
use super::stream::{StreamChange, StreamDifferential, StreamEvent, StreamFilter, StreamId, StreamItems, StreamSpec};
use super::task::{TaskCompleter, TaskError};
use crate::model::*;
use crate::observability;
use crate::storage::{Storage, StorageError};

pub(crate) struct Batch {
    pub operations: Vec<Operation>,
    pub completer: TaskCompleter,
}

pub(crate) enum WorkerCommand {
    Execute(Batch),
    /// Stream events were queued on the change queue.
    StreamsChanged,
    Shutdown,
}

/// Owns the thread that runs batches against storage, in submission order.
pub(crate) struct Worker {
    tx: mpsc::UnboundedSender<WorkerCommand>,
    shutting_down: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn spawn<S: Storage>(storage: S, queue: Arc<ChangeQueue>) -> io::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutting_down = Arc::new(AtomicBool::new(false));
        let worker_loop = WorkerLoop {
            storage,
            queue,
            router: StreamRouter::default(),
            shutting_down: Arc::clone(&shutting_down),
        };
        let handle = thread::Builder::new()
            .name("hotelplan-worker".into())
            .spawn(move || worker_loop.run(rx))?;
        Ok(Self {
            tx,
            shutting_down,
            handle: Some(handle),
        })
    }

    /// Queue a batch. After shutdown began the task fails immediately.
    pub fn submit(&self, operations: Vec<Operation>, completer: TaskCompleter) {
        if self.shutting_down.load(Ordering::Acquire) {
            completer.fail(TaskError::ShuttingDown);
            return;
        }
        if let Err(mpsc::error::SendError(WorkerCommand::Execute(batch))) =
            self.tx.send(WorkerCommand::Execute(Batch { operations, completer }))
        {
            batch.completer.fail(TaskError::ShuttingDown);
        }
    }

    pub fn streams_changed(&self) {
        let _ = self.tx.send(WorkerCommand::StreamsChanged);
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Let the current batch finish, discard the rest and join the thread.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.shutting_down.store(true, Ordering::Release);
        let _ = self.tx.send(WorkerCommand::Shutdown);
        if handle.join().is_err() {
            error!("worker thread panicked");
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct WorkerLoop<S> {
    storage: S,
    queue: Arc<ChangeQueue>,
    router: StreamRouter,
    shutting_down: Arc<AtomicBool>,
}

impl<S: Storage> WorkerLoop<S> {
    fn run(mut self, mut rx: mpsc::UnboundedReceiver<WorkerCommand>) {
        info!("persistence worker started");
        let mut discarded = 0usize;
        while let Some(cmd) = rx.blocking_recv() {
            if self.shutting_down.load(Ordering::Acquire) {
                if matches!(cmd, WorkerCommand::Execute(_)) {
                    discarded += 1;
                }
                break;
            }
            match cmd {
                WorkerCommand::Execute(batch) => {
                    self.sync_streams();
                    self.execute(batch);
                    // The task resolved either way; a failed one queued nothing.
                    self.queue.wake();
                }
                WorkerCommand::StreamsChanged => self.sync_streams(),
                WorkerCommand::Shutdown => break,
            }
        }

        // Unresolved completers fail their tasks as aborted when dropped.
        rx.close();
        while let Ok(cmd) = rx.try_recv() {
            if matches!(cmd, WorkerCommand::Execute(_)) {
                discarded += 1;
            }
        }
        if discarded > 0 {
            warn!(discarded, "queued batches discarded at shutdown");
        }
        info!("persistence worker stopped");
    }

    fn sync_streams(&mut self) {
        for event in self.queue.take_stream_events() {
            match event {
                StreamEvent::Registered(spec) => {
                    debug!(stream = spec.id, kind = %spec.kind, "stream registered");
                    self.router.register(spec);
                }
                StreamEvent::Deregistered(id) => {
                    debug!(stream = id, "stream deregistered");
                    self.router.deregister(id);
                }
            }
        }
        if self.router.has_pending() {
            let changes = self.router.initialize_pending(&self.storage);
            self.queue.add_changes(changes);
        }
    }

    fn execute(&mut self, batch: Batch) {
        let Batch { operations, completer } = batch;
        let start = Instant::now();
        let size = operations.len();
        completer.start();

        if let Err(e) = self.storage.begin_transaction() {
            error!(task = completer.id(), error = %e, "could not begin transaction");
            completer.fail(TaskError::Storage(e));
            return;
        }

        let mut changes = Vec::new();
        let mut results = Vec::with_capacity(size);
        for op in operations {
            let label = op.label();
            match self.execute_operation(op, &mut changes) {
                Ok(result) => {
                    metrics::counter!(observability::OPERATIONS_TOTAL, "kind" => label, "status" => "ok")
                        .increment(1);
                    results.push(result);
                }
                Err(e) => {
                    metrics::counter!(observability::OPERATIONS_TOTAL, "kind" => label, "status" => "error")
                        .increment(1);
                    self.storage.rollback_transaction();
                    debug!(task = completer.id(), op = label, error = %e, "batch rolled back");
                    completer.fail(TaskError::Storage(e));
                    return;
                }
            }
        }

        if let Err(e) = self.storage.commit_transaction() {
            self.storage.rollback_transaction();
            error!(task = completer.id(), error = %e, "commit failed, batch rolled back");
            completer.fail(TaskError::Storage(e));
            return;
        }

        // Differentials must be visible before anyone sees the task resolve.
        self.queue.add_changes(changes);
        metrics::histogram!(observability::BATCH_SIZE).record(size as f64);
        metrics::histogram!(observability::BATCH_DURATION_SECONDS).record(start.elapsed().as_secs_f64());
        debug!(task = completer.id(), operations = size, "batch committed");
        completer.complete(results);
    }

    fn execute_operation(
        &mut self,
        op: Operation,
        changes: &mut Vec<StreamDifferential>,
    ) -> Result<OperationResult, StorageError> {
        match op {
            Operation::LoadAll => {
                let loaded = self.router.reload_active(&self.storage, changes)?;
                Ok(OperationResult::affected(loaded))
            }
            Operation::EraseAll => {
                let erased = self.storage.load_hotels()?.len() + self.storage.load_reservations()?.len();
                self.storage.delete_all()?;
                self.router.clear_active(changes);
                Ok(OperationResult::affected(erased))
            }
            Operation::StoreNew(Item::Hotel(mut hotel)) => {
                self.storage.store_new_hotel(&mut hotel)?;
                let id = hotel.id;
                self.router
                    .route(StreamItems::Hotels(vec![hotel]), StreamChange::ItemsAdded, changes);
                Ok(OperationResult::with_id(id))
            }
            Operation::StoreNew(Item::Reservation(mut reservation)) => {
                self.storage.store_new_reservation(&mut reservation)?;
                let id = reservation.id;
                self.router.route(
                    StreamItems::Reservations(vec![reservation]),
                    StreamChange::ItemsAdded,
                    changes,
                );
                Ok(OperationResult::with_id(id))
            }
            Operation::Update(Item::Hotel(mut hotel)) => {
                self.storage.update_hotel(&mut hotel)?;
                let id = hotel.id;
                self.router
                    .route(StreamItems::Hotels(vec![hotel]), StreamChange::ItemsUpdated, changes);
                Ok(OperationResult::with_id(id))
            }
            Operation::Update(Item::Reservation(mut reservation)) => {
                self.storage.update_reservation(&mut reservation)?;
                let id = reservation.id;
                self.router.route(
                    StreamItems::Reservations(vec![reservation]),
                    StreamChange::ItemsUpdated,
                    changes,
                );
                Ok(OperationResult::with_id(id))
            }
            Operation::Delete { kind, id } => {
                match kind {
                    EntityKind::Hotel => self.storage.delete_hotel(id)?,
                    EntityKind::Reservation => self.storage.delete_reservation(id)?,
                }
                self.router.route_removed(kind, id, changes);
                Ok(OperationResult::with_id(id))
            }
        }
    }
}

/// Worker-side list of streams and the differentials they should receive.
#[derive(Debug, Default)]
struct StreamRouter {
    /// Registered but still waiting for their initial snapshot.
    pending: Vec<StreamSpec>,
    active: Vec<StreamSpec>,
}

impl StreamRouter {
    fn register(&mut self, spec: StreamSpec) {
        self.pending.push(spec);
    }

    fn deregister(&mut self, id: StreamId) {
        self.pending.retain(|s| s.id != id);
        self.active.retain(|s| s.id != id);
    }

    fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Load the snapshot of every pending stream. Streams whose snapshot
    /// fails to load stay pending and are retried on the next sync.
    fn initialize_pending(&mut self, storage: &impl Storage) -> Vec<StreamDifferential> {
        let mut changes = Vec::new();
        let mut still_pending = Vec::new();
        for spec in std::mem::take(&mut self.pending) {
            match load_snapshot(storage, &spec) {
                Ok(items) => {
                    debug!(stream = spec.id, items = items.len(), "stream initialized");
                    changes.push(StreamDifferential {
                        stream: spec.id,
                        change: StreamChange::ItemsAdded(items),
                    });
                    changes.push(StreamDifferential {
                        stream: spec.id,
                        change: StreamChange::Initialized,
                    });
                    self.active.push(spec);
                }
                Err(e) => {
                    error!(stream = spec.id, error = %e, "could not load stream snapshot");
                    still_pending.push(spec);
                }
            }
        }
        self.pending = still_pending;
        changes
    }

    fn route(
        &self,
        items: StreamItems,
        change: fn(StreamItems) -> StreamChange,
        out: &mut Vec<StreamDifferential>,
    ) {
        for spec in self.active.iter().filter(|s| s.kind == items.kind()) {
            let items = match spec.filter {
                StreamFilter::All => items.clone(),
                filter => items.filtered(&filter),
            };
            if !items.is_empty() {
                out.push(StreamDifferential {
                    stream: spec.id,
                    change: change(items),
                });
            }
        }
    }

    fn route_removed(&self, kind: EntityKind, id: Id, out: &mut Vec<StreamDifferential>) {
        for spec in self
            .active
            .iter()
            .filter(|s| s.kind == kind && s.filter.matches(id))
        {
            out.push(StreamDifferential {
                stream: spec.id,
                change: StreamChange::ItemsRemoved(vec![id]),
            });
        }
    }

    fn clear_active(&self, out: &mut Vec<StreamDifferential>) {
        for spec in &self.active {
            out.push(StreamDifferential {
                stream: spec.id,
                change: StreamChange::Cleared,
            });
        }
    }

    fn reload_active(
        &self,
        storage: &impl Storage,
        out: &mut Vec<StreamDifferential>,
    ) -> Result<usize, StorageError> {
        let mut loaded = 0;
        for spec in &self.active {
            let items = load_snapshot(storage, spec)?;
            loaded += items.len();
            out.push(StreamDifferential {
                stream: spec.id,
                change: StreamChange::Cleared,
            });
            out.push(StreamDifferential {
                stream: spec.id,
                change: StreamChange::ItemsAdded(items),
            });
        }
        Ok(loaded)
    }
}

fn load_snapshot(storage: &impl Storage, spec: &StreamSpec) -> Result<StreamItems, StorageError> {
    Ok(match (spec.kind, spec.filter) {
        (EntityKind::Hotel, StreamFilter::All) => StreamItems::Hotels(storage.load_hotels()?),
        (EntityKind::Hotel, StreamFilter::ById(id)) => {
            StreamItems::Hotels(storage.load_hotel(id)?.into_iter().collect())
        }
        (EntityKind::Reservation, StreamFilter::All) => {
            StreamItems::Reservations(storage.load_reservations()?)
        }
        (EntityKind::Reservation, StreamFilter::ById(id)) => {
            StreamItems::Reservations(storage.load_reservation(id)?.into_iter().collect())
        }
    })
}
