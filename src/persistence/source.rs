use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::change_queue::ChangeQueue;
use super::integrator::{IntegrationReport, ResultIntegrator};
use super::op::Operation;
use super::stream::{
    DataStream, StreamEvent, StreamFilter, StreamHandle, StreamId, StreamObserver, StreamSpec, Streamable,
};
use super::task::Task;
use super::worker::Worker;
use crate::hotels::HotelCollection;
use crate::limits;
use crate::model::EntityKind;
use crate::planning::PlanningBoard;
use crate::storage::{FileStorage, Storage, StorageError};

/// Entry point of the persistence pipeline.
///
/// Owns the worker, the change queue and the integrator. Not `Send`: stream
/// observers are `Rc<RefCell<_>>` and all integration happens on the thread
/// that owns the source.
pub struct DataSource {
    queue: Arc<ChangeQueue>,
    worker: Worker,
    integrator: ResultIntegrator,
    next_stream_id: StreamId,
    next_task_id: u64,
    tasks: Vec<Task>,
}

impl DataSource {
    /// Open a [`FileStorage`] journal at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let storage = FileStorage::open(path.as_ref(), limits::DEFAULT_COMPACT_THRESHOLD)?;
        Self::with_storage(storage)
    }

    pub fn with_storage(storage: impl Storage) -> Result<Self, StorageError> {
        let queue = Arc::new(ChangeQueue::new());
        let worker = Worker::spawn(storage, Arc::clone(&queue))?;

        // The canonical streams take the first two ids.
        let hotels_stream = 1;
        let reservations_stream = 2;
        for (id, kind) in [(hotels_stream, EntityKind::Hotel), (reservations_stream, EntityKind::Reservation)] {
            queue.add_stream_event(StreamEvent::Registered(StreamSpec {
                id,
                kind,
                filter: StreamFilter::All,
            }));
        }
        worker.streams_changed();
        info!("data source started");

        Ok(Self {
            integrator: ResultIntegrator::new(Arc::clone(&queue), hotels_stream, reservations_stream),
            queue,
            worker,
            next_stream_id: reservations_stream + 1,
            next_task_id: 1,
            tasks: Vec::new(),
        })
    }

    pub fn queue_operation(&mut self, operation: Operation) -> Task {
        self.queue_operations(vec![operation])
    }

    /// Submit a batch. It runs in one transaction, after every batch
    /// submitted before it.
    pub fn queue_operations(&mut self, operations: Vec<Operation>) -> Task {
        let (task, completer) = Task::new(self.next_task_id);
        self.next_task_id += 1;
        self.worker.submit(operations, completer);
        self.tasks.retain(|t| !t.is_finished());
        if !task.is_finished() {
            self.tasks.push(task.clone());
        }
        task
    }

    /// Connect `observer` to every item of `T`.
    pub fn connect_stream<T, O>(&mut self, observer: &Rc<RefCell<O>>) -> StreamHandle<T>
    where
        T: Streamable,
        O: StreamObserver<T> + 'static,
    {
        self.connect_stream_with(observer, StreamFilter::All)
    }

    /// The observer is held weakly; once it is dropped the stream is pruned.
    pub fn connect_stream_with<T, O>(&mut self, observer: &Rc<RefCell<O>>, filter: StreamFilter) -> StreamHandle<T>
    where
        T: Streamable,
        O: StreamObserver<T> + 'static,
    {
        let spec = StreamSpec {
            id: self.next_stream_id,
            kind: T::KIND,
            filter,
        };
        self.next_stream_id += 1;

        let erased: Rc<RefCell<dyn StreamObserver<T>>> = observer.clone();
        let stream = Rc::new(DataStream::new(spec.clone(), Rc::downgrade(&erased)));
        self.integrator.add_stream(stream.clone());
        self.queue.add_stream_event(StreamEvent::Registered(spec));
        self.worker.streams_changed();
        StreamHandle::new(stream)
    }

    /// Integrate everything the worker produced so far. Dropped streams are
    /// deregistered with the worker.
    pub fn process_integration_queue(&mut self) -> IntegrationReport {
        let report = self.integrator.process_integration_queue();
        if report.pruned > 0 {
            self.worker.streams_changed();
        }
        report
    }

    /// True while a submitted batch has not resolved.
    pub fn has_pending_tasks(&mut self) -> bool {
        self.tasks.retain(|t| !t.is_finished());
        !self.tasks.is_empty()
    }

    pub fn has_uninitialized_streams(&self) -> bool {
        self.integrator.has_uninitialized_streams()
    }

    /// Block until the change queue has differentials or is woken, or
    /// `timeout` passes. The worker wakes it whenever a task resolves.
    pub fn wait_for_changes(&self, timeout: Duration) -> bool {
        self.queue.wait_for_changes(timeout)
    }

    pub fn change_queue(&self) -> &Arc<ChangeQueue> {
        &self.queue
    }

    pub fn hotels(&self) -> &HotelCollection {
        self.integrator.hotels()
    }

    pub fn planning(&self) -> &PlanningBoard {
        self.integrator.planning()
    }

    /// Stop the worker after its current batch. Batches still queued resolve
    /// as aborted; later submissions fail immediately.
    pub fn shutdown(&mut self) {
        if self.worker.is_running() {
            self.worker.shutdown();
            self.tasks.clear();
            info!("data source stopped");
        }
    }
}

impl Drop for DataSource {
    fn drop(&mut self) {
        self.shutdown();
    }
}
