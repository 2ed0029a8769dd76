use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tracing::warn;

use crate::model::*;

pub type StreamId = u64;

/// Which items of a kind a stream follows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StreamFilter {
    #[default]
    All,
    ById(Id),
}

impl StreamFilter {
    pub fn matches(&self, id: Id) -> bool {
        match self {
            StreamFilter::All => true,
            StreamFilter::ById(wanted) => *wanted == id,
        }
    }
}

/// What the worker needs to know about a stream. Contains no observer, so it
/// can cross to the worker thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSpec {
    pub id: StreamId,
    pub kind: EntityKind,
    pub filter: StreamFilter,
}

/// Consumer → worker stream bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Registered(StreamSpec),
    Deregistered(StreamId),
}

/// A homogeneous list of items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItems {
    Hotels(Vec<Hotel>),
    Reservations(Vec<Reservation>),
}

impl StreamItems {
    pub fn kind(&self) -> EntityKind {
        match self {
            StreamItems::Hotels(_) => EntityKind::Hotel,
            StreamItems::Reservations(_) => EntityKind::Reservation,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            StreamItems::Hotels(v) => v.len(),
            StreamItems::Reservations(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The subset `filter` lets through.
    pub fn filtered(&self, filter: &StreamFilter) -> StreamItems {
        match self {
            StreamItems::Hotels(v) => {
                StreamItems::Hotels(v.iter().filter(|h| filter.matches(h.id)).cloned().collect())
            }
            StreamItems::Reservations(v) => StreamItems::Reservations(
                v.iter().filter(|r| filter.matches(r.id)).cloned().collect(),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChange {
    ItemsAdded(StreamItems),
    ItemsUpdated(StreamItems),
    ItemsRemoved(Vec<Id>),
    /// The initial snapshot has been fully delivered.
    Initialized,
    Cleared,
}

/// One change addressed to one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDifferential {
    pub stream: StreamId,
    pub change: StreamChange,
}

/// Entity types that can be streamed to a typed observer.
pub trait Streamable: Clone + 'static {
    const KIND: EntityKind;

    fn id(&self) -> Id;

    /// Borrow the items if `items` holds this type.
    fn extract(items: &StreamItems) -> Option<&[Self]>;
}

impl Streamable for Hotel {
    const KIND: EntityKind = EntityKind::Hotel;

    fn id(&self) -> Id {
        self.id
    }

    fn extract(items: &StreamItems) -> Option<&[Self]> {
        match items {
            StreamItems::Hotels(v) => Some(v),
            StreamItems::Reservations(_) => None,
        }
    }
}

impl Streamable for Reservation {
    const KIND: EntityKind = EntityKind::Reservation;

    fn id(&self) -> Id {
        self.id
    }

    fn extract(items: &StreamItems) -> Option<&[Self]> {
        match items {
            StreamItems::Reservations(v) => Some(v),
            StreamItems::Hotels(_) => None,
        }
    }
}

/// Receives a stream's changes once its initial snapshot is in.
///
/// Callbacks run on the thread pumping the integrator. The observer's
/// `RefCell` must not be borrowed while the integrator runs.
pub trait StreamObserver<T> {
    fn initialized(&mut self, items: &[T]);
    fn added(&mut self, items: &[T]);
    fn updated(&mut self, items: &[T]);
    fn removed(&mut self, ids: &[Id]);
    fn cleared(&mut self);
}

/// Ordered local copy of a stream's items.
#[derive(Debug, Clone)]
pub struct Projection<T> {
    items: Vec<T>,
}

impl<T> Default for Projection<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T: Streamable> Projection<T> {
    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn add(&mut self, items: &[T]) {
        self.items.extend_from_slice(items);
    }

    /// Replace items by id; unknown ids are appended.
    pub fn update(&mut self, items: &[T]) {
        for item in items {
            match self.items.iter_mut().find(|i| i.id() == item.id()) {
                Some(slot) => *slot = item.clone(),
                None => self.items.push(item.clone()),
            }
        }
    }

    pub fn remove(&mut self, ids: &[Id]) {
        self.items.retain(|i| !ids.contains(&i.id()));
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn replace(&mut self, items: &[T]) {
        self.items = items.to_vec();
    }
}

/// Observer that mirrors the stream into a `Vec`.
#[derive(Debug)]
pub struct VecObserver<T> {
    projection: Projection<T>,
    initialized: bool,
}

impl<T> Default for VecObserver<T> {
    fn default() -> Self {
        Self {
            projection: Projection::default(),
            initialized: false,
        }
    }
}

impl<T: Streamable> VecObserver<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[T] {
        self.projection.items()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}

impl<T: Streamable> StreamObserver<T> for VecObserver<T> {
    fn initialized(&mut self, items: &[T]) {
        self.projection.replace(items);
        self.initialized = true;
    }

    fn added(&mut self, items: &[T]) {
        self.projection.add(items);
    }

    fn updated(&mut self, items: &[T]) {
        self.projection.update(items);
    }

    fn removed(&mut self, ids: &[Id]) {
        self.projection.remove(ids);
    }

    fn cleared(&mut self) {
        self.projection.clear();
    }
}

/// Type-erased view the integrator keeps of each connected stream.
pub(crate) trait ErasedStream {
    fn spec(&self) -> &StreamSpec;
    /// Observer still alive and handle not dropped.
    fn is_valid(&self) -> bool;
    fn is_initialized(&self) -> bool;
    fn apply(&self, change: &StreamChange);
}

/// Consumer-side state of one stream.
pub struct DataStream<T> {
    spec: StreamSpec,
    initialized: Cell<bool>,
    connected: Cell<bool>,
    observer: Weak<RefCell<dyn StreamObserver<T>>>,
    projection: RefCell<Projection<T>>,
}

impl<T: Streamable> DataStream<T> {
    pub(crate) fn new(spec: StreamSpec, observer: Weak<RefCell<dyn StreamObserver<T>>>) -> Self {
        Self {
            spec,
            initialized: Cell::new(false),
            connected: Cell::new(true),
            observer,
            projection: RefCell::new(Projection::default()),
        }
    }

    fn disconnect(&self) {
        self.connected.set(false);
    }
}

impl<T: Streamable> ErasedStream for DataStream<T> {
    fn spec(&self) -> &StreamSpec {
        &self.spec
    }

    fn is_valid(&self) -> bool {
        self.connected.get() && self.observer.strong_count() > 0
    }

    fn is_initialized(&self) -> bool {
        self.initialized.get()
    }

    fn apply(&self, change: &StreamChange) {
        let Some(observer) = self.observer.upgrade().filter(|_| self.connected.get()) else {
            return;
        };
        let initialized = self.initialized.get();
        match change {
            StreamChange::ItemsAdded(items) | StreamChange::ItemsUpdated(items) => {
                let Some(items) = T::extract(items) else {
                    warn!(stream = self.spec.id, kind = %items.kind(), "differential of wrong kind dropped");
                    return;
                };
                let added = matches!(change, StreamChange::ItemsAdded(_));
                {
                    let mut projection = self.projection.borrow_mut();
                    if added {
                        projection.add(items);
                    } else {
                        projection.update(items);
                    }
                }
                if initialized {
                    let mut observer = observer.borrow_mut();
                    if added {
                        observer.added(items);
                    } else {
                        observer.updated(items);
                    }
                }
            }
            StreamChange::ItemsRemoved(ids) => {
                self.projection.borrow_mut().remove(ids);
                if initialized {
                    observer.borrow_mut().removed(ids);
                }
            }
            StreamChange::Cleared => {
                self.projection.borrow_mut().clear();
                if initialized {
                    observer.borrow_mut().cleared();
                }
            }
            StreamChange::Initialized => {
                if initialized {
                    return;
                }
                self.initialized.set(true);
                let snapshot = self.projection.borrow().items().to_vec();
                observer.borrow_mut().initialized(&snapshot);
            }
        }
    }
}

/// Owning handle returned by `DataSource::connect_stream`. Dropping it
/// disconnects the stream; the worker forgets it on the next integration.
pub struct StreamHandle<T: Streamable> {
    stream: Rc<DataStream<T>>,
}

impl<T: Streamable> StreamHandle<T> {
    pub(crate) fn new(stream: Rc<DataStream<T>>) -> Self {
        Self { stream }
    }

    pub fn id(&self) -> StreamId {
        self.stream.spec.id
    }

    pub fn filter(&self) -> StreamFilter {
        self.stream.spec.filter
    }

    pub fn is_initialized(&self) -> bool {
        self.stream.is_initialized()
    }

    pub fn is_valid(&self) -> bool {
        self.stream.is_valid()
    }

    /// Copy of the stream's local projection.
    pub fn items(&self) -> Vec<T> {
        self.stream.projection.borrow().items().to_vec()
    }

    pub fn len(&self) -> usize {
        self.stream.projection.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stream.projection.borrow().is_empty()
    }
}

impl<T: Streamable> Drop for StreamHandle<T> {
    fn drop(&mut self) {
        self.stream.disconnect();
    }
}
