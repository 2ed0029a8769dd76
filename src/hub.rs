use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::limits;
use crate::model::*;
use crate::observability;
use crate::persistence::{
    ChangeQueue, DataSource, Operation, OperationResult, StreamFilter, StreamHandle, StreamId, StreamObserver, Streamable, Task, TaskError,
};
use crate::protocol::{ClientStreamId, ServerMessage};
use crate::storage::{Storage, StorageError};

pub type SessionId = u64;

/// Upper bound on one idle wait. Commands and resolved tasks wake the hub
/// through the change queue long before it.
const IDLE_WAIT: Duration = Duration::from_secs(1);

pub(crate) enum HubCommand {
    Connect {
        session: SessionId,
        outbox: mpsc::UnboundedSender<ServerMessage>,
    },
    CreateStream {
        session: SessionId,
        id: ClientStreamId,
        kind: EntityKind,
        filter: StreamFilter,
    },
    RemoveStream {
        session: SessionId,
        id: ClientStreamId,
    },
    Schedule {
        session: SessionId,
        id: u64,
        operations: Vec<Operation>,
    },
    Disconnect {
        session: SessionId,
    },
    Shutdown,
}

/// Thread-safe front of the hub thread. Sessions talk to the single
/// [`DataSource`] through it.
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubCommand>,
    /// The hub thread sleeps on this queue; every command wakes it.
    waker: Arc<ChangeQueue>,
    next_session: AtomicU64,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl HubHandle {
    /// Start the hub thread on top of `storage`.
    pub fn spawn<S: Storage>(storage: S) -> Result<Self, StorageError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel(1);
        let thread = thread::Builder::new()
            .name("hotelplan-hub".into())
            .spawn(move || {
                let source = match DataSource::with_storage(storage) {
                    Ok(source) => {
                        let _ = ready_tx.send(Ok(Arc::clone(source.change_queue())));
                        source
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                Hub::new(source).run(rx);
            })?;
        let waker = match ready_rx.recv() {
            Ok(Ok(waker)) => waker,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(StorageError::Io("hub thread exited during startup".into())),
        };
        info!("hub started");
        Ok(Self {
            tx,
            waker,
            next_session: AtomicU64::new(1),
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Register a session. Server messages for it arrive on the receiver.
    pub fn connect(&self) -> (SessionId, mpsc::UnboundedReceiver<ServerMessage>) {
        let session = self.next_session.fetch_add(1, Ordering::Relaxed);
        let (outbox, inbox) = mpsc::unbounded_channel();
        self.send(HubCommand::Connect { session, outbox });
        (session, inbox)
    }

    pub fn create_stream(&self, session: SessionId, id: ClientStreamId, kind: EntityKind, filter: StreamFilter) {
        self.send(HubCommand::CreateStream {
            session,
            id,
            kind,
            filter,
        });
    }

    pub fn remove_stream(&self, session: SessionId, id: ClientStreamId) {
        self.send(HubCommand::RemoveStream { session, id });
    }

    /// Results come back as a `task_results` message carrying `id`.
    pub fn schedule(&self, session: SessionId, id: u64, operations: Vec<Operation>) {
        self.send(HubCommand::Schedule {
            session,
            id,
            operations,
        });
    }

    pub fn disconnect(&self, session: SessionId) {
        self.send(HubCommand::Disconnect { session });
    }

    /// Stop the hub and its worker. Idempotent.
    pub fn shutdown(&self) {
        let Some(thread) = self.thread.lock().take() else {
            return;
        };
        self.send(HubCommand::Shutdown);
        if thread.join().is_err() {
            error!("hub thread panicked");
        }
    }

    fn send(&self, cmd: HubCommand) {
        if self.tx.send(cmd).is_err() {
            debug!("hub is gone, command dropped");
            return;
        }
        self.waker.wake();
    }
}

impl Drop for HubHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Forwards a stream's changes to a session outbox.
struct SessionObserver {
    stream: ClientStreamId,
    outbox: mpsc::UnboundedSender<ServerMessage>,
}

impl SessionObserver {
    fn push(&self, msg: ServerMessage) {
        // A closed outbox means the session is going away; its Disconnect follows.
        let _ = self.outbox.send(msg);
    }

    fn items<T: Serialize>(&self, items: &[T]) -> Option<serde_json::Value> {
        match serde_json::to_value(items) {
            Ok(value) => Some(value),
            Err(e) => {
                error!(stream = self.stream, "failed to encode stream items: {e}");
                None
            }
        }
    }
}

impl<T: Streamable + Serialize> StreamObserver<T> for SessionObserver {
    fn initialized(&mut self, items: &[T]) {
        if !items.is_empty()
            && let Some(items) = self.items(items)
        {
            self.push(ServerMessage::StreamAdd { id: self.stream, items });
        }
        self.push(ServerMessage::StreamInitialize { id: self.stream });
    }

    fn added(&mut self, items: &[T]) {
        if let Some(items) = self.items(items) {
            self.push(ServerMessage::StreamAdd { id: self.stream, items });
        }
    }

    fn updated(&mut self, items: &[T]) {
        if let Some(items) = self.items(items) {
            self.push(ServerMessage::StreamUpdate { id: self.stream, items });
        }
    }

    fn removed(&mut self, ids: &[Id]) {
        self.push(ServerMessage::StreamRemove {
            id: self.stream,
            ids: ids.to_vec(),
        });
    }

    fn cleared(&mut self) {
        self.push(ServerMessage::StreamClear { id: self.stream });
    }
}

enum SessionHandle {
    Hotels(StreamHandle<Hotel>),
    Reservations(StreamHandle<Reservation>),
}

impl SessionHandle {
    fn stream_id(&self) -> StreamId {
        match self {
            SessionHandle::Hotels(h) => h.id(),
            SessionHandle::Reservations(h) => h.id(),
        }
    }
}

/// Dropping it disconnects the stream; the integrator prunes it on its
/// next pass.
struct SessionStream {
    _observer: Rc<RefCell<SessionObserver>>,
    handle: SessionHandle,
}

struct Session {
    outbox: mpsc::UnboundedSender<ServerMessage>,
    streams: HashMap<ClientStreamId, SessionStream>,
    tasks: Vec<(u64, Task)>,
}

type FinishedTask = (SessionId, u64, Result<Vec<OperationResult>, TaskError>);

struct Hub {
    source: DataSource,
    sessions: HashMap<SessionId, Session>,
}

impl Hub {
    fn new(source: DataSource) -> Self {
        Self {
            source,
            sessions: HashMap::new(),
        }
    }

    fn run(mut self, mut rx: mpsc::UnboundedReceiver<HubCommand>) {
        'outer: loop {
            loop {
                match rx.try_recv() {
                    Ok(HubCommand::Shutdown) => break 'outer,
                    Ok(cmd) => self.handle(cmd),
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => break 'outer,
                }
            }

            // Tasks resolve after their differentials are queued, so every
            // task finished now has its changes in this integration pass.
            let finished = self.take_finished_tasks();
            self.source.process_integration_queue();
            self.report(finished);

            self.source.wait_for_changes(IDLE_WAIT);
        }

        self.source.shutdown();
        let finished = self.take_finished_tasks();
        self.report(finished);
        self.sessions.clear();
        metrics::gauge!(observability::SESSIONS_ACTIVE).set(0.0);
        info!("hub stopped");
    }

    fn handle(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Connect { session, outbox } => {
                self.sessions.insert(
                    session,
                    Session {
                        outbox,
                        streams: HashMap::new(),
                        tasks: Vec::new(),
                    },
                );
                metrics::gauge!(observability::SESSIONS_ACTIVE).set(self.sessions.len() as f64);
                debug!(session, "session connected");
            }
            HubCommand::CreateStream {
                session,
                id,
                kind,
                filter,
            } => self.create_stream(session, id, kind, filter),
            HubCommand::RemoveStream { session, id } => {
                let Some(s) = self.sessions.get_mut(&session) else {
                    return;
                };
                match s.streams.remove(&id) {
                    Some(stream) => {
                        debug!(session, stream = id, source_stream = stream.handle.stream_id(), "stream removed");
                    }
                    None => {
                        let _ = s.outbox.send(ServerMessage::Error {
                            message: format!("no stream with id {id}"),
                        });
                    }
                }
            }
            HubCommand::Schedule {
                session,
                id,
                operations,
            } => {
                let Some(s) = self.sessions.get_mut(&session) else {
                    return;
                };
                debug!(session, task = id, operations = operations.len(), "batch scheduled");
                let task = self.source.queue_operations(operations);
                s.tasks.push((id, task));
            }
            HubCommand::Disconnect { session } => {
                if self.sessions.remove(&session).is_some() {
                    metrics::gauge!(observability::SESSIONS_ACTIVE).set(self.sessions.len() as f64);
                    debug!(session, "session disconnected");
                }
            }
            HubCommand::Shutdown => {}
        }
    }

    fn create_stream(&mut self, session: SessionId, id: ClientStreamId, kind: EntityKind, filter: StreamFilter) {
        let Some(s) = self.sessions.get_mut(&session) else {
            return;
        };
        let refusal = if s.streams.contains_key(&id) {
            Some(format!("stream id {id} already in use"))
        } else if s.streams.len() >= limits::MAX_STREAMS_PER_SESSION {
            Some(format!(
                "at most {} streams per session",
                limits::MAX_STREAMS_PER_SESSION
            ))
        } else {
            None
        };
        if let Some(message) = refusal {
            warn!(session, stream = id, "{message}");
            let _ = s.outbox.send(ServerMessage::Error { message });
            return;
        }

        let observer = Rc::new(RefCell::new(SessionObserver {
            stream: id,
            outbox: s.outbox.clone(),
        }));
        let handle = match kind {
            EntityKind::Hotel => SessionHandle::Hotels(self.source.connect_stream_with(&observer, filter)),
            EntityKind::Reservation => {
                SessionHandle::Reservations(self.source.connect_stream_with(&observer, filter))
            }
        };
        s.streams.insert(
            id,
            SessionStream {
                _observer: observer,
                handle,
            },
        );
        debug!(session, stream = id, %kind, "stream created");
    }

    fn report(&self, finished: Vec<FinishedTask>) {
        for (session, id, result) in finished {
            if let Some(s) = self.sessions.get(&session) {
                let _ = s.outbox.send(ServerMessage::task_results(id, result));
            }
        }
    }

    fn take_finished_tasks(&mut self) -> Vec<FinishedTask> {
        let mut finished = Vec::new();
        for (session, s) in &mut self.sessions {
            s.tasks.retain(|(id, task)| match task.try_result() {
                Some(result) => {
                    finished.push((*session, *id, result));
                    false
                }
                None => true,
            });
        }
        finished
    }
}
