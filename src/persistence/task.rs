use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::op::OperationResult;
use crate::storage::StorageError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The batch failed inside storage and was rolled back.
    Storage(StorageError),
    /// Submitted after shutdown began; never reached the worker.
    ShuttingDown,
    /// Queued but discarded because the worker stopped first.
    Aborted,
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskError::Storage(e) => write!(f, "storage failure: {e}"),
            TaskError::ShuttingDown => write!(f, "data source is shutting down"),
            TaskError::Aborted => write!(f, "task aborted before execution"),
        }
    }
}

impl std::error::Error for TaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TaskError::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StorageError> for TaskError {
    fn from(e: StorageError) -> Self {
        TaskError::Storage(e)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Executing,
    Completed(Vec<OperationResult>),
    Failed(TaskError),
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed(_) | TaskState::Failed(_))
    }

    fn result(&self) -> Option<Result<Vec<OperationResult>, TaskError>> {
        match self {
            TaskState::Completed(results) => Some(Ok(results.clone())),
            TaskState::Failed(e) => Some(Err(e.clone())),
            TaskState::Pending | TaskState::Executing => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

#[derive(Debug)]
struct TaskShared {
    id: u64,
    state: Mutex<TaskState>,
    done: Condvar,
}

/// Observer side of one submitted batch. Cheap to clone; every clone sees the
/// same state. Resolution happens exactly once.
#[derive(Debug, Clone)]
pub struct Task {
    shared: Arc<TaskShared>,
}

impl Task {
    pub(crate) fn new(id: u64) -> (Task, TaskCompleter) {
        let shared = Arc::new(TaskShared {
            id,
            state: Mutex::new(TaskState::Pending),
            done: Condvar::new(),
        });
        let completer = TaskCompleter {
            shared: Arc::clone(&shared),
        };
        (Task { shared }, completer)
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn state(&self) -> TaskState {
        self.shared.state.lock().clone()
    }

    pub fn status(&self) -> TaskStatus {
        match *self.shared.state.lock() {
            TaskState::Pending => TaskStatus::Pending,
            TaskState::Executing => TaskStatus::Executing,
            TaskState::Completed(_) => TaskStatus::Completed,
            TaskState::Failed(_) => TaskStatus::Failed,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.shared.state.lock().is_terminal()
    }

    /// The outcome if the task has resolved, without blocking.
    pub fn try_result(&self) -> Option<Result<Vec<OperationResult>, TaskError>> {
        self.shared.state.lock().result()
    }

    /// Block until the worker has executed (or discarded) the batch.
    /// Integration of its differentials is a separate step.
    pub fn wait_for_completion(&self) -> Result<Vec<OperationResult>, TaskError> {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(result) = state.result() {
                return result;
            }
            self.shared.done.wait(&mut state);
        }
    }

    /// Like [`Task::wait_for_completion`] but gives up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<Vec<OperationResult>, TaskError>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while !state.is_terminal() {
            if self.shared.done.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.result()
    }
}

/// Worker side of a task. Dropping it unresolved fails the task as
/// [`TaskError::Aborted`].
#[derive(Debug)]
pub(crate) struct TaskCompleter {
    shared: Arc<TaskShared>,
}

impl TaskCompleter {
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn start(&self) {
        let mut state = self.shared.state.lock();
        if matches!(*state, TaskState::Pending) {
            *state = TaskState::Executing;
        }
    }

    pub fn complete(self, results: Vec<OperationResult>) {
        self.resolve(TaskState::Completed(results));
    }

    pub fn fail(self, error: TaskError) {
        self.resolve(TaskState::Failed(error));
    }

    fn resolve(&self, outcome: TaskState) {
        let mut state = self.shared.state.lock();
        if state.is_terminal() {
            return;
        }
        *state = outcome;
        drop(state);
        self.shared.done.notify_all();
    }
}

impl Drop for TaskCompleter {
    fn drop(&mut self) {
        self.resolve(TaskState::Failed(TaskError::Aborted));
    }
}
