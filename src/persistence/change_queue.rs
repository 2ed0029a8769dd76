use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::stream::{StreamDifferential, StreamEvent};

/// Hand-off point between the worker and the consuming thread.
///
/// Differentials flow worker → consumer, stream events flow consumer →
/// worker. Each direction has its own lock, held only to append or to swap
/// the buffer out.
#[derive(Debug, Default)]
pub struct ChangeQueue {
    changes: Mutex<Vec<StreamDifferential>>,
    available: Condvar,
    /// Set under the `changes` lock so a wake between two waits is not lost.
    woken: AtomicBool,
    generation: AtomicU64,
    events: Mutex<Vec<StreamEvent>>,
}

impl ChangeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append differentials in order and wake waiting consumers.
    pub fn add_changes(&self, changes: Vec<StreamDifferential>) {
        if changes.is_empty() {
            return;
        }
        let mut guard = self.changes.lock();
        guard.extend(changes);
        self.generation.fetch_add(1, Ordering::Release);
        drop(guard);
        self.available.notify_all();
    }

    /// Swap out everything queued so far.
    pub fn take_changes(&self) -> Vec<StreamDifferential> {
        std::mem::take(&mut *self.changes.lock())
    }

    pub fn has_changes(&self) -> bool {
        !self.changes.lock().is_empty()
    }

    /// Bumped once per non-empty [`ChangeQueue::add_changes`].
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Interrupt the current or next [`ChangeQueue::wait_for_changes`]
    /// without queuing anything.
    pub fn wake(&self) {
        let guard = self.changes.lock();
        self.woken.store(true, Ordering::Release);
        drop(guard);
        self.available.notify_all();
    }

    /// Block until differentials are queued, [`ChangeQueue::wake`] is
    /// called or `timeout` passes. Returns whether differentials are queued.
    pub fn wait_for_changes(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.changes.lock();
        while guard.is_empty() && !self.woken.swap(false, Ordering::AcqRel) {
            if self.available.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        self.woken.store(false, Ordering::Release);
        !guard.is_empty()
    }

    pub fn add_stream_event(&self, event: StreamEvent) {
        self.events.lock().push(event);
    }

    pub fn take_stream_events(&self) -> Vec<StreamEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}
