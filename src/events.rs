//! Lifecycle events and the in-process bus that carries them.
//!
//! Two event kinds flow through the supervisor. `KillJob` is a request:
//! the launcher owns the child and does the actual signalling, then emits
//! a `JobFinished(Killed)` of its own. `JobFinished` is the terminal
//! signal the completion handler acts on.
//!
//! Delivery is synchronous fan-out to listeners in registration order, on
//! the publisher's thread. There are no retries and nothing is persisted;
//! the completion handler's idempotence gate is what makes re-delivery
//! safe.

use std::sync::{Arc, RwLock};

use tracing::debug;

/// Why a job finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobFinishedReason {
    /// The child exited on its own — the expected path.
    ProcessCompleted,
    Killed,
    FailedToInit,
    Invalid,
}

/// Terminal event for one job. Emitted once by the monitor (or by the
/// launcher after a kill) and consumed by the completion handler.
#[derive(Debug, Clone)]
pub struct JobFinished {
    pub job_id: String,
    pub reason: JobFinishedReason,
    pub message: String,
    /// Component that published the event.
    pub source: &'static str,
}

/// Request to kill a running job. Does not itself transition persisted
/// status; the `JobFinished` that follows the kill does.
#[derive(Debug, Clone)]
pub struct KillJob {
    pub job_id: String,
    pub reason: String,
    pub source: &'static str,
}

/// Receiver side of the bus. Implementations override the kinds they
/// care about; the defaults ignore everything.
pub trait JobEventListener: Send + Sync {
    fn on_job_finished(&self, _event: &JobFinished) {}
    fn on_kill_job(&self, _event: &KillJob) {}
}

/// Synchronous publish/subscribe registry.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<Arc<dyn JobEventListener>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. Listeners are invoked in registration order.
    pub fn subscribe(&self, listener: Arc<dyn JobEventListener>) {
        self.listeners
            .write()
            .expect("event bus poisoned")
            .push(listener);
    }

    pub fn publish_job_finished(&self, event: &JobFinished) {
        debug!(job_id = %event.job_id, reason = ?event.reason, source = event.source, "job finished");
        for listener in self.listeners_snapshot() {
            listener.on_job_finished(event);
        }
    }

    pub fn publish_kill_job(&self, event: &KillJob) {
        debug!(job_id = %event.job_id, reason = %event.reason, source = event.source, "kill requested");
        for listener in self.listeners_snapshot() {
            listener.on_kill_job(event);
        }
    }

    // Snapshot before delivering: a listener is allowed to publish a
    // follow-up event from inside its callback, which must not reacquire
    // the listener lock.
    fn listeners_snapshot(&self) -> Vec<Arc<dyn JobEventListener>> {
        self.listeners.read().expect("event bus poisoned").clone()
    }
}
