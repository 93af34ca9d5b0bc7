//! Fixed-delay scheduling of job monitors.
//!
//! Each monitor runs on its own named thread: tick, and while the tick
//! says `Continue`, sleep the job's check delay measured from the moment
//! the tick returned. Fixed delay (not fixed rate) means ticks for one
//! job can never overlap, which is what lets the monitor go lock-free.
//!
//! Monitors are memory-resident only. On supervisor restart they are
//! gone; the persistence layer remains the system of record.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::events::{JobEventListener, JobFinished};
use crate::monitor::{JobMonitor, TickOutcome};

#[derive(Debug, Error)]
pub enum ScheduleError {
    /// At most one monitor may exist per job at a time.
    #[error("a monitor for job {0} is already scheduled")]
    AlreadyScheduled(String),

    #[error("failed to spawn monitor thread: {0}")]
    Spawn(#[from] io::Error),
}

struct MonitorHandle {
    stop: Arc<AtomicBool>,
    thread: thread::JoinHandle<()>,
}

/// Owns the monitor threads for every job on this node.
#[derive(Default)]
pub struct MonitorScheduler {
    monitors: Mutex<HashMap<String, MonitorHandle>>,
}

impl MonitorScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start ticking `monitor` every `check_delay`, measured from tick
    /// return. Fails when a live monitor for the same job already exists.
    pub fn schedule(
        &self,
        mut monitor: JobMonitor,
        check_delay: Duration,
    ) -> Result<(), ScheduleError> {
        let job_id = monitor.job_id().to_string();
        let mut monitors = self.monitors.lock().expect("scheduler poisoned");

        if let Some(existing) = monitors.get(&job_id) {
            if !existing.thread.is_finished() {
                return Err(ScheduleError::AlreadyScheduled(job_id));
            }
            // Stale handle from a finished monitor; replace it.
            monitors.remove(&job_id);
        }

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let thread_job_id = job_id.clone();
        let thread = thread::Builder::new()
            .name(format!("job-monitor-{job_id}"))
            .spawn(move || {
                debug!(job_id = %thread_job_id, delay_ms = check_delay.as_millis() as u64, "monitor started");
                loop {
                    if stop_flag.load(Ordering::Relaxed) {
                        debug!(job_id = %thread_job_id, "monitor descheduled");
                        break;
                    }
                    if monitor.tick() == TickOutcome::Stop {
                        debug!(job_id = %thread_job_id, "monitor reached terminal state");
                        break;
                    }
                    thread::sleep(check_delay);
                }
            })?;

        monitors.insert(job_id, MonitorHandle { stop, thread });
        Ok(())
    }

    /// Stop tracking `job_id` and flag its thread to wind down.
    ///
    /// Does not join: this is called from the monitor's own thread when a
    /// terminal event fans out through the bus to the [`MonitorReaper`].
    pub fn deschedule(&self, job_id: &str) {
        let removed = self
            .monitors
            .lock()
            .expect("scheduler poisoned")
            .remove(job_id);
        if let Some(handle) = removed {
            handle.stop.store(true, Ordering::Relaxed);
            debug!(job_id, "monitor removed from schedule");
        }
    }

    /// Whether a live monitor exists for `job_id`.
    pub fn is_scheduled(&self, job_id: &str) -> bool {
        self.monitors
            .lock()
            .expect("scheduler poisoned")
            .get(job_id)
            .map(|h| !h.thread.is_finished())
            .unwrap_or(false)
    }

    /// Stop every monitor and wait for the threads to exit.
    pub fn shutdown(&self) {
        let handles: Vec<(String, MonitorHandle)> = self
            .monitors
            .lock()
            .expect("scheduler poisoned")
            .drain()
            .collect();

        for (_, handle) in &handles {
            handle.stop.store(true, Ordering::Relaxed);
        }
        for (job_id, handle) in handles {
            if handle.thread.join().is_err() {
                warn!(job_id = %job_id, "monitor thread panicked");
            }
        }
        info!("monitor scheduler shut down");
    }
}

/// Bus listener that tears a monitor down once its job is observed
/// finished, wherever the finished event came from.
pub struct MonitorReaper {
    scheduler: Arc<MonitorScheduler>,
}

impl MonitorReaper {
    pub fn new(scheduler: Arc<MonitorScheduler>) -> Self {
        MonitorReaper { scheduler }
    }
}

impl JobEventListener for MonitorReaper {
    fn on_job_finished(&self, event: &JobFinished) {
        self.scheduler.deschedule(&event.job_id);
    }
}
