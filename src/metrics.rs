//! Named monotonic counters, bumped at every branch of the supervision
//! pipeline.
//!
//! The registry is deliberately tiny: get-or-create by name, atomic
//! increments, readable values. Counter names are stable — dashboards and
//! the test suite key on them — so they live here as constants.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Stable counter names.
pub mod names {
    pub const SUCCESSFUL_STATUS_CHECK: &str = "successfulStatusCheck";
    pub const UNSUCCESSFUL_STATUS_CHECK: &str = "unsuccessfulStatusCheck";
    pub const TIMEOUT: &str = "timeout";
    pub const FINISHED: &str = "finished";
    pub const STDOUT_TOO_LARGE: &str = "stdOutTooLarge";
    pub const STDERR_TOO_LARGE: &str = "stdErrTooLarge";
    pub const EMAIL_SUCCESS: &str = "email.success";
    pub const EMAIL_FAILURE: &str = "email.failure";
    pub const ARCHIVAL_FAILURE: &str = "archivalFailure";
    pub const DONE_FILE_PROCESSING_FAILURE: &str = "doneFileProcessingFailure";
    pub const FINAL_STATUS_UPDATE_FAILURE: &str = "finalStatusUpdateFailure";
    pub const PROCESS_GROUP_CLEANUP_FAILURE: &str = "processGroupCleanupFailure";
    pub const ARCHIVE_FILE_DELETION_FAILURE: &str = "archiveFileDeletionFailure";
    pub const DELETE_DEPENDENCIES_FAILURE: &str = "deleteDependenciesFailure";
}

/// Thread-safe registry of named counters.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    counters: Mutex<HashMap<String, Arc<AtomicU64>>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the counter registered under `name`.
    pub fn counter(&self, name: &str) -> Arc<AtomicU64> {
        let mut counters = self.counters.lock().expect("metrics registry poisoned");
        counters
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .clone()
    }

    /// Bump `name` by one.
    pub fn increment(&self, name: &str) {
        self.counter(name).fetch_add(1, Ordering::Relaxed);
    }

    /// Current value of `name`; 0 when the counter was never touched.
    pub fn value(&self, name: &str) -> u64 {
        let counters = self.counters.lock().expect("metrics registry poisoned");
        counters
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Snapshot of every registered counter, for export or logging.
    pub fn snapshot(&self) -> Vec<(String, u64)> {
        let counters = self.counters.lock().expect("metrics registry poisoned");
        let mut out: Vec<(String, u64)> = counters
            .iter()
            .map(|(name, c)| (name.clone(), c.load(Ordering::Relaxed)))
            .collect();
        out.sort();
        out
    }
}
