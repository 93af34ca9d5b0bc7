//! Per-tick health checks: is the child still alive, and has it written
//! more output than the job is allowed.
//!
//! The process check is a signal-0 delivery — harmless, idempotent, and
//! it never touches the child. Timeout takes precedence: a job past its
//! wall-clock deadline reports `Timeout` even while the process lives.

use std::io;
use std::path::Path;
use std::time::SystemTime;

use thiserror::Error;

/// Why a process check did not come back clean.
#[derive(Debug, Error)]
pub enum CheckError {
    /// The execution's wall-clock deadline has passed.
    #[error("job exceeded its wall-clock deadline")]
    Timeout,

    /// The PID no longer names a live process.
    #[error("process is no longer running")]
    ProcessGone,

    /// The probe itself failed; the process may or may not be alive.
    #[error("process probe failed: {0}")]
    Probe(#[source] io::Error),
}

/// Contract for probing a single job's child process.
pub trait ProcessChecker: Send {
    /// Returns `Ok(())` while the child is alive and within its deadline.
    fn check(&self) -> Result<(), CheckError>;
}

/// Production checker: deadline comparison plus `kill(pid, 0)`.
#[derive(Debug)]
pub struct SignalChecker {
    pid: i32,
    deadline: SystemTime,
}

impl SignalChecker {
    pub fn new(pid: i32, deadline: SystemTime) -> Self {
        SignalChecker { pid, deadline }
    }
}

impl ProcessChecker for SignalChecker {
    fn check(&self) -> Result<(), CheckError> {
        if SystemTime::now() >= self.deadline {
            return Err(CheckError::Timeout);
        }

        // SAFETY: kill(2) with signal 0 performs existence and permission
        // checks only; no signal is delivered.
        let ret = unsafe { libc::kill(self.pid as libc::pid_t, 0) };
        if ret == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            // ESRCH: no such process — the expected way for a job to end.
            Some(libc::ESRCH) => Err(CheckError::ProcessGone),
            // Anything else (EPERM included: a live PID that is not ours)
            // means the probe could not establish liveness.
            _ => Err(CheckError::Probe(err)),
        }
    }
}

/// Output size guard: a missing (or unreadable) file is no violation; an
/// existing file is fine up to and including `max_bytes`.
pub fn output_size_ok(path: &Path, max_bytes: u64) -> bool {
    std::fs::metadata(path)
        .map(|m| m.len() <= max_bytes)
        .unwrap_or(true)
}
