//! Per-job monitor: one `tick()` per schedule slot, one branch per tick.
//!
//! A tick probes the child, enforces the output limits, and on any
//! terminal condition publishes lifecycle events. The monitor never
//! touches persisted state — kills are requests the launcher carries out,
//! and status transitions belong to the completion handler.
//!
//! Ticks for one job never overlap (the scheduler re-arms only after a
//! tick returns), so `error_count` needs no synchronization.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::check::{output_size_ok, CheckError, ProcessChecker};
use crate::events::{EventBus, JobFinished, JobFinishedReason, KillJob};
use crate::metrics::{names, MetricsRegistry};

/// Probe failures tolerated before the job is forcibly finished; the
/// failure after this many (the sixth in a row) escalates.
pub const MAX_CONSECUTIVE_PROBE_ERRORS: u32 = 5;

const EVENT_SOURCE: &str = "job-monitor";

/// What the scheduler should do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Re-arm after the job's check delay.
    Continue,
    /// A terminal event was published; stop ticking this job.
    Stop,
}

/// Watches a single running job.
pub struct JobMonitor {
    job_id: String,
    checker: Box<dyn ProcessChecker>,
    stdout_path: PathBuf,
    stderr_path: PathBuf,
    max_stdout_bytes: u64,
    max_stderr_bytes: u64,
    bus: Arc<EventBus>,
    metrics: Arc<MetricsRegistry>,
    /// Consecutive probe failures; reset on every successful probe.
    error_count: u32,
}

impl JobMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_id: impl Into<String>,
        checker: Box<dyn ProcessChecker>,
        stdout_path: PathBuf,
        stderr_path: PathBuf,
        max_stdout_bytes: u64,
        max_stderr_bytes: u64,
        bus: Arc<EventBus>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        JobMonitor {
            job_id: job_id.into(),
            checker,
            stdout_path,
            stderr_path,
            max_stdout_bytes,
            max_stderr_bytes,
            bus,
            metrics,
            error_count: 0,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Run one probe cycle. Exactly one of the four branches executes.
    pub fn tick(&mut self) -> TickOutcome {
        match self.checker.check() {
            Ok(()) => self.on_alive(),
            Err(CheckError::Timeout) => {
                self.metrics.increment(names::TIMEOUT);
                warn!(job_id = %self.job_id, "job exceeded its timeout, requesting kill");
                self.request_kill("Job exceeded timeout");
                TickOutcome::Stop
            }
            Err(CheckError::ProcessGone) => {
                self.metrics.increment(names::FINISHED);
                debug!(job_id = %self.job_id, "process detected complete");
                self.publish_finished(JobFinishedReason::ProcessCompleted, "Process detected complete");
                TickOutcome::Stop
            }
            Err(CheckError::Probe(err)) => self.on_probe_error(&err),
        }
    }

    fn on_alive(&mut self) -> TickOutcome {
        self.error_count = 0;

        if !output_size_ok(&self.stdout_path, self.max_stdout_bytes) {
            self.metrics.increment(names::STDOUT_TOO_LARGE);
            warn!(job_id = %self.job_id, "stdout limit exceeded, requesting kill");
            self.request_kill("Std out length exceeded");
            return TickOutcome::Stop;
        }
        if !output_size_ok(&self.stderr_path, self.max_stderr_bytes) {
            self.metrics.increment(names::STDERR_TOO_LARGE);
            warn!(job_id = %self.job_id, "stderr limit exceeded, requesting kill");
            self.request_kill("Std err length exceeded");
            return TickOutcome::Stop;
        }

        self.metrics.increment(names::SUCCESSFUL_STATUS_CHECK);
        TickOutcome::Continue
    }

    fn on_probe_error(&mut self, err: &std::io::Error) -> TickOutcome {
        self.metrics.increment(names::UNSUCCESSFUL_STATUS_CHECK);
        self.error_count += 1;
        warn!(
            job_id = %self.job_id,
            consecutive = self.error_count,
            error = %err,
            "process status check failed"
        );

        if self.error_count > MAX_CONSECUTIVE_PROBE_ERRORS {
            // The probe may keep failing forever, so the kill request alone
            // is not enough: publish the finished event ourselves as well.
            let message = format!(
                "couldn't check process status {} times",
                self.error_count
            );
            self.request_kill(&message);
            self.publish_finished(JobFinishedReason::Killed, &message);
            return TickOutcome::Stop;
        }
        TickOutcome::Continue
    }

    fn request_kill(&self, reason: &str) {
        self.bus.publish_kill_job(&KillJob {
            job_id: self.job_id.clone(),
            reason: reason.to_string(),
            source: EVENT_SOURCE,
        });
    }

    fn publish_finished(&self, reason: JobFinishedReason, message: &str) {
        self.bus.publish_job_finished(&JobFinished {
            job_id: self.job_id.clone(),
            reason,
            message: message.to_string(),
            source: EVENT_SOURCE,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::JobEventListener;
    use std::collections::VecDeque;
    use std::io::Write;
    use std::path::Path;
    use std::sync::Mutex;

    /// Checker fed from a script of outcomes; repeats the last entry.
    struct ScriptedChecker {
        script: Mutex<VecDeque<Result<(), &'static str>>>,
    }

    impl ScriptedChecker {
        fn new(outcomes: Vec<Result<(), &'static str>>) -> Box<Self> {
            Box::new(ScriptedChecker {
                script: Mutex::new(outcomes.into()),
            })
        }
    }

    impl ProcessChecker for ScriptedChecker {
        fn check(&self) -> Result<(), CheckError> {
            let mut script = self.script.lock().unwrap();
            let outcome = if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                *script.front().expect("script must not be empty")
            };
            match outcome {
                Ok(()) => Ok(()),
                Err("timeout") => Err(CheckError::Timeout),
                Err("gone") => Err(CheckError::ProcessGone),
                Err(_) => Err(CheckError::Probe(std::io::Error::other("probe failed"))),
            }
        }
    }

    #[derive(Default)]
    struct EventRecorder {
        finished: Mutex<Vec<JobFinished>>,
        kills: Mutex<Vec<KillJob>>,
    }

    impl JobEventListener for EventRecorder {
        fn on_job_finished(&self, event: &JobFinished) {
            self.finished.lock().unwrap().push(event.clone());
        }
        fn on_kill_job(&self, event: &KillJob) {
            self.kills.lock().unwrap().push(event.clone());
        }
    }

    struct Fixture {
        bus: Arc<EventBus>,
        metrics: Arc<MetricsRegistry>,
        recorder: Arc<EventRecorder>,
    }

    impl Fixture {
        fn new() -> Self {
            let bus = Arc::new(EventBus::new());
            let recorder = Arc::new(EventRecorder::default());
            bus.subscribe(recorder.clone());
            Fixture {
                bus,
                metrics: Arc::new(MetricsRegistry::new()),
                recorder,
            }
        }

        fn monitor_with(
            &self,
            checker: Box<dyn ProcessChecker>,
            stdout_path: &Path,
            max_stdout: u64,
        ) -> JobMonitor {
            JobMonitor::new(
                "job-1",
                checker,
                stdout_path.to_path_buf(),
                PathBuf::from("/nonexistent/stderr"),
                max_stdout,
                u64::MAX,
                self.bus.clone(),
                self.metrics.clone(),
            )
        }

        fn monitor(&self, checker: Box<dyn ProcessChecker>) -> JobMonitor {
            self.monitor_with(checker, Path::new("/nonexistent/stdout"), u64::MAX)
        }
    }

    #[test]
    fn alive_process_continues() {
        let fx = Fixture::new();
        let mut monitor = fx.monitor(ScriptedChecker::new(vec![Ok(())]));

        assert_eq!(monitor.tick(), TickOutcome::Continue);
        assert_eq!(monitor.tick(), TickOutcome::Continue);
        assert_eq!(fx.metrics.value(names::SUCCESSFUL_STATUS_CHECK), 2);
        assert!(fx.recorder.kills.lock().unwrap().is_empty());
        assert!(fx.recorder.finished.lock().unwrap().is_empty());
    }

    #[test]
    fn process_gone_publishes_finished_once() {
        let fx = Fixture::new();
        let mut monitor = fx.monitor(ScriptedChecker::new(vec![Ok(()), Err("gone")]));

        assert_eq!(monitor.tick(), TickOutcome::Continue);
        assert_eq!(monitor.tick(), TickOutcome::Stop);

        assert_eq!(fx.metrics.value(names::FINISHED), 1);
        let finished = fx.recorder.finished.lock().unwrap();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].reason, JobFinishedReason::ProcessCompleted);
        assert_eq!(finished[0].message, "Process detected complete");
    }

    #[test]
    fn timeout_requests_kill() {
        let fx = Fixture::new();
        let mut monitor = fx.monitor(ScriptedChecker::new(vec![Err("timeout")]));

        assert_eq!(monitor.tick(), TickOutcome::Stop);
        assert_eq!(fx.metrics.value(names::TIMEOUT), 1);

        let kills = fx.recorder.kills.lock().unwrap();
        assert_eq!(kills.len(), 1);
        assert_eq!(kills[0].reason, "Job exceeded timeout");
        // A kill is a request; the monitor itself publishes no finished event.
        assert!(fx.recorder.finished.lock().unwrap().is_empty());
    }

    #[test]
    fn stdout_over_limit_requests_kill() {
        let dir = tempfile::tempdir().unwrap();
        let stdout_path = dir.path().join("stdout");
        let mut f = std::fs::File::create(&stdout_path).unwrap();
        f.write_all(&[0u8; 101]).unwrap();

        let fx = Fixture::new();
        let mut monitor = fx.monitor_with(ScriptedChecker::new(vec![Ok(())]), &stdout_path, 100);

        assert_eq!(monitor.tick(), TickOutcome::Stop);
        assert_eq!(fx.metrics.value(names::STDOUT_TOO_LARGE), 1);
        assert_eq!(fx.metrics.value(names::SUCCESSFUL_STATUS_CHECK), 0);
        assert_eq!(
            fx.recorder.kills.lock().unwrap()[0].reason,
            "Std out length exceeded"
        );
    }

    #[test]
    fn stdout_at_exact_limit_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let stdout_path = dir.path().join("stdout");
        let mut f = std::fs::File::create(&stdout_path).unwrap();
        f.write_all(&[0u8; 100]).unwrap();

        let fx = Fixture::new();
        let mut monitor = fx.monitor_with(ScriptedChecker::new(vec![Ok(())]), &stdout_path, 100);

        assert_eq!(monitor.tick(), TickOutcome::Continue);
        assert_eq!(fx.metrics.value(names::STDOUT_TOO_LARGE), 0);
        assert_eq!(fx.metrics.value(names::SUCCESSFUL_STATUS_CHECK), 1);
    }

    #[test]
    fn probe_errors_escalate_on_the_sixth() {
        let fx = Fixture::new();
        let mut monitor = fx.monitor(ScriptedChecker::new(vec![Err("io")]));

        for n in 1..=MAX_CONSECUTIVE_PROBE_ERRORS {
            assert_eq!(monitor.tick(), TickOutcome::Continue, "tick {n}");
        }
        assert_eq!(monitor.tick(), TickOutcome::Stop);

        assert_eq!(fx.metrics.value(names::UNSUCCESSFUL_STATUS_CHECK), 6);
        let kills = fx.recorder.kills.lock().unwrap();
        let finished = fx.recorder.finished.lock().unwrap();
        assert_eq!(kills.len(), 1);
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].reason, JobFinishedReason::Killed);
        assert_eq!(kills[0].reason, "couldn't check process status 6 times");
        assert_eq!(finished[0].message, kills[0].reason);
    }

    #[test]
    fn successful_probe_resets_error_count() {
        let fx = Fixture::new();
        // Five failures, one success, then failures again: the success
        // must restart the count, so five more failures still continue.
        let mut script: Vec<Result<(), &'static str>> = vec![Err("io"); 5];
        script.push(Ok(()));
        script.extend(vec![Err("io"); 5]);
        let mut monitor = fx.monitor(ScriptedChecker::new(script));

        for n in 1..=11 {
            assert_eq!(monitor.tick(), TickOutcome::Continue, "tick {n}");
        }
        // The twelfth tick is the sixth consecutive failure.
        assert_eq!(monitor.tick(), TickOutcome::Stop);
    }
}
