//! The completion handler: consumes `JobFinished` events and runs the
//! post-mortem pipeline.
//!
//! The pipeline is deterministic and deliberately forgiving: every step
//! is its own error boundary, counted in metrics and swallowed, so a
//! failed archive never blocks the email and a persistence outage never
//! loses the event. The single fatal condition is not being able to read
//! the job's current status at entry — without it the idempotence gate
//! cannot run, and the handler gives up on that delivery.
//!
//! Re-delivery is safe: once a job reaches a terminal status the handler
//! is a no-op, which also guarantees at most one notification email.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{debug, error, info, warn};

use crate::config::SupervisorConfig;
use crate::donefile::{done_file_path, read_done_file};
use crate::events::{JobEventListener, JobFinished, JobFinishedReason};
use crate::exec::CommandExecutor;
use crate::metrics::{names, MetricsRegistry};
use crate::services::{FileTransferService, MailService, PersistenceService, SearchService};
use crate::types::JobStatus;

/// Message persisted when the done file cannot be read.
pub const DONE_FILE_LOAD_FAILURE_MESSAGE: &str = "Genie could not load done file.";

/// Fixed prefix of the notification subject; the job id follows it.
pub const EMAIL_SUBJECT_PREFIX: &str = "Genie Job ";

/// Consumes `JobFinished` events and transitions jobs to rest.
pub struct JobCompletionHandler {
    config: SupervisorConfig,
    persistence: Arc<dyn PersistenceService>,
    search: Arc<dyn SearchService>,
    file_transfer: Arc<dyn FileTransferService>,
    mail: Arc<dyn MailService>,
    executor: Arc<dyn CommandExecutor>,
    metrics: Arc<MetricsRegistry>,
}

impl JobCompletionHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SupervisorConfig,
        persistence: Arc<dyn PersistenceService>,
        search: Arc<dyn SearchService>,
        file_transfer: Arc<dyn FileTransferService>,
        mail: Arc<dyn MailService>,
        executor: Arc<dyn CommandExecutor>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        JobCompletionHandler {
            config,
            persistence,
            search,
            file_transfer,
            mail,
            executor,
            metrics,
        }
    }

    /// Run the full pipeline for one event.
    pub fn handle(&self, event: &JobFinished) {
        let job_id = event.job_id.as_str();

        let status = match self.search.get_job_status(job_id) {
            Ok(status) => status,
            Err(err) => {
                // Without the current status there is no idempotence gate;
                // nothing below is safe to run.
                error!(job_id, ?err, "cannot load job status, dropping event");
                return;
            }
        };

        if status.is_terminal() {
            debug!(job_id, %status, "job already finalized, nothing to do");
            return;
        }

        if status == JobStatus::Init {
            self.assign_terminal_status(event);
        } else if status == JobStatus::Running {
            self.finalize_from_done_file(job_id);
            self.clean_process_group(job_id);
        }

        self.process_working_dir(job_id);
        self.notify_submitter(job_id);
    }

    /// INIT jobs never ran, so the event reason is all there is to go on.
    fn assign_terminal_status(&self, event: &JobFinished) {
        let status = match event.reason {
            JobFinishedReason::ProcessCompleted => JobStatus::Succeeded,
            JobFinishedReason::Killed => JobStatus::Killed,
            JobFinishedReason::FailedToInit => JobStatus::Failed,
            JobFinishedReason::Invalid => JobStatus::Invalid,
        };
        if let Err(err) = self
            .persistence
            .update_job_status(&event.job_id, status, &event.message)
        {
            self.metrics.increment(names::FINAL_STATUS_UPDATE_FAILURE);
            error!(job_id = %event.job_id, %status, ?err, "failed to persist final status");
        }
    }

    /// RUNNING jobs carry their verdict in the done file.
    fn finalize_from_done_file(&self, job_id: &str) {
        let path = done_file_path(&self.config.base_working_dir, job_id);
        match read_done_file(&path) {
            Ok(done) => {
                debug!(job_id, exit_code = done.exit_code, "done file read");
                if let Err(err) = self.persistence.set_exit_code(job_id, done.exit_code) {
                    self.metrics.increment(names::FINAL_STATUS_UPDATE_FAILURE);
                    error!(job_id, ?err, "failed to persist exit code");
                }
            }
            Err(err) => {
                self.metrics.increment(names::DONE_FILE_PROCESSING_FAILURE);
                warn!(job_id, ?err, "done file unreadable, forcing FAILED");
                if let Err(err) = self.persistence.update_job_status(
                    job_id,
                    JobStatus::Failed,
                    DONE_FILE_LOAD_FAILURE_MESSAGE,
                ) {
                    self.metrics.increment(names::FINAL_STATUS_UPDATE_FAILURE);
                    error!(job_id, ?err, "failed to persist forced FAILED status");
                }
            }
        }
    }

    /// Safety net against orphans left behind by the wrapper script. The
    /// kill is expected to find nothing; finding something to kill means
    /// the wrapper did not clean up after itself.
    fn clean_process_group(&self, job_id: &str) {
        let execution = match self.search.get_job_execution(job_id) {
            Ok(execution) => execution,
            Err(err) => {
                self.metrics
                    .increment(names::PROCESS_GROUP_CLEANUP_FAILURE);
                error!(job_id, ?err, "cannot look up PID for process-group cleanup");
                return;
            }
        };

        let argv = vec![
            "pkill".to_string(),
            "-KILL".to_string(),
            "-g".to_string(),
            execution.process_id.to_string(),
        ];
        match self.executor.execute(&argv, None) {
            Ok(status) if status.success() => {
                self.metrics
                    .increment(names::PROCESS_GROUP_CLEANUP_FAILURE);
                warn!(
                    job_id,
                    pid = execution.process_id,
                    "process group outlived the wrapper and was killed here"
                );
            }
            Ok(_) => {
                debug!(job_id, pid = execution.process_id, "process group already gone");
            }
            Err(err) => {
                self.metrics
                    .increment(names::PROCESS_GROUP_CLEANUP_FAILURE);
                error!(job_id, ?err, "process-group kill could not be executed");
            }
        }
    }

    /// Archive the working directory and prune dependency trees.
    fn process_working_dir(&self, job_id: &str) {
        let job_dir = self.config.job_working_dir(job_id);
        if !job_dir.exists() {
            debug!(job_id, "no working directory on this node");
            return;
        }

        if self.config.delete_dependencies {
            self.delete_application_dependencies(job_id, &job_dir);
        }

        let job = match self.search.get_job(job_id) {
            Ok(job) => job,
            Err(err) => {
                self.metrics.increment(names::ARCHIVAL_FAILURE);
                error!(job_id, ?err, "cannot load job record for archival");
                return;
            }
        };
        let Some(location) = job
            .archive_location
            .as_deref()
            .filter(|l| !l.is_empty())
        else {
            debug!(job_id, "no archive location, skipping archival");
            return;
        };

        if let Err(err) = self.archive_working_dir(job_id, &job_dir, location) {
            self.metrics.increment(names::ARCHIVAL_FAILURE);
            error!(job_id, err = %format!("{err:#}"), "archival failed");
        }
    }

    fn delete_application_dependencies(&self, job_id: &str, job_dir: &Path) {
        let applications = match self.search.get_job_applications(job_id) {
            Ok(applications) => applications,
            Err(err) => {
                self.metrics.increment(names::DELETE_DEPENDENCIES_FAILURE);
                error!(job_id, ?err, "cannot resolve applications for dependency cleanup");
                return;
            }
        };

        for application in applications {
            let dependencies = job_dir
                .join("genie")
                .join("applications")
                .join(&application.id)
                .join("dependencies");
            if !dependencies.exists() {
                continue;
            }

            let mut argv = Vec::new();
            if self.config.run_as_user {
                argv.push("sudo".to_string());
            }
            argv.push("rm".to_string());
            argv.push("-rf".to_string());
            argv.push(dependencies.display().to_string());

            match self.executor.execute(&argv, None) {
                Ok(status) if status.success() => {
                    debug!(job_id, application = %application.id, "dependencies deleted");
                }
                Ok(status) => {
                    self.metrics.increment(names::DELETE_DEPENDENCIES_FAILURE);
                    warn!(
                        job_id,
                        application = %application.id,
                        %status,
                        "dependency deletion exited non-zero"
                    );
                }
                Err(err) => {
                    self.metrics.increment(names::DELETE_DEPENDENCIES_FAILURE);
                    error!(job_id, application = %application.id, ?err, "dependency deletion failed to run");
                }
            }
        }
    }

    fn archive_working_dir(&self, job_id: &str, job_dir: &Path, location: &str) -> Result<()> {
        let archive = job_dir
            .join("genie")
            .join("logs")
            .join(format!("{job_id}.tar.gz"));

        let argv = vec![
            "sudo".to_string(),
            "tar".to_string(),
            "-c".to_string(),
            "-z".to_string(),
            "-f".to_string(),
            archive.display().to_string(),
            "./".to_string(),
        ];
        let status = self
            .executor
            .execute(&argv, Some(job_dir))
            .context("launch tar")?;
        if !status.success() {
            bail!("tar exited with {status}");
        }

        self.file_transfer
            .put_file(&archive, location)
            .with_context(|| format!("upload archive to {location}"))?;
        info!(job_id, location, "working directory archived");

        if self.config.delete_archive_file {
            if let Err(err) = std::fs::remove_file(&archive) {
                self.metrics
                    .increment(names::ARCHIVE_FILE_DELETION_FAILURE);
                warn!(job_id, ?err, "local archive could not be deleted");
            }
        }
        Ok(())
    }

    fn notify_submitter(&self, job_id: &str) {
        let request = match self.search.get_job_request(job_id) {
            Ok(request) => request,
            Err(err) => {
                self.metrics.increment(names::EMAIL_FAILURE);
                error!(job_id, ?err, "cannot load job request for notification");
                return;
            }
        };
        let Some(email) = request.email.as_deref().filter(|e| !e.is_empty()) else {
            debug!(job_id, "no notification address on the request");
            return;
        };

        let status = match self.search.get_job_status(job_id) {
            Ok(status) => status,
            Err(err) => {
                self.metrics.increment(names::EMAIL_FAILURE);
                error!(job_id, ?err, "cannot load final status for notification");
                return;
            }
        };

        let subject = format!("{EMAIL_SUBJECT_PREFIX}{job_id}");
        let body = format!("Job {job_id} finished with status {status}.");
        match self.mail.send_email(email, &subject, &body) {
            Ok(()) => {
                self.metrics.increment(names::EMAIL_SUCCESS);
                info!(job_id, to = email, "notification sent");
            }
            Err(err) => {
                self.metrics.increment(names::EMAIL_FAILURE);
                error!(job_id, to = email, ?err, "notification failed");
            }
        }
    }
}

impl JobEventListener for JobCompletionHandler {
    fn on_job_finished(&self, event: &JobFinished) {
        self.handle(event);
    }
}
