//! Contracts for the external collaborators the completion pipeline
//! talks to.
//!
//! All four services are remote in production (the persistence and search
//! services are RPC facades over the durable job store). The traits keep
//! the supervisor testable and pin down exactly which operations it is
//! allowed to call.

use std::path::Path;

use thiserror::Error;

use crate::types::{Application, Job, JobExecution, JobRequest, JobStatus};

/// Failure of an external service call.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("no {kind} record for job {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("service unavailable: {0}")]
    Unavailable(String),
}

/// Write side of the durable job store.
pub trait PersistenceService: Send + Sync {
    /// Transition the job's persisted status, recording `message` with it.
    fn update_job_status(
        &self,
        job_id: &str,
        status: JobStatus,
        message: &str,
    ) -> Result<(), ServiceError>;

    /// Record the child's exit code. The store derives the terminal status
    /// from the code (0 becomes SUCCEEDED, anything else FAILED, honoring
    /// any store-defined special codes).
    fn set_exit_code(&self, job_id: &str, exit_code: i32) -> Result<(), ServiceError>;
}

/// Read side of the durable job store.
pub trait SearchService: Send + Sync {
    fn get_job(&self, job_id: &str) -> Result<Job, ServiceError>;
    fn get_job_execution(&self, job_id: &str) -> Result<JobExecution, ServiceError>;
    fn get_job_request(&self, job_id: &str) -> Result<JobRequest, ServiceError>;
    fn get_job_status(&self, job_id: &str) -> Result<JobStatus, ServiceError>;
    fn get_job_applications(&self, job_id: &str) -> Result<Vec<Application>, ServiceError>;
}

/// Uploads a local file to a remote URI (object store, usually).
pub trait FileTransferService: Send + Sync {
    fn put_file(&self, local: &Path, remote_uri: &str) -> Result<(), ServiceError>;
}

/// Outbound mail.
pub trait MailService: Send + Sync {
    fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), ServiceError>;
}
