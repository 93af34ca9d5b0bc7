//! Snapshots of the persisted job model.
//!
//! The persistence service owns these records; the supervisor only reads
//! them (via the search service) and writes status transitions back. The
//! structs here mirror the wire documents, so everything derives serde.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Persisted job status.
///
/// Progression is monotonic: once a job reaches a terminal status the
/// completion handler refuses any further transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Init,
    Running,
    Succeeded,
    Killed,
    Failed,
    Invalid,
}

impl JobStatus {
    /// True for the four statuses a job can never leave.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Killed | JobStatus::Failed | JobStatus::Invalid
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Init => "INIT",
            JobStatus::Running => "RUNNING",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Killed => "KILLED",
            JobStatus::Failed => "FAILED",
            JobStatus::Invalid => "INVALID",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job record as the search service returns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    /// Remote URI the working-directory tarball is uploaded to, when set.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub archive_location: Option<String>,
    /// Submitter address for the completion notification, when set.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub email: Option<String>,
}

/// Runtime facts about the forked child, recorded by the launcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecution {
    /// OS PID of the child process running the job.
    pub process_id: i32,
    /// Milliseconds between monitor probes, fixed per job.
    pub check_delay_ms: u64,
    /// Absolute wall-clock deadline after which the job is killed.
    pub timeout: SystemTime,
}

/// The original submission request, as far as completion cares about it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub email: Option<String>,
    /// Ids of the applications the job depends on.
    #[serde(default)]
    pub applications: Vec<String>,
}

/// An application the job resolved at launch time. The id doubles as the
/// directory name of the on-disk dependency tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: String,
}

/// Exit record the child's wrapper script writes on its way out.
///
/// Lives at `<job_dir>/genie/genie.done`; `exitCode` is the only required
/// field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDoneFile {
    #[serde(rename = "exitCode")]
    pub exit_code: i32,
}
