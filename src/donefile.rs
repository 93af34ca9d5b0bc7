//! The done file: the exit record the child's wrapper script writes when
//! the job process ends.
//!
//! Fixed location, `<job_dir>/genie/genie.done`, one required field
//! (`exitCode`). Written once by the wrapper, read once by the completion
//! handler.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::types::JobDoneFile;

/// Relative location of the done file inside a job's working directory.
pub const DONE_FILE_RELATIVE_PATH: &str = "genie/genie.done";

/// Absolute path of the done file for `job_id` under `base_working_dir`.
pub fn done_file_path(base_working_dir: &Path, job_id: &str) -> PathBuf {
    base_working_dir.join(job_id).join(DONE_FILE_RELATIVE_PATH)
}

/// Read and parse the done file at `path`.
pub fn read_done_file(path: &Path) -> Result<JobDoneFile> {
    let raw = std::fs::read(path)
        .with_context(|| format!("read done file {}", path.display()))?;
    serde_json::from_slice(&raw)
        .with_context(|| format!("parse done file {}", path.display()))
}
