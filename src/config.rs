//! Supervisor configuration.
//!
//! Everything has a sensible default; deployments override via a small
//! TOML document. The maxima default to 8 GiB, which in practice only
//! stops jobs that have gone off the rails.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

const DEFAULT_MAX_OUTPUT_BYTES: u64 = 8 * 1024 * 1024 * 1024;

/// Runtime knobs for the supervisor.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SupervisorConfig {
    /// Directory under which every job's working directory lives.
    pub base_working_dir: PathBuf,
    /// Kill a live job once its stdout file exceeds this many bytes.
    pub max_stdout_bytes: u64,
    /// Kill a live job once its stderr file exceeds this many bytes.
    pub max_stderr_bytes: u64,
    /// Delete the local tarball after a successful upload.
    pub delete_archive_file: bool,
    /// Delete per-application dependency trees once the job completes.
    pub delete_dependencies: bool,
    /// Issue destructive filesystem commands through sudo.
    pub run_as_user: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        SupervisorConfig {
            base_working_dir: PathBuf::from("/var/lib/jobs"),
            max_stdout_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            max_stderr_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            delete_archive_file: true,
            delete_dependencies: true,
            run_as_user: false,
        }
    }
}

impl SupervisorConfig {
    /// Parse a TOML document; absent keys keep their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("parse supervisor config")
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        Self::from_toml_str(&raw)
    }

    /// Working directory of one job.
    pub fn job_working_dir(&self, job_id: &str) -> PathBuf {
        self.base_working_dir.join(job_id)
    }
}
