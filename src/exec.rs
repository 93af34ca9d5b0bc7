//! External command execution for the completion pipeline.
//!
//! Every destructive operation the supervisor performs on the filesystem
//! or process table (`pkill`, `rm -rf`, `tar`) goes through one executor.
//! Arguments are always discrete tokens — nothing is ever handed to a
//! shell — and the child's stdio is discarded wholesale; callers only see
//! the exit status.

use std::io;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};

use tracing::debug;

/// Runs one external command to completion.
///
/// Implementations must be safe to call from multiple completion handlers
/// at once; the production executor is stateless (a fresh child per call)
/// so that holds trivially.
pub trait CommandExecutor: Send + Sync {
    /// Execute `argv` (program + args as discrete tokens), optionally in
    /// `working_dir`, blocking until it exits.
    fn execute(&self, argv: &[String], working_dir: Option<&Path>) -> io::Result<ExitStatus>;
}

/// Production executor: spawns a fresh child per invocation.
#[derive(Debug, Default)]
pub struct ChildProcessExecutor;

impl CommandExecutor for ChildProcessExecutor {
    fn execute(&self, argv: &[String], working_dir: Option<&Path>) -> io::Result<ExitStatus> {
        let (program, args) = argv.split_first().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "empty command line")
        })?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        debug!(?argv, cwd = ?working_dir, "executing external command");
        cmd.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_argv_is_an_error() {
        let executor = ChildProcessExecutor;
        assert!(executor.execute(&[], None).is_err());
    }

    #[test]
    fn reports_exit_status() {
        let executor = ChildProcessExecutor;
        let ok = executor.execute(&argv(&["true"]), None).unwrap();
        assert!(ok.success());
        let fail = executor.execute(&argv(&["false"]), None).unwrap();
        assert!(!fail.success());
    }

    #[test]
    fn runs_in_requested_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ChildProcessExecutor;
        let status = executor
            .execute(&argv(&["touch", "marker"]), Some(dir.path()))
            .unwrap();
        assert!(status.success());
        assert!(dir.path().join("marker").exists());
    }

    #[test]
    fn arguments_are_not_shell_interpreted() {
        // A metacharacter-laden file name must be treated as one token.
        let dir = tempfile::tempdir().unwrap();
        let executor = ChildProcessExecutor;
        let status = executor
            .execute(&argv(&["touch", "a;b && c"]), Some(dir.path()))
            .unwrap();
        assert!(status.success());
        assert!(dir.path().join("a;b && c").exists());
    }
}
