//! External process runner
//!
//! All subprocesses (extractor, probe) go through [`CommandRunner`] so that
//! the pipeline can be tested without the real binaries installed.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Captured result of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    /// Captured stdout (lossy UTF-8)
    pub stdout: String,
    /// Captured stderr (lossy UTF-8)
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the process exited with status 0
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }
}

/// Failures to run a process to completion
#[derive(Debug, Error)]
pub enum RunError {
    /// The executable does not exist
    #[error("executable not found: {0}")]
    NotFound(String),
    /// The process was killed after the timeout
    #[error("process timed out after {0:?}")]
    Timeout(Duration),
    /// The process was killed because the bot is shutting down
    #[error("process cancelled by shutdown")]
    Cancelled,
    /// Spawning or waiting failed
    #[error("process I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runs an external program with a hard timeout
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, killing it once `timeout` elapses.
    ///
    /// A non-zero exit is not an error; callers inspect [`CommandOutput`].
    async fn run(
        &self,
        program: &str,
        args: Vec<String>,
        timeout: Duration,
    ) -> Result<CommandOutput, RunError>;
}

/// [`CommandRunner`] backed by `tokio::process`
#[derive(Clone, Default)]
pub struct ProcessRunner {
    shutdown: CancellationToken,
}

impl ProcessRunner {
    /// Creates a runner whose children are killed when `shutdown` fires
    #[must_use]
    pub const fn new(shutdown: CancellationToken) -> Self {
        Self { shutdown }
    }
}

fn render_command_line(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .map(|part| shell_escape::escape(part.into()).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    #[instrument(skip_all, fields(program = %program))]
    async fn run(
        &self,
        program: &str,
        args: Vec<String>,
        timeout: Duration,
    ) -> Result<CommandOutput, RunError> {
        debug!(cmd = %render_command_line(program, &args), "Spawning process");

        let child = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    RunError::NotFound(program.to_string())
                } else {
                    RunError::Io(e)
                }
            })?;

        // Dropping the wait future drops the child, and kill_on_drop reaps it
        let output = select! {
            res = tokio::time::timeout(timeout, child.wait_with_output()) => {
                res.map_err(|_| {
                    warn!(timeout_secs = timeout.as_secs(), "Process timed out, killed");
                    RunError::Timeout(timeout)
                })??
            },
            () = self.shutdown.cancelled() => {
                warn!("Process cancelled by shutdown, killed");
                return Err(RunError::Cancelled);
            }
        };

        let result = CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        debug!(
            exit_code = ?result.exit_code,
            stdout_len = result.stdout.len(),
            stderr_len = result.stderr.len(),
            "Process completed"
        );

        Ok(result)
    }
}
