//! Invocation of the `vmrun` control utility.

use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;

use crate::error::{ApiError, ApiFuture};

/// Bound on a single `vmrun` invocation.
pub const VMRUN_TIMEOUT: Duration = Duration::from_secs(90);

/// Result of running the control utility.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Builds a successful output carrying `stdout`.
    #[must_use]
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Converts a non-zero exit into [`ApiError::Command`].
    ///
    /// `vmrun` reports most failures on stdout, so stdout stands in when
    /// stderr is empty.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Command`] for a non-zero or missing exit code.
    pub fn checked(self, program: &str) -> Result<Self, ApiError> {
        if self.is_success() {
            return Ok(self);
        }
        let detail = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        Err(ApiError::Command {
            program: program.to_owned(),
            status_text: self
                .code
                .map_or_else(|| String::from("signal"), |code| code.to_string()),
            stderr: detail.to_owned(),
        })
    }
}

/// Runs the hypervisor control utility with the given arguments.
pub trait HypervisorRunner: Send + Sync + fmt::Debug {
    /// Runs one invocation and captures its output.
    fn run<'a>(&'a self, args: &'a [String]) -> ApiFuture<'a, CommandOutput>;
}

/// [`HypervisorRunner`] that spawns the real executable.
///
/// The child is killed when the bound elapses.
#[derive(Clone, Debug)]
pub struct VmrunProcess {
    program: String,
    timeout: Duration,
}

impl Default for VmrunProcess {
    fn default() -> Self {
        Self::new("vmrun")
    }
}

impl VmrunProcess {
    /// Creates a runner for `program`.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            timeout: VMRUN_TIMEOUT,
        }
    }

    /// Overrides the per-invocation bound.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Executable invoked by this runner.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }
}

impl HypervisorRunner for VmrunProcess {
    fn run<'a>(&'a self, args: &'a [String]) -> ApiFuture<'a, CommandOutput> {
        Box::pin(async move {
            let mut command = Command::new(&self.program);
            command
                .args(args)
                .stdin(Stdio::null())
                .kill_on_drop(true);

            let output = timeout(self.timeout, command.output())
                .await
                .map_err(|_| ApiError::Command {
                    program: self.program.clone(),
                    status_text: format!("timeout after {}s", self.timeout.as_secs()),
                    stderr: String::from("killed"),
                })?
                .map_err(|err| ApiError::Transport {
                    operation: format!("spawn {}", self.program),
                    message: err.to_string(),
                })?;

            Ok(CommandOutput {
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_prefer_stderr_then_stdout() {
        let err = CommandOutput {
            code: Some(255),
            stdout: String::from("Error: The virtual machine is not powered on\n"),
            stderr: String::new(),
        }
        .checked("vmrun")
        .expect_err("non-zero exit should fail");

        assert_eq!(
            err.to_string(),
            "vmrun exited with status 255: Error: The virtual machine is not powered on"
        );
    }

    #[tokio::test]
    async fn slow_invocations_are_killed() {
        let runner = VmrunProcess::new("sh").with_timeout(Duration::from_millis(200));
        let args = [String::from("-c"), String::from("sleep 5")];

        let err = runner
            .run(&args)
            .await
            .expect_err("sleep should exceed the bound");

        assert!(matches!(
            err,
            ApiError::Command { ref status_text, .. } if status_text.starts_with("timeout")
        ));
    }

    #[tokio::test]
    async fn missing_executable_is_a_transport_error() {
        let runner = VmrunProcess::new("vmdrive-no-such-vmrun");

        let err = runner
            .run(&[])
            .await
            .expect_err("spawn should fail");

        assert!(matches!(err, ApiError::Transport { .. }));
    }
}
