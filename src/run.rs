//! Orchestrates a single remote run against any backend.
//!
//! The workflow provisions a VM, opens an SSH session, executes one command,
//! and tears the VM down. Teardown is attempted on every failure path; the
//! remote exit code is preserved so callers observe the same status locally.

use std::fmt::Display;

use thiserror::Error;
use tracing::{info, warn};

use crate::error::VmError;
use crate::remote::{RemoteCommandOutput, SshOptions};
use crate::vm::VirtualMachine;

/// Errors surfaced while performing a remote run.
#[derive(Debug, Error)]
pub enum RunError {
    /// Raised when provisioning the VM fails.
    #[error("failed to provision virtual machine: {message}")]
    Provision {
        /// Human-readable description, including any teardown failure.
        message: String,
        /// Adapter error.
        #[source]
        source: VmError,
    },
    /// Raised when no SSH session could be opened.
    #[error("virtual machine did not become reachable: {message}")]
    Session {
        /// Human-readable description, including any teardown failure.
        message: String,
        /// Adapter error.
        #[source]
        source: VmError,
    },
    /// Raised when the remote command fails to start.
    #[error("remote command failed to start: {message}")]
    Remote {
        /// Human-readable description, including any teardown failure.
        message: String,
        /// Session error.
        #[source]
        source: VmError,
    },
    /// Raised when teardown fails after the command ran.
    #[error("failed to destroy virtual machine: {0}")]
    Teardown(#[source] VmError),
}

impl RunError {
    /// Adapter error behind this failure.
    #[must_use]
    pub const fn vm_error(&self) -> &VmError {
        match self {
            Self::Provision { source, .. }
            | Self::Session { source, .. }
            | Self::Remote { source, .. }
            | Self::Teardown(source) => source,
        }
    }
}

/// Executes the run flow against one VM.
pub struct RunOrchestrator {
    vm: Box<dyn VirtualMachine>,
    options: SshOptions,
    keep: bool,
}

impl RunOrchestrator {
    /// Creates an orchestrator that destroys the VM when the run ends.
    #[must_use]
    pub fn new(vm: Box<dyn VirtualMachine>) -> Self {
        Self {
            vm,
            options: SshOptions::default(),
            keep: false,
        }
    }

    /// Overrides how the SSH session is opened.
    #[must_use]
    pub const fn with_ssh_options(mut self, options: SshOptions) -> Self {
        self.options = options;
        self
    }

    /// Keeps the VM after a successful run. Failed runs still tear down.
    #[must_use]
    pub const fn keep_on_success(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    /// VM driven by this orchestrator.
    #[must_use]
    pub fn vm(&self) -> &dyn VirtualMachine {
        self.vm.as_ref()
    }

    /// Runs the end-to-end workflow and returns the remote command output.
    ///
    /// The remote exit code is returned even when non-zero. When teardown
    /// fails after the command ran, the teardown error is surfaced even if
    /// the command succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`RunError`] when provisioning, session setup, remote
    /// execution, or teardown fail.
    pub async fn execute(&mut self, command: &str) -> Result<RemoteCommandOutput, RunError> {
        let name = self.vm.name().to_owned();
        info!(vm = %name, "provisioning");
        if let Err(err) = self.vm.provision().await {
            let message = self.destroy_with_note(&err).await;
            return Err(RunError::Provision {
                message,
                source: err,
            });
        }

        let session = match self.vm.ssh(self.options.clone()).await {
            Ok(session) => session,
            Err(err) => {
                let message = self.destroy_with_note(&err).await;
                return Err(RunError::Session {
                    message,
                    source: err,
                });
            }
        };

        info!(vm = %name, address = %session.address(), "running remote command");
        let output = match session.run(command).await {
            Ok(output) => output,
            Err(err) => {
                let message = self.destroy_with_note(&err).await;
                return Err(RunError::Remote {
                    message,
                    source: err,
                });
            }
        };

        if self.keep {
            info!(vm = %name, "keeping virtual machine");
        } else {
            self.vm.destroy().await.map_err(RunError::Teardown)?;
        }
        Ok(output)
    }

    async fn destroy_with_note<E: Display>(&mut self, err: &E) -> String {
        let teardown_error = match self.vm.destroy().await {
            Ok(()) | Err(VmError::NotProvisioned { .. }) => None,
            Err(teardown) => {
                warn!(vm = %self.vm.name(), error = %teardown, "teardown after failure failed");
                Some(teardown)
            }
        };
        append_teardown_note(err.to_string(), teardown_error.as_ref())
    }
}

fn append_teardown_note<E: Display>(message: String, teardown_error: Option<&E>) -> String {
    if let Some(teardown) = teardown_error {
        format!("{message} (teardown also failed: {teardown})")
    } else {
        message
    }
}
