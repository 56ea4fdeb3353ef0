//! Remote-access collaborator consumed by the adapters.
//!
//! Adapters decide which address to use and when to connect; establishing
//! the shell transport is left to a [`RemoteAccess`] implementation. The
//! crate ships [`SystemSsh`], which probes the SSH port over TCP and runs
//! commands through the system `ssh` binary.

mod ssh;

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use camino::Utf8PathBuf;
use tracing::debug;

pub use ssh::{SshSession, SshSettings, SystemSsh};
pub(crate) use ssh::expand_tilde;

use crate::error::VmError;
use crate::vm::{IpSlots, VmFuture};

/// Port used when [`SshOptions::port`] is unset.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Login material injected into a remote session.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Credentials {
    /// Remote user name.
    pub user: String,
    /// Password, when the image accepts password logins.
    pub password: Option<String>,
    /// Private key file; takes precedence over the password.
    pub private_key: Option<Utf8PathBuf>,
}

impl Credentials {
    /// Creates key-based credentials.
    #[must_use]
    pub fn with_key(user: impl Into<String>, private_key: impl Into<Utf8PathBuf>) -> Self {
        Self {
            user: user.into(),
            password: None,
            private_key: Some(private_key.into()),
        }
    }

    /// Checks that a user and at least one authentication method are set.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::MissingField`] naming the missing piece.
    pub fn validate(&self) -> Result<(), VmError> {
        if self.user.trim().is_empty() {
            return Err(VmError::missing("ssh user"));
        }
        let has_password = self.password.as_deref().is_some_and(|pw| !pw.is_empty());
        let has_key = self
            .private_key
            .as_ref()
            .is_some_and(|key| !key.as_str().trim().is_empty());
        if has_password || has_key {
            Ok(())
        } else {
            Err(VmError::missing("ssh password or private key"))
        }
    }
}

/// Per-call options for [`crate::VirtualMachine::ssh`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SshOptions {
    /// Connect to the private address first.
    pub use_private_ip: bool,
    /// Port override.
    pub port: Option<u16>,
}

/// Captured result of a remote command.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RemoteCommandOutput {
    /// Exit code, absent when the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl RemoteCommandOutput {
    /// Returns `true` when the command exited with status zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }
}

/// Establishes remote sessions.
pub trait RemoteAccess: Send + Sync + fmt::Debug {
    /// Prepares a session to `address`; no network traffic is required.
    ///
    /// # Errors
    ///
    /// Returns a precondition error when the credentials are unusable.
    fn connect(
        &self,
        address: SocketAddr,
        credentials: &Credentials,
        options: &SshOptions,
    ) -> Result<Box<dyn RemoteSession>, VmError>;
}

/// A shell session to one VM.
pub trait RemoteSession: Send + Sync + fmt::Debug {
    /// Address the session targets.
    fn address(&self) -> SocketAddr;

    /// Waits until the remote shell accepts connections.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::Timeout`] when `timeout` elapses first.
    fn wait_reachable(&self, timeout: Duration) -> VmFuture<'_, ()>;

    /// Runs `command` remotely and captures its output.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::Remote`] when the command cannot be launched.
    fn run(&self, command: &str) -> VmFuture<'_, RemoteCommandOutput>;
}

/// Selects the address for `ips`, connects, and waits for reachability.
///
/// # Errors
///
/// Returns [`VmError::NoUsableIp`] when both slots are empty, or the error
/// reported by the collaborator.
pub async fn open_session(
    remote: &dyn RemoteAccess,
    name: &str,
    ips: IpSlots,
    credentials: &Credentials,
    options: &SshOptions,
    timeout: Duration,
) -> Result<Box<dyn RemoteSession>, VmError> {
    let ip = ips
        .preferred(options.use_private_ip)
        .ok_or_else(|| VmError::NoUsableIp {
            name: name.to_owned(),
        })?;
    let address = SocketAddr::new(ip, options.port.unwrap_or(DEFAULT_SSH_PORT));
    debug!(vm = name, %address, "waiting for remote shell");

    let session = remote.connect(address, credentials, options)?;
    session.wait_reachable(timeout).await?;
    Ok(session)
}

#[cfg(test)]
mod tests;
