//! System `ssh` implementation of the remote-access collaborator.

use std::ffi::OsString;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::timeout;

use super::{Credentials, RemoteAccess, RemoteCommandOutput, RemoteSession, SshOptions};
use crate::error::{ApiError, VmError};
use crate::vm::VmFuture;
use crate::wait::{PollPolicy, poll_until};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(5);

/// Options applied to every `ssh` invocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshSettings {
    /// Path to the `ssh` executable.
    pub ssh_bin: String,
    /// Pass `BatchMode=yes` so ssh never prompts.
    pub batch_mode: bool,
    /// Enforce host key checking.
    pub strict_host_key_checking: bool,
    /// Known hosts file; `/dev/null` keeps ephemeral hosts out of the user's file.
    pub known_hosts_file: String,
    /// Per-attempt TCP connect timeout while probing reachability.
    pub connect_timeout: Duration,
    /// Delay between reachability probes.
    pub probe_interval: Duration,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            ssh_bin: String::from("ssh"),
            batch_mode: true,
            strict_host_key_checking: false,
            known_hosts_file: String::from("/dev/null"),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            probe_interval: DEFAULT_PROBE_INTERVAL,
        }
    }
}

/// Remote access through the system `ssh` client.
///
/// Only key-based authentication is forwarded to `ssh`. Credentials that
/// carry a password but no private key are rejected at connect time, since
/// the client runs without a terminal to prompt on.
#[derive(Clone, Debug, Default)]
pub struct SystemSsh {
    settings: SshSettings,
}

impl SystemSsh {
    /// Creates a client with the given settings.
    #[must_use]
    pub const fn new(settings: SshSettings) -> Self {
        Self { settings }
    }
}

impl RemoteAccess for SystemSsh {
    fn connect(
        &self,
        address: SocketAddr,
        credentials: &Credentials,
        _options: &SshOptions,
    ) -> Result<Box<dyn RemoteSession>, VmError> {
        credentials.validate()?;
        let has_key = credentials
            .private_key
            .as_ref()
            .is_some_and(|key| !key.as_str().trim().is_empty());
        if !has_key {
            return Err(VmError::InvalidField {
                field: String::from("ssh credentials"),
                reason: String::from(
                    "password authentication is not supported by the system ssh client; \
                     configure a private key",
                ),
            });
        }
        Ok(Box::new(SshSession {
            settings: self.settings.clone(),
            address,
            credentials: credentials.clone(),
        }))
    }
}

/// Session created by [`SystemSsh`].
#[derive(Clone, Debug)]
pub struct SshSession {
    pub(super) settings: SshSettings,
    pub(super) address: SocketAddr,
    pub(super) credentials: Credentials,
}

impl SshSession {
    pub(super) fn ssh_args(&self, remote_command: &str) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("-p"),
            OsString::from(self.address.port().to_string()),
        ];

        if let Some(key) = self.credentials.private_key.as_ref() {
            args.push(OsString::from("-i"));
            args.push(OsString::from(expand_tilde(key.as_str())));
        }

        if self.settings.batch_mode {
            args.push(OsString::from("-o"));
            args.push(OsString::from("BatchMode=yes"));
        }

        if !self.settings.strict_host_key_checking {
            args.push(OsString::from("-o"));
            args.push(OsString::from("StrictHostKeyChecking=no"));
        }

        if !self.settings.known_hosts_file.trim().is_empty() {
            args.push(OsString::from("-o"));
            args.push(OsString::from(format!(
                "UserKnownHostsFile={}",
                self.settings.known_hosts_file
            )));
        }

        args.push(OsString::from(format!(
            "{}@{}",
            self.credentials.user,
            self.address.ip()
        )));
        args.push(OsString::from(remote_command));
        args
    }
}

async fn port_open(address: SocketAddr, connect_timeout: Duration) -> Result<bool, ApiError> {
    let attempt = timeout(connect_timeout, TcpStream::connect(address)).await;
    Ok(matches!(attempt, Ok(Ok(_))))
}

impl RemoteSession for SshSession {
    fn address(&self) -> SocketAddr {
        self.address
    }

    fn wait_reachable(&self, wait: Duration) -> VmFuture<'_, ()> {
        Box::pin(async move {
            let address = self.address;
            let connect_timeout = self.settings.connect_timeout;
            poll_until(
                PollPolicy::new(self.settings.probe_interval, wait),
                || port_open(address, connect_timeout),
                |open| *open,
                |_| false,
            )
            .await
            .map(|_| ())
            .map_err(|err| err.into_vm_error("reach ssh on", &address.to_string()))
        })
    }

    fn run(&self, command: &str) -> VmFuture<'_, RemoteCommandOutput> {
        let args = self.ssh_args(command);
        Box::pin(async move {
            let output = Command::new(&self.settings.ssh_bin)
                .args(&args)
                .output()
                .await
                .map_err(|err| VmError::Remote {
                    target: self.address.to_string(),
                    message: format!("failed to spawn {}: {err}", self.settings.ssh_bin),
                })?;
            Ok(RemoteCommandOutput {
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        })
    }
}

/// Expands a leading `~/` to the user's home directory; other paths, and
/// every path when `HOME` is unset, are returned unchanged.
pub(crate) fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return format!("{}/{rest}", home.to_string_lossy());
    }
    path.to_owned()
}
