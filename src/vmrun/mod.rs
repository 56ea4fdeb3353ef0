//! Local hypervisor adapter driving the `vmrun` control utility.
//!
//! A VM is a directory cloned from a source VM. The instance identifier is
//! the path of the cloned VMX file, and removing the directory is the whole
//! teardown.

mod files;
mod runner;
mod vmx;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info, warn};

pub use files::SUSPEND_IMAGE_EXTENSION;
pub use runner::{CommandOutput, HypervisorRunner, VMRUN_TIMEOUT, VmrunProcess};
pub use vmx::{Backing, NicConfig, rewrite_nics};

use crate::error::{ApiError, VmError};
use crate::remote::{Credentials, RemoteAccess, RemoteSession, SshOptions, open_session};
use crate::vm::{InstanceSlot, IpSlots, VirtualMachine, VmFuture, VmState, name_or_default};
use crate::wait::{PollPolicy, poll_until};

const PROGRAM: &str = "vmrun";

/// Interval between guest IP queries.
pub const IP_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Bound on waiting for the guest to report an address.
pub const IP_TIMEOUT: Duration = Duration::from_secs(90);
/// Bound on SSH reachability.
pub const SSH_TIMEOUT: Duration = Duration::from_secs(60);

/// Creation parameters for a cloned local VM.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VmrunSpec {
    /// Display name; a default is generated when blank.
    pub name: String,
    /// VMX file of the source VM. Its whole directory is cloned.
    pub source_vmx: Utf8PathBuf,
    /// Directory the clone is written to; must not exist yet.
    pub destination: Utf8PathBuf,
    /// Network cards replacing those of the source VM. Empty keeps them.
    pub nics: Vec<NicConfig>,
    /// Open the hypervisor window when starting.
    pub gui: bool,
    /// Credentials used over SSH.
    pub credentials: Credentials,
}

impl VmrunSpec {
    /// Checks mandatory fields without touching the filesystem.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::MissingField`] for the first missing field.
    pub fn validate(&self) -> Result<(), VmError> {
        if self.source_vmx.as_str().trim().is_empty() {
            return Err(VmError::missing("source vmx"));
        }
        if self.destination.as_str().trim().is_empty() {
            return Err(VmError::missing("destination directory"));
        }
        Ok(())
    }

    /// Path of the VMX file inside the destination directory.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::InvalidField`] when the source path has no file
    /// name.
    pub fn cloned_vmx(&self) -> Result<Utf8PathBuf, VmError> {
        self.source_vmx
            .file_name()
            .map(|file| self.destination.join(file))
            .ok_or_else(|| VmError::InvalidField {
                field: String::from("source vmx"),
                reason: format!("{} has no file name", self.source_vmx),
            })
    }

    fn source_dir(&self) -> &Utf8Path {
        self.source_vmx
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .unwrap_or_else(|| Utf8Path::new("."))
    }

    const fn start_mode(&self) -> &'static str {
        if self.gui { "gui" } else { "nogui" }
    }
}

/// Poll bounds used by [`VmrunVm`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VmrunTimeouts {
    /// Guest IP discovery after start.
    pub ip: PollPolicy,
    /// SSH reachability.
    pub ssh: Duration,
}

impl Default for VmrunTimeouts {
    fn default() -> Self {
        Self {
            ip: PollPolicy::new(IP_POLL_INTERVAL, IP_TIMEOUT),
            ssh: SSH_TIMEOUT,
        }
    }
}

/// `vmrun` implementation of [`VirtualMachine`].
pub struct VmrunVm {
    runner: Arc<dyn HypervisorRunner>,
    remote: Arc<dyn RemoteAccess>,
    name: String,
    spec: VmrunSpec,
    timeouts: VmrunTimeouts,
    instance: InstanceSlot,
}

impl VmrunVm {
    /// Creates an unprovisioned VM.
    #[must_use]
    pub fn new(
        spec: VmrunSpec,
        runner: Arc<dyn HypervisorRunner>,
        remote: Arc<dyn RemoteAccess>,
    ) -> Self {
        Self {
            runner,
            remote,
            name: name_or_default(&spec.name),
            spec,
            timeouts: VmrunTimeouts::default(),
            instance: InstanceSlot::new(),
        }
    }

    /// Overrides the poll bounds.
    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: VmrunTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Cloned VMX path, once provisioned.
    #[must_use]
    pub fn instance_id(&self) -> Option<&str> {
        self.instance.id()
    }

    async fn vmrun(&self, args: &[&str]) -> Result<CommandOutput, ApiError> {
        let owned: Vec<String> = args.iter().map(|arg| (*arg).to_owned()).collect();
        self.runner.run(&owned).await?.checked(PROGRAM)
    }

    async fn provision_steps(&mut self) -> Result<(), VmError> {
        self.instance.ensure_vacant(&self.name)?;
        self.spec.validate()?;
        let vmx = self.spec.cloned_vmx()?;
        let destination = self.spec.destination.clone();
        let exists = files::exists(&destination)
            .map_err(|err| VmError::api("inspect destination", destination.as_str(), err))?;
        if exists {
            return Err(VmError::InvalidField {
                field: String::from("destination directory"),
                reason: format!("{destination} already exists"),
            });
        }

        info!(vm = %self.name, source = %self.spec.source_vmx, %destination, "cloning virtual machine");
        if let Err(err) = files::copy_tree(self.spec.source_dir(), &destination) {
            if let Err(cleanup) = files::remove_tree(&destination) {
                warn!(
                    vm = %self.name,
                    %destination,
                    error = %cleanup,
                    "failed to remove partial clone"
                );
            }
            return Err(VmError::api("copy virtual machine", destination.as_str(), err));
        }
        self.instance.assign(vmx.as_str());

        if !self.spec.nics.is_empty() {
            let original = files::read(&vmx)
                .map_err(|err| VmError::api("configure network", vmx.as_str(), err))?;
            files::write(&vmx, &rewrite_nics(&original, &self.spec.nics))
                .map_err(|err| VmError::api("configure network", vmx.as_str(), err))?;
            debug!(vm = %self.name, nics = self.spec.nics.len(), "rewrote network cards");
        }

        self.vmrun(&["start", vmx.as_str(), self.spec.start_mode()])
            .await
            .map_err(|err| VmError::api("start", vmx.as_str(), err))?;

        let ip = poll_until(
            self.timeouts.ip,
            || self.guest_ip(vmx.as_str()),
            Option::is_some,
            |_| false,
        )
        .await
        .map_err(|err| err.into_vm_error("obtain guest address for", vmx.as_str()))?;
        info!(vm = %self.name, ip = ?ip, "virtual machine provisioned");
        Ok(())
    }

    /// A failing `getGuestIPAddress` means the guest has no address yet.
    async fn guest_ip(&self, vmx: &str) -> Result<Option<IpAddr>, ApiError> {
        let args = [String::from("getGuestIPAddress"), vmx.to_owned()];
        let output = self.runner.run(&args).await?;
        if !output.is_success() {
            debug!(vmx, "guest address not available yet");
            return Ok(None);
        }
        Ok(output.stdout.trim().parse().ok())
    }

    async fn power_state(&self, vmx: &str) -> Result<VmState, ApiError> {
        let output = self.vmrun(&["list"]).await?;
        if !output.stderr.trim().is_empty() {
            return Err(ApiError::Command {
                program: PROGRAM.to_owned(),
                status_text: String::from("0"),
                stderr: output.stderr.trim().to_owned(),
            });
        }
        let path = Utf8Path::new(vmx);
        let canonical = files::canonical(path);
        let listed = output.stdout.lines().map(str::trim).any(|line| {
            line == vmx || canonical.as_ref().is_some_and(|resolved| line == resolved.as_str())
        });
        if listed {
            return Ok(VmState::Running);
        }
        let directory = path.parent().unwrap_or(self.spec.destination.as_path());
        if files::has_suspend_image(directory)? {
            Ok(VmState::Suspended)
        } else {
            Ok(VmState::Halted)
        }
    }

    async fn control(
        &self,
        operation: &'static str,
        verb: &'static str,
        mode: Option<&'static str>,
    ) -> Result<(), VmError> {
        let vmx = self.instance.require(&self.name)?;
        info!(vm = %self.name, operation, "changing virtual machine power state");
        let mut args = vec![verb, vmx];
        args.extend(mode);
        self.vmrun(&args)
            .await
            .map(|_| ())
            .map_err(|err| VmError::api(operation, vmx, err))
    }

    async fn teardown_steps(&mut self) -> Result<(), VmError> {
        let Some(vmx) = self.instance.teardown_target(&self.name)? else {
            return Ok(());
        };
        self.remove(&vmx)
            .await
            .map_err(|err| VmError::teardown("virtual machine", &vmx, err))?;
        self.instance.clear();
        info!(vm = %self.name, vmx = %vmx, "virtual machine destroyed");
        Ok(())
    }

    async fn remove(&self, vmx: &str) -> Result<(), VmError> {
        if let Err(err) = self.vmrun(&["stop", vmx, "hard"]).await {
            let state = self
                .power_state(vmx)
                .await
                .map_err(|probe| VmError::api("list virtual machines", vmx, probe))?;
            if state == VmState::Running {
                return Err(VmError::api("stop", vmx, err));
            }
            debug!(vmx, error = %err, "hard stop skipped; virtual machine not running");
        }
        files::remove_tree(&self.spec.destination).map_err(|err| {
            VmError::api("remove directory", self.spec.destination.as_str(), err)
        })
    }

    async fn current_ips(&self, vmx: &str) -> Result<IpSlots, VmError> {
        let ip = self
            .guest_ip(vmx)
            .await
            .map_err(|err| VmError::api("get guest address", vmx, err))?;
        Ok(IpSlots::new(ip, None))
    }
}

impl VirtualMachine for VmrunVm {
    fn name(&self) -> &str {
        &self.name
    }

    fn provision(&mut self) -> VmFuture<'_, ()> {
        Box::pin(self.provision_steps())
    }

    fn start(&self) -> VmFuture<'_, ()> {
        Box::pin(self.control("start", "start", Some(self.spec.start_mode())))
    }

    fn halt(&self) -> VmFuture<'_, ()> {
        Box::pin(self.control("halt", "stop", Some("soft")))
    }

    fn suspend(&self) -> VmFuture<'_, ()> {
        Box::pin(self.control("suspend", "suspend", None))
    }

    fn resume(&self) -> VmFuture<'_, ()> {
        Box::pin(self.control("resume", "start", Some(self.spec.start_mode())))
    }

    fn state(&self) -> VmFuture<'_, VmState> {
        Box::pin(async move {
            let vmx = self.instance.require(&self.name)?;
            self.power_state(vmx)
                .await
                .map_err(|err| VmError::api("list virtual machines", vmx, err))
        })
    }

    fn ips(&self) -> VmFuture<'_, IpSlots> {
        Box::pin(async move {
            let vmx = self.instance.require(&self.name)?;
            self.current_ips(vmx).await
        })
    }

    fn destroy(&mut self) -> VmFuture<'_, ()> {
        Box::pin(self.teardown_steps())
    }

    fn ssh(&self, options: SshOptions) -> VmFuture<'_, Box<dyn RemoteSession>> {
        Box::pin(async move {
            let vmx = self.instance.require(&self.name)?;
            let ips = self.current_ips(vmx).await?;
            open_session(
                self.remote.as_ref(),
                &self.name,
                ips,
                &self.spec.credentials,
                &options,
                self.timeouts.ssh,
            )
            .await
        })
    }
}

#[cfg(test)]
mod tests;
