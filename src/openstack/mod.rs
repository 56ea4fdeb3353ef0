//! OpenStack adapter.
//!
//! A server is created from a resolved flavor and image, given a floating IP
//! from the configured pool, waited on until SSH answers, and optionally
//! given a Cinder volume. Teardown releases those side-resources in reverse
//! order before deleting the server.

mod api;
mod client;
mod provision;
mod state;
mod teardown;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

pub use api::{
    Flavor, FloatingIp, Image, OpenStackApi, PowerAction, Server, ServerAddress, ServerRequest,
    Volume, VolumeRequest,
};
pub use client::{
    KeystoneSession, OpenStackClient, OpenStackCredentials, reset_global_session,
};
pub use state::{VOLUME_ERROR_STATES, is_volume_error, translate_server_state};

use crate::error::{ApiError, VmError};
use crate::remote::{Credentials, RemoteAccess, RemoteSession, SshOptions, open_session};
use crate::vm::{InstanceSlot, IpSlots, VirtualMachine, VmFuture, VmState, name_or_default};
use crate::wait::{PollPolicy, poll_state};

const BACKEND: &str = "openstack";

/// Interval between status polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Bound on each server or volume transition.
pub const ACTION_TIMEOUT: Duration = Duration::from_secs(900);
/// Bound on SSH reachability after the floating IP is associated.
pub const SSH_TIMEOUT: Duration = Duration::from_secs(300);
/// Security group applied when none is configured.
pub const DEFAULT_SECURITY_GROUP: &str = "default";

/// Volume created and attached after the server is reachable.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VolumeSpec {
    /// Size in gigabytes; zero disables the volume.
    pub size_gb: u32,
    /// Optional Cinder volume type.
    pub volume_type: Option<String>,
    /// Requested device path, such as `/dev/vdb`.
    pub device: Option<String>,
}

/// Creation parameters for an OpenStack server.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct OpenStackSpec {
    /// Server name; a default is generated when blank.
    pub name: String,
    /// Flavor name resolved to an id at provision time.
    pub flavor_name: String,
    /// Image name resolved through Glance.
    pub image_name: String,
    /// Image id; skips name resolution when set.
    pub image_id: Option<String>,
    /// Network ids to attach.
    pub networks: Vec<String>,
    /// Pool the floating IP is allocated from.
    pub floating_ip_pool: String,
    /// Security group names; `default` when empty.
    pub security_groups: Vec<String>,
    /// Key pair injected at boot.
    pub key_name: Option<String>,
    /// Optional data volume.
    pub volume: Option<VolumeSpec>,
    /// Credentials used to reach the server over SSH.
    pub credentials: Credentials,
}

impl OpenStackSpec {
    /// Checks mandatory fields without contacting the backend.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::MissingField`] for the first missing field.
    pub fn validate(&self) -> Result<(), VmError> {
        if self.flavor_name.trim().is_empty() {
            return Err(VmError::missing("flavor name"));
        }
        let has_image_id = self.image_id.as_deref().is_some_and(|id| !id.trim().is_empty());
        if !has_image_id && self.image_name.trim().is_empty() {
            return Err(VmError::missing("image reference"));
        }
        if self.networks.iter().all(|network| network.trim().is_empty()) {
            return Err(VmError::missing("network reference"));
        }
        if self.floating_ip_pool.trim().is_empty() {
            return Err(VmError::missing("floating IP pool"));
        }
        self.credentials.validate()
    }
}

/// Poll bounds used by [`OpenStackVm`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OpenStackTimeouts {
    /// Server and volume transitions.
    pub action: PollPolicy,
    /// SSH reachability.
    pub ssh: Duration,
}

impl Default for OpenStackTimeouts {
    fn default() -> Self {
        Self {
            action: PollPolicy::new(POLL_INTERVAL, ACTION_TIMEOUT),
            ssh: SSH_TIMEOUT,
        }
    }
}

/// Volume owned by the VM.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct OwnedVolume {
    pub(crate) id: String,
    pub(crate) attached: bool,
}

/// Floating IP owned by the VM.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct OwnedFloatingIp {
    pub(crate) allocation: FloatingIp,
    pub(crate) associated: bool,
}

/// OpenStack implementation of [`VirtualMachine`].
pub struct OpenStackVm {
    api: Arc<dyn OpenStackApi>,
    remote: Arc<dyn RemoteAccess>,
    name: String,
    spec: OpenStackSpec,
    timeouts: OpenStackTimeouts,
    instance: InstanceSlot,
    floating_ip: Option<OwnedFloatingIp>,
    volume: Option<OwnedVolume>,
}

impl OpenStackVm {
    /// Creates an unprovisioned VM.
    #[must_use]
    pub fn new(
        spec: OpenStackSpec,
        api: Arc<dyn OpenStackApi>,
        remote: Arc<dyn RemoteAccess>,
    ) -> Self {
        Self {
            api,
            remote,
            name: name_or_default(&spec.name),
            spec,
            timeouts: OpenStackTimeouts::default(),
            instance: InstanceSlot::new(),
            floating_ip: None,
            volume: None,
        }
    }

    /// Overrides the poll bounds.
    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: OpenStackTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Backend server id, once provisioned.
    #[must_use]
    pub fn instance_id(&self) -> Option<&str> {
        self.instance.id()
    }

    /// Floating IP allocation still owned by the VM.
    #[must_use]
    pub fn floating_ip(&self) -> Option<&FloatingIp> {
        self.floating_ip.as_ref().map(|owned| &owned.allocation)
    }

    /// Volume id still owned by the VM.
    #[must_use]
    pub fn volume_id(&self) -> Option<&str> {
        self.volume.as_ref().map(|owned| owned.id.as_str())
    }

    async fn fetch_server(&self, id: &str) -> Result<Server, VmError> {
        self.api
            .get_server(id)
            .await
            .map_err(|err| VmError::api("get server", id, err))?
            .ok_or_else(|| VmError::api("get server", id, ApiError::not_found("server", id)))
    }

    async fn server_state(&self, id: &str) -> Result<VmState, ApiError> {
        let server = self.api.get_server(id).await?;
        Ok(server.map_or(VmState::Unknown, |found| {
            translate_server_state(&found.status)
        }))
    }

    async fn wait_for_server(&self, id: &str, target: VmState, action: &str) -> Result<(), VmError> {
        poll_state(self.timeouts.action, || self.server_state(id), target)
            .await
            .map(|_| ())
            .map_err(|err| err.into_vm_error(action, id))
    }

    async fn transition(
        &self,
        operation: &'static str,
        from: VmState,
        action: PowerAction,
        to: VmState,
    ) -> Result<(), VmError> {
        let id = self.instance.require(&self.name)?;
        let current = self
            .server_state(id)
            .await
            .map_err(|err| VmError::api(operation, id, err))?;
        if current != from {
            return Err(VmError::InvalidState {
                name: self.name.clone(),
                operation,
                state: current,
            });
        }

        info!(vm = %self.name, server = id, operation, "changing server power state");
        self.api
            .server_action(id, action)
            .await
            .map_err(|err| VmError::api(operation, id, err))?;
        self.wait_for_server(id, to, operation).await
    }
}

impl VirtualMachine for OpenStackVm {
    fn name(&self) -> &str {
        &self.name
    }

    fn provision(&mut self) -> VmFuture<'_, ()> {
        Box::pin(self.provision_steps())
    }

    fn start(&self) -> VmFuture<'_, ()> {
        Box::pin(self.transition("start", VmState::Halted, PowerAction::Start, VmState::Running))
    }

    fn halt(&self) -> VmFuture<'_, ()> {
        Box::pin(self.transition("halt", VmState::Running, PowerAction::Stop, VmState::Halted))
    }

    fn suspend(&self) -> VmFuture<'_, ()> {
        Box::pin(async {
            Err(VmError::Unsupported {
                operation: "suspend",
                backend: BACKEND,
            })
        })
    }

    fn resume(&self) -> VmFuture<'_, ()> {
        Box::pin(async {
            Err(VmError::Unsupported {
                operation: "resume",
                backend: BACKEND,
            })
        })
    }

    fn state(&self) -> VmFuture<'_, VmState> {
        Box::pin(async move {
            let id = self.instance.require(&self.name)?;
            let server = self.fetch_server(id).await?;
            Ok(translate_server_state(&server.status))
        })
    }

    fn ips(&self) -> VmFuture<'_, IpSlots> {
        Box::pin(async move {
            let id = self.instance.require(&self.name)?;
            Ok(self.fetch_server(id).await?.ip_slots())
        })
    }

    fn destroy(&mut self) -> VmFuture<'_, ()> {
        Box::pin(self.teardown_steps())
    }

    fn ssh(&self, options: SshOptions) -> VmFuture<'_, Box<dyn RemoteSession>> {
        Box::pin(async move {
            let id = self.instance.require(&self.name)?;
            let ips = self.fetch_server(id).await?.ip_slots();
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
