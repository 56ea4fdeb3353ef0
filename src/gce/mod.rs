//! Google Compute Engine adapter.
//!
//! Every mutation returns a zonal operation that is polled until `DONE`; an
//! operation finishing with errors is a terminal failure.

mod api;
mod client;
mod state;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

pub use api::{
    AccessConfig, GceApi, Instance, InstanceRequest, Linked, Network, NetworkInterface, Operation,
    OperationError, OperationErrorItem,
};
pub use client::{COMPUTE_BASE_URL, GceClient};
pub use state::{OPERATION_DONE, translate_instance_status};

use crate::error::{ApiError, VmError, tolerate_absent};
use crate::remote::{Credentials, RemoteAccess, RemoteSession, SshOptions, open_session};
use crate::vm::{InstanceSlot, IpSlots, VirtualMachine, VmFuture, VmState, name_or_default};
use crate::wait::{PollPolicy, poll_state, poll_until};

const BACKEND: &str = "gce";

/// Zone used when none is configured.
pub const DEFAULT_ZONE: &str = "us-central1-a";
/// Machine type used when none is configured.
pub const DEFAULT_MACHINE_TYPE: &str = "n1-standard-1";
/// Boot disk type used when none is configured.
pub const DEFAULT_DISK_TYPE: &str = "pd-standard";
/// Boot disk size used when none is configured.
pub const DEFAULT_DISK_SIZE_GB: u32 = 10;
/// Network used when none is configured.
pub const DEFAULT_NETWORK: &str = "default";
/// Public image projects searched when none are configured.
pub const DEFAULT_IMAGE_PROJECTS: [&str; 8] = [
    "centos-cloud",
    "cos-cloud",
    "debian-cloud",
    "fedora-coreos-cloud",
    "opensuse-cloud",
    "rhel-cloud",
    "suse-cloud",
    "ubuntu-os-cloud",
];
/// Service account scopes granted when none are configured.
pub const DEFAULT_SCOPES: [&str; 4] = [
    "https://www.googleapis.com/auth/userinfo.email",
    "https://www.googleapis.com/auth/compute",
    "https://www.googleapis.com/auth/devstorage.full_control",
    "https://www.googleapis.com/auth/logging.write",
];

/// Interval between operation and status polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Bound on each operation.
pub const ACTION_TIMEOUT: Duration = Duration::from_secs(600);
/// Bound on SSH reachability.
pub const SSH_TIMEOUT: Duration = Duration::from_secs(180);

/// Creation parameters for a Compute Engine instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GceSpec {
    /// Instance name; a default is generated when blank.
    pub name: String,
    /// Zone.
    pub zone: String,
    /// Machine type name.
    pub machine_type: String,
    /// Source image name.
    pub source_image: String,
    /// Projects searched for the image, in order.
    pub image_projects: Vec<String>,
    /// Boot disk type name.
    pub disk_type: String,
    /// Boot disk size in gigabytes.
    pub disk_size_gb: u32,
    /// Network name.
    pub network: String,
    /// Subnetwork name; required on custom-mode networks.
    pub subnetwork: Option<String>,
    /// Reach the instance through its internal address.
    pub use_internal_ip: bool,
    /// Request a preemptible instance.
    pub preemptible: bool,
    /// Network tags.
    pub tags: Vec<String>,
    /// Service account scopes.
    pub scopes: Vec<String>,
    /// OpenSSH public key installed for the SSH user.
    pub ssh_public_key: String,
    /// Credentials used over SSH.
    pub credentials: Credentials,
}

impl Default for GceSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            zone: DEFAULT_ZONE.to_owned(),
            machine_type: DEFAULT_MACHINE_TYPE.to_owned(),
            source_image: String::new(),
            image_projects: DEFAULT_IMAGE_PROJECTS.map(str::to_owned).to_vec(),
            disk_type: DEFAULT_DISK_TYPE.to_owned(),
            disk_size_gb: DEFAULT_DISK_SIZE_GB,
            network: DEFAULT_NETWORK.to_owned(),
            subnetwork: None,
            use_internal_ip: false,
            preemptible: false,
            tags: Vec::new(),
            scopes: DEFAULT_SCOPES.map(str::to_owned).to_vec(),
            ssh_public_key: String::new(),
            credentials: Credentials::default(),
        }
    }
}

impl GceSpec {
    /// Checks mandatory fields without contacting the backend.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::MissingField`] for the first missing field and
    /// [`VmError::InvalidField`] for a malformed zone.
    pub fn validate(&self) -> Result<(), VmError> {
        if self.source_image.trim().is_empty() {
            return Err(VmError::missing("source image"));
        }
        if self.image_projects.iter().all(|project| project.trim().is_empty()) {
            return Err(VmError::missing("image project"));
        }
        if self.zone_region().is_none() {
            return Err(VmError::InvalidField {
                field: String::from("zone"),
                reason: format!("'{}' is not of the form <region>-<letter>", self.zone),
            });
        }
        if self.ssh_public_key.trim().is_empty() {
            return Err(VmError::missing("ssh public key"));
        }
        self.credentials.validate()
    }

    fn zone(&self) -> &str {
        match self.zone.trim() {
            "" => DEFAULT_ZONE,
            zone => zone,
        }
    }

    /// Region containing the zone, such as `us-central1` for `us-central1-a`.
    #[must_use]
    pub fn zone_region(&self) -> Option<&str> {
        self.zone()
            .rsplit_once('-')
            .map(|(region, _)| region)
            .filter(|region| !region.is_empty())
    }

    fn or_default<'a>(value: &'a str, default: &'a str) -> &'a str {
        match value.trim() {
            "" => default,
            trimmed => trimmed,
        }
    }
}

/// Poll bounds used by [`GceVm`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GceTimeouts {
    /// Operations and status transitions.
    pub action: PollPolicy,
    /// SSH reachability.
    pub ssh: Duration,
}

impl Default for GceTimeouts {
    fn default() -> Self {
        Self {
            action: PollPolicy::new(POLL_INTERVAL, ACTION_TIMEOUT),
            ssh: SSH_TIMEOUT,
        }
    }
}

/// Compute Engine implementation of [`VirtualMachine`].
pub struct GceVm {
    api: Arc<dyn GceApi>,
    remote: Arc<dyn RemoteAccess>,
    name: String,
    spec: GceSpec,
    timeouts: GceTimeouts,
    instance: InstanceSlot,
}

impl GceVm {
    /// Creates an unprovisioned VM.
    #[must_use]
    pub fn new(spec: GceSpec, api: Arc<dyn GceApi>, remote: Arc<dyn RemoteAccess>) -> Self {
        Self {
            api,
            remote,
            name: name_or_default(&spec.name),
            spec,
            timeouts: GceTimeouts::default(),
            instance: InstanceSlot::new(),
        }
    }

    /// Overrides the poll bounds.
    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: GceTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    async fn resolve_image(&self) -> Result<String, VmError> {
        let image = self.spec.source_image.trim();
        for project in self
            .spec
            .image_projects
            .iter()
            .map(|project| project.trim())
            .filter(|project| !project.is_empty())
        {
            let found = self
                .api
                .get_image(project, image)
                .await
                .map_err(|err| VmError::api("get image", image, err))?;
            if let Some(linked) = found.filter(|linked| !linked.self_link.is_empty()) {
                debug!(image, project, "resolved source image");
                return Ok(linked.self_link);
            }
        }
        Err(VmError::NotFound {
            kind: String::from("image"),
            name: image.to_owned(),
        })
    }

    async fn resolve_machine_type(&self) -> Result<String, VmError> {
        let wanted = GceSpec::or_default(&self.spec.machine_type, DEFAULT_MACHINE_TYPE);
        self.api
            .get_machine_type(self.spec.zone(), wanted)
            .await
            .map_err(|err| VmError::api("get machine type", wanted, err))?
            .map(|linked| linked.self_link)
            .ok_or_else(|| VmError::NotFound {
                kind: String::from("machine type"),
                name: wanted.to_owned(),
            })
    }

    async fn resolve_network(&self) -> Result<(String, Option<String>), VmError> {
        let wanted = GceSpec::or_default(&self.spec.network, DEFAULT_NETWORK);
        let network = self
            .api
            .get_network(wanted)
            .await
            .map_err(|err| VmError::api("get network", wanted, err))?
            .ok_or_else(|| VmError::NotFound {
                kind: String::from("network"),
                name: wanted.to_owned(),
            })?;

        let subnetwork = self
            .spec
            .subnetwork
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty());
        let Some(subnetwork) = subnetwork else {
            if network.requires_subnetwork() {
                return Err(VmError::missing("subnetwork"));
            }
            return Ok((network.self_link, None));
        };

        let region = self.spec.zone_region().unwrap_or_default();
        let linked = self
            .api
            .get_subnetwork(region, subnetwork)
            .await
            .map_err(|err| VmError::api("get subnetwork", subnetwork, err))?
            .ok_or_else(|| VmError::NotFound {
                kind: String::from("subnetwork"),
                name: subnetwork.to_owned(),
            })?;
        Ok((network.self_link, Some(linked.self_link)))
    }

    async fn provision_steps(&mut self) -> Result<(), VmError> {
        self.instance.ensure_vacant(&self.name)?;
        self.spec.validate()?;

        let source_image = self.resolve_image().await?;
        let machine_type = self.resolve_machine_type().await?;
        let (network, subnetwork) = self.resolve_network().await?;
        let request = InstanceRequest {
            name: self.name.clone(),
            machine_type,
            source_image,
            disk_type: GceSpec::or_default(&self.spec.disk_type, DEFAULT_DISK_TYPE).to_owned(),
            disk_size_gb: match self.spec.disk_size_gb {
                0 => DEFAULT_DISK_SIZE_GB,
                size => size,
            },
            network,
            subnetwork,
            preemptible: self.spec.preemptible,
            tags: self.spec.tags.clone(),
            scopes: self.spec.scopes.clone(),
            ssh_keys: format!(
                "{}:{}",
                self.spec.credentials.user.trim(),
                self.spec.ssh_public_key.trim()
            ),
        };

        info!(vm = %self.name, zone = self.spec.zone(), "inserting instance");
        let operation = self
            .api
            .insert_instance(self.spec.zone(), &request)
            .await
            .map_err(|err| VmError::api("insert instance", &self.name, err))?;
        self.instance.assign(self.name.clone());
        self.wait_for_operation(&operation, "provision").await?;

        poll_state(self.timeouts.action, || self.instance_state(), VmState::Running)
            .await
            .map_err(|err| err.into_vm_error("provision", &self.name))?;

        let ips = self.fetch_instance().await?.ip_slots();
        let options = SshOptions {
            use_private_ip: self.spec.use_internal_ip,
            port: None,
        };
        open_session(
            self.remote.as_ref(),
            &self.name,
            ips,
            &self.spec.credentials,
            &options,
            self.timeouts.ssh,
        )
        .await?;
        info!(vm = %self.name, "instance provisioned");
        Ok(())
    }

    async fn wait_for_operation(&self, operation: &Operation, action: &str) -> Result<(), VmError> {
        let zone = self.spec.zone();
        poll_until(
            self.timeouts.action,
            || self.api.get_operation(zone, &operation.name),
            Operation::succeeded,
            Operation::failed,
        )
        .await
        .map(|_| ())
        .map_err(|err| err.into_vm_error(action, &operation.name))
    }

    async fn instance_state(&self) -> Result<VmState, ApiError> {
        let instance = self.api.get_instance(self.spec.zone(), &self.name).await?;
        Ok(instance.map_or(VmState::Unknown, |found| {
            translate_instance_status(&found.status)
        }))
    }

    async fn fetch_instance(&self) -> Result<Instance, VmError> {
        self.api
            .get_instance(self.spec.zone(), &self.name)
            .await
            .map_err(|err| VmError::api("get instance", &self.name, err))?
            .ok_or_else(|| {
                VmError::api(
                    "get instance",
                    &self.name,
                    ApiError::not_found("instance", &self.name),
                )
            })
    }

    async fn power_change(&self, operation: &'static str, start: bool) -> Result<(), VmError> {
        self.instance.require(&self.name)?;
        self.fetch_instance().await?;
        info!(vm = %self.name, operation, "changing instance power state");
        let zone = self.spec.zone();
        let submitted = if start {
            self.api.start_instance(zone, &self.name).await
        } else {
            self.api.stop_instance(zone, &self.name).await
        };
        let pending = submitted.map_err(|err| VmError::api(operation, &self.name, err))?;
        self.wait_for_operation(&pending, operation).await
    }

    async fn teardown_steps(&mut self) -> Result<(), VmError> {
        if self.instance.teardown_target(&self.name)?.is_none() {
            return Ok(());
        }
        self.remove_instance()
            .await
            .map_err(|err| VmError::teardown("instance", &self.name, err))?;
        self.instance.clear();
        info!(vm = %self.name, "instance destroyed");
        Ok(())
    }

    async fn remove_instance(&self) -> Result<(), VmError> {
        let zone = self.spec.zone();
        match self.api.delete_instance(zone, &self.name).await {
            Ok(operation) => self.wait_for_operation(&operation, "delete").await?,
            Err(err) => tolerate_absent(Err(err), "delete instance", &self.name)?,
        }
        poll_until(
            self.timeouts.action,
            || self.api.get_instance(zone, &self.name),
            Option::is_none,
            |_| false,
        )
        .await
        .map(|_| ())
        .map_err(|err| err.into_vm_error("delete", &self.name))
    }
}

impl VirtualMachine for GceVm {
    fn name(&self) -> &str {
        &self.name
    }

    fn provision(&mut self) -> VmFuture<'_, ()> {
        Box::pin(self.provision_steps())
    }

    fn start(&self) -> VmFuture<'_, ()> {
        Box::pin(self.power_change("start", true))
    }

    fn halt(&self) -> VmFuture<'_, ()> {
        Box::pin(self.power_change("halt", false))
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
            self.instance.require(&self.name)?;
            let instance = self.fetch_instance().await?;
            Ok(translate_instance_status(&instance.status))
        })
    }

    fn ips(&self) -> VmFuture<'_, IpSlots> {
        Box::pin(async move {
            self.instance.require(&self.name)?;
            Ok(self.fetch_instance().await?.ip_slots())
        })
    }

    fn destroy(&mut self) -> VmFuture<'_, ()> {
        Box::pin(self.teardown_steps())
    }

    fn ssh(&self, options: SshOptions) -> VmFuture<'_, Box<dyn RemoteSession>> {
        Box::pin(async move {
            self.instance.require(&self.name)?;
            let ips = self.fetch_instance().await?.ip_slots();
            let options = SshOptions {
                use_private_ip: options.use_private_ip || self.spec.use_internal_ip,
                ..options
            };
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
