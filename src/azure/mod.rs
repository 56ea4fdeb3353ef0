//! Azure Resource Manager adapter.
//!
//! A VM is created by submitting a caller-supplied ARM template with
//! parameters derived from [`AzureSpec`]. The template must declare these
//! string parameters: `vm_name`, `vm_size`, `image_publisher`, `image_offer`,
//! `image_sku`, `image_version`, `admin_username`, `ssh_authorized_key`,
//! `nic`, `os_disk`, `public_ip`, `virtual_network` and `subnet`, plus
//! `location` when [`AzureSpec::location`] is set.

mod api;
mod client;
mod state;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::{Map, Value, json};
use tracing::{debug, info};

pub use api::{AzureApi, AzureResource, Deployment, InstanceStatus, InstanceView};
pub use client::{AzureClient, AzureTarget, DEFAULT_MANAGEMENT_URL};
pub use state::{
    DEPLOYMENT_FAILED_STATES, DEPLOYMENT_SUCCEEDED, is_failed_deployment, translate_power_state,
};

use crate::error::{ApiError, VmError, tolerate_absent};
use crate::remote::{Credentials, RemoteAccess, RemoteSession, SshOptions, open_session};
use crate::vm::{InstanceSlot, IpSlots, VirtualMachine, VmFuture, VmState, name_or_default};
use crate::wait::{PollPolicy, poll_state, poll_until};

const BACKEND: &str = "azure";
const SUFFIX_LEN: usize = 6;

/// Interval between status polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Bound on power transitions and deletions.
pub const ACTION_TIMEOUT: Duration = Duration::from_secs(90);
/// Bound on the template deployment.
pub const DEPLOYMENT_TIMEOUT: Duration = Duration::from_secs(900);
/// Bound on SSH reachability.
pub const SSH_TIMEOUT: Duration = Duration::from_secs(60);
/// Longest public IP resource name Azure accepts.
pub const MAX_PUBLIC_IP_NAME: usize = 63;

/// Creation parameters for an Azure VM.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AzureSpec {
    /// VM name; a default is generated when blank.
    pub name: String,
    /// Region; the template decides when unset.
    pub location: Option<String>,
    /// VM size, such as `Standard_B1s`.
    pub size: String,
    /// Marketplace image publisher.
    pub image_publisher: String,
    /// Marketplace image offer.
    pub image_offer: String,
    /// Marketplace image SKU.
    pub image_sku: String,
    /// Marketplace image version; `latest` when blank.
    pub image_version: String,
    /// Existing virtual network.
    pub virtual_network: String,
    /// Subnet within the virtual network.
    pub subnet: String,
    /// ARM template document.
    pub template: Value,
    /// OpenSSH public key authorised for the admin user.
    pub ssh_public_key: String,
    /// Admin user and private key used over SSH.
    pub credentials: Credentials,
}

impl AzureSpec {
    /// Checks mandatory fields without contacting the backend.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::MissingField`] for the first missing field.
    pub fn validate(&self) -> Result<(), VmError> {
        if !self.template.is_object() {
            return Err(VmError::missing("deployment template"));
        }
        let required = [
            (&self.image_publisher, "image publisher"),
            (&self.image_offer, "image offer"),
            (&self.image_sku, "image sku"),
            (&self.size, "vm size"),
            (&self.virtual_network, "virtual network"),
            (&self.subnet, "subnet"),
            (&self.ssh_public_key, "ssh public key"),
        ];
        if let Some((_, field)) = required.iter().find(|(value, _)| value.trim().is_empty()) {
            return Err(VmError::missing(*field));
        }
        self.credentials.validate()
    }
}

/// Names of the resources one deployment creates.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResourceNames {
    /// Deployment name.
    pub deployment: String,
    /// Network interface name.
    pub nic: String,
    /// OS disk name.
    pub os_disk: String,
    /// Public IP name, at most [`MAX_PUBLIC_IP_NAME`] characters.
    pub public_ip: String,
}

impl ResourceNames {
    /// Derives resource names from the VM name and a suffix.
    #[must_use]
    pub fn new(vm_name: &str, suffix: &str) -> Self {
        let base = format!("{vm_name}-{suffix}");
        let public_ip = format!("{base}-public-ip");
        let excess = public_ip.chars().count().saturating_sub(MAX_PUBLIC_IP_NAME);
        Self {
            deployment: base.clone(),
            nic: format!("{base}-nic"),
            os_disk: format!("{base}-os-disk"),
            public_ip: public_ip.chars().skip(excess).collect(),
        }
    }

    /// Derives resource names with a random six-letter suffix.
    #[must_use]
    pub fn generate(vm_name: &str) -> Self {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..SUFFIX_LEN)
            .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
            .collect();
        Self::new(vm_name, &suffix)
    }

    fn name_of<'a>(&'a self, vm_name: &'a str, kind: AzureResource) -> &'a str {
        match kind {
            AzureResource::VirtualMachine => vm_name,
            AzureResource::Disk => &self.os_disk,
            AzureResource::NetworkInterface => &self.nic,
            AzureResource::PublicIp => &self.public_ip,
        }
    }
}

/// Poll bounds used by [`AzureVm`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AzureTimeouts {
    /// Power transitions and deletions.
    pub action: PollPolicy,
    /// Template deployment.
    pub deployment: PollPolicy,
    /// SSH reachability.
    pub ssh: Duration,
}

impl Default for AzureTimeouts {
    fn default() -> Self {
        Self {
            action: PollPolicy::new(POLL_INTERVAL, ACTION_TIMEOUT),
            deployment: PollPolicy::new(POLL_INTERVAL, DEPLOYMENT_TIMEOUT),
            ssh: SSH_TIMEOUT,
        }
    }
}

/// Azure implementation of [`VirtualMachine`].
pub struct AzureVm {
    api: Arc<dyn AzureApi>,
    remote: Arc<dyn RemoteAccess>,
    name: String,
    spec: AzureSpec,
    timeouts: AzureTimeouts,
    instance: InstanceSlot,
    names: Option<ResourceNames>,
    remaining: Vec<AzureResource>,
}

impl AzureVm {
    /// Creates an unprovisioned VM.
    #[must_use]
    pub fn new(spec: AzureSpec, api: Arc<dyn AzureApi>, remote: Arc<dyn RemoteAccess>) -> Self {
        Self {
            api,
            remote,
            name: name_or_default(&spec.name),
            spec,
            timeouts: AzureTimeouts::default(),
            instance: InstanceSlot::new(),
            names: None,
            remaining: Vec::new(),
        }
    }

    /// Overrides the poll bounds.
    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: AzureTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Resource names chosen at provision time.
    #[must_use]
    pub const fn resource_names(&self) -> Option<&ResourceNames> {
        self.names.as_ref()
    }

    /// Resources a teardown still has to remove.
    #[must_use]
    pub fn remaining_resources(&self) -> &[AzureResource] {
        &self.remaining
    }

    fn parameters(&self, names: &ResourceNames) -> Value {
        let version = match self.spec.image_version.trim() {
            "" => "latest",
            version => version,
        };
        let mut values = vec![
            ("vm_name", self.name.as_str()),
            ("vm_size", self.spec.size.trim()),
            ("image_publisher", self.spec.image_publisher.trim()),
            ("image_offer", self.spec.image_offer.trim()),
            ("image_sku", self.spec.image_sku.trim()),
            ("image_version", version),
            ("admin_username", self.spec.credentials.user.trim()),
            ("ssh_authorized_key", self.spec.ssh_public_key.trim()),
            ("nic", names.nic.as_str()),
            ("os_disk", names.os_disk.as_str()),
            ("public_ip", names.public_ip.as_str()),
            ("virtual_network", self.spec.virtual_network.trim()),
            ("subnet", self.spec.subnet.trim()),
        ];
        if let Some(location) = self.spec.location.as_deref().map(str::trim)
            && !location.is_empty()
        {
            values.push(("location", location));
        }
        let map: Map<String, Value> = values
            .into_iter()
            .map(|(key, value)| (key.to_owned(), json!({ "value": value })))
            .collect();
        Value::Object(map)
    }

    async fn provision_steps(&mut self) -> Result<(), VmError> {
        self.instance.ensure_vacant(&self.name)?;
        self.spec.validate()?;

        let names = ResourceNames::generate(&self.name);
        let deployment = Deployment {
            name: names.deployment.clone(),
            template: self.spec.template.clone(),
            parameters: self.parameters(&names),
        };
        info!(vm = %self.name, deployment = %deployment.name, "submitting deployment");
        self.api
            .create_deployment(&deployment)
            .await
            .map_err(|err| VmError::api("create deployment", &deployment.name, err))?;
        self.instance.assign(self.name.clone());
        self.remaining = vec![
            AzureResource::VirtualMachine,
            AzureResource::Disk,
            AzureResource::NetworkInterface,
            AzureResource::PublicIp,
        ];
        self.names = Some(names);

        poll_until(
            self.timeouts.deployment,
            || self.api.deployment_state(&deployment.name),
            |state| state.as_deref() == Some(DEPLOYMENT_SUCCEEDED),
            |state| state.as_deref().is_some_and(is_failed_deployment),
        )
        .await
        .map_err(|err| err.into_vm_error("deploy", &deployment.name))?;

        self.wait_for_power(VmState::Running, "provision").await?;
        let ips = self.ip_slots().await?;
        open_session(
            self.remote.as_ref(),
            &self.name,
            ips,
            &self.spec.credentials,
            &SshOptions::default(),
            self.timeouts.ssh,
        )
        .await?;
        info!(vm = %self.name, "virtual machine provisioned");
        Ok(())
    }

    async fn power_state(&self) -> Result<VmState, ApiError> {
        let view = self.api.instance_view(&self.name).await?;
        Ok(view.map_or(VmState::Unknown, |found| {
            translate_power_state(found.display_status())
        }))
    }

    async fn wait_for_power(&self, target: VmState, action: &str) -> Result<(), VmError> {
        poll_state(self.timeouts.action, || self.power_state(), target)
            .await
            .map(|_| ())
            .map_err(|err| err.into_vm_error(action, &self.name))
    }

    async fn ip_slots(&self) -> Result<IpSlots, VmError> {
        let Some(names) = &self.names else {
            return Ok(IpSlots::default());
        };
        let public = self
            .api
            .public_ip_address(&names.public_ip)
            .await
            .map_err(|err| VmError::api("get public IP", &names.public_ip, err))?;
        let private = self
            .api
            .private_ip_address(&names.nic)
            .await
            .map_err(|err| VmError::api("get private IP", &names.nic, err))?;
        let parse = |address: Option<String>| {
            address.and_then(|literal| literal.trim().parse::<IpAddr>().ok())
        };
        Ok(IpSlots::new(parse(public), parse(private)))
    }

    async fn power_change(
        &self,
        operation: &'static str,
        target: VmState,
    ) -> Result<(), VmError> {
        self.instance.require(&self.name)?;
        info!(vm = %self.name, operation, "changing power state");
        let result = match target {
            VmState::Running => self.api.start(&self.name).await,
            _ => self.api.power_off(&self.name).await,
        };
        result.map_err(|err| VmError::api(operation, &self.name, err))?;
        self.wait_for_power(target, operation).await
    }

    async fn teardown_steps(&mut self) -> Result<(), VmError> {
        if self.instance.teardown_target(&self.name)?.is_none() {
            return Ok(());
        }
        let names = self.names.clone();

        while let Some(kind) = self.remaining.first().copied() {
            let resource = names
                .as_ref()
                .map_or(self.name.as_str(), |names| names.name_of(&self.name, kind))
                .to_owned();
            self.remove(kind, &resource)
                .await
                .map_err(|err| VmError::teardown(kind.to_string(), &resource, err))?;
            self.remaining.remove(0);
        }

        self.instance.clear();
        info!(vm = %self.name, "virtual machine destroyed");
        Ok(())
    }

    async fn remove(&self, kind: AzureResource, name: &str) -> Result<(), VmError> {
        debug!(vm = %self.name, resource = %kind, name, "deleting resource");
        tolerate_absent(
            self.api.delete_resource(kind, name).await,
            "delete resource",
            name,
        )?;
        poll_until(
            self.timeouts.action,
            || self.api.resource_exists(kind, name),
            |exists| !*exists,
            |_| false,
        )
        .await
        .map(|_| ())
        .map_err(|err| err.into_vm_error("delete", name))
    }
}

impl VirtualMachine for AzureVm {
    fn name(&self) -> &str {
        &self.name
    }

    fn provision(&mut self) -> VmFuture<'_, ()> {
        Box::pin(self.provision_steps())
    }

    fn start(&self) -> VmFuture<'_, ()> {
        Box::pin(self.power_change("start", VmState::Running))
    }

    fn halt(&self) -> VmFuture<'_, ()> {
        Box::pin(self.power_change("halt", VmState::Halted))
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
            let view = self
                .api
                .instance_view(&self.name)
                .await
                .map_err(|err| VmError::api("get state", &self.name, err))?
                .ok_or_else(|| {
                    VmError::api(
                        "get state",
                        &self.name,
                        ApiError::not_found("virtual machine", &self.name),
                    )
                })?;
            Ok(translate_power_state(view.display_status()))
        })
    }

    fn ips(&self) -> VmFuture<'_, IpSlots> {
        Box::pin(async move {
            self.instance.require(&self.name)?;
            self.ip_slots().await
        })
    }

    fn destroy(&mut self) -> VmFuture<'_, ()> {
        Box::pin(self.teardown_steps())
    }

    fn ssh(&self, options: SshOptions) -> VmFuture<'_, Box<dyn RemoteSession>> {
        Box::pin(async move {
            self.instance.require(&self.name)?;
            let ips = self.ip_slots().await?;
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
