//! Exoscale adapter.
//!
//! Exoscale speaks the CloudStack dialect: names are resolved to ids up
//! front, every mutation returns an async job, and the job result carries the
//! id of the VM it acted on. Request signing belongs to the injected
//! [`ExoscaleApi`] implementation.

mod api;
mod state;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

pub use api::{
    DeployRequest, DeployedVm, ExoscaleApi, Job, JobStatus, Named, Nic, Template,
    VirtualMachineInfo,
};
pub use state::{DESTROYED_STATES, is_destroyed, translate_vm_state};

use crate::error::{ApiError, VmError, tolerate_absent};
use crate::remote::{Credentials, RemoteAccess, RemoteSession, SshOptions, open_session};
use crate::vm::{InstanceSlot, IpSlots, VirtualMachine, VmFuture, VmState, name_or_default};
use crate::wait::{PollPolicy, poll_state, poll_until};

const BACKEND: &str = "exoscale";

/// Root disk size used when none is configured.
pub const DEFAULT_STORAGE_GB: u32 = 10;
/// Interval between job and state polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Bound on each job and state transition.
pub const ACTION_TIMEOUT: Duration = Duration::from_secs(300);
/// Bound on SSH reachability.
pub const SSH_TIMEOUT: Duration = Duration::from_secs(30);

/// Creation parameters for an Exoscale virtual machine.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExoscaleSpec {
    /// Display name; a default is generated when blank.
    pub name: String,
    /// Featured template name, such as `Linux Ubuntu 22.04 LTS 64-bit`.
    pub template_name: String,
    /// Root disk size the template must provide.
    pub storage_gb: u32,
    /// Service offering name, such as `Medium`.
    pub service_offering: String,
    /// Zone name, such as `ch-gva-2`.
    pub zone: String,
    /// Security group names.
    pub security_groups: Vec<String>,
    /// SSH keypair registered with the account.
    pub keypair: Option<String>,
    /// User data passed to the guest.
    pub user_data: Option<String>,
    /// Credentials used over SSH.
    pub credentials: Credentials,
}

impl ExoscaleSpec {
    /// Checks mandatory fields without contacting the backend.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::MissingField`] for the first missing field.
    pub fn validate(&self) -> Result<(), VmError> {
        if self.template_name.trim().is_empty() {
            return Err(VmError::missing("template name"));
        }
        if self.service_offering.trim().is_empty() {
            return Err(VmError::missing("service offering"));
        }
        if self.zone.trim().is_empty() {
            return Err(VmError::missing("zone"));
        }
        Ok(())
    }

    const fn storage_gb(&self) -> u32 {
        match self.storage_gb {
            0 => DEFAULT_STORAGE_GB,
            size => size,
        }
    }
}

/// Poll bounds used by [`ExoscaleVm`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ExoscaleTimeouts {
    /// Jobs and state transitions.
    pub action: PollPolicy,
    /// SSH reachability.
    pub ssh: Duration,
}

impl Default for ExoscaleTimeouts {
    fn default() -> Self {
        Self {
            action: PollPolicy::new(POLL_INTERVAL, ACTION_TIMEOUT),
            ssh: SSH_TIMEOUT,
        }
    }
}

/// Exoscale implementation of [`VirtualMachine`].
pub struct ExoscaleVm {
    api: Arc<dyn ExoscaleApi>,
    remote: Arc<dyn RemoteAccess>,
    name: String,
    spec: ExoscaleSpec,
    timeouts: ExoscaleTimeouts,
    instance: InstanceSlot,
}

impl ExoscaleVm {
    /// Creates an unprovisioned VM.
    #[must_use]
    pub fn new(
        spec: ExoscaleSpec,
        api: Arc<dyn ExoscaleApi>,
        remote: Arc<dyn RemoteAccess>,
    ) -> Self {
        Self {
            api,
            remote,
            name: name_or_default(&spec.name),
            spec,
            timeouts: ExoscaleTimeouts::default(),
            instance: InstanceSlot::new(),
        }
    }

    /// Overrides the poll bounds.
    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: ExoscaleTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Backend identifier, once provisioned.
    #[must_use]
    pub fn instance_id(&self) -> Option<&str> {
        self.instance.id()
    }

    async fn resolve_template(&self) -> Result<String, VmError> {
        let name = self.spec.template_name.trim();
        let storage_gb = self.spec.storage_gb();
        let size = u64::from(storage_gb) << 30;
        let zone = self.spec.zone.trim();
        let templates = self
            .api
            .list_templates(name)
            .await
            .map_err(|err| VmError::api("list templates", name, err))?;
        templates
            .into_iter()
            .find(|template| template.size == size && template.zone_name.eq_ignore_ascii_case(zone))
            .map(|template| template.id)
            .ok_or_else(|| VmError::NotFound {
                kind: String::from("template"),
                name: format!("{name}/{storage_gb}GB/{zone}"),
            })
    }

    async fn resolve_service_offering(&self) -> Result<String, VmError> {
        let wanted = self.spec.service_offering.trim().to_ascii_lowercase();
        let offerings = self
            .api
            .list_service_offerings(&wanted)
            .await
            .map_err(|err| VmError::api("list service offerings", &wanted, err))?;
        match offerings.as_slice() {
            [offering] => Ok(offering.id.clone()),
            [] => Err(VmError::NotFound {
                kind: String::from("service offering"),
                name: wanted,
            }),
            many => Err(VmError::Ambiguous {
                kind: String::from("service offering"),
                name: wanted,
                count: many.len(),
            }),
        }
    }

    async fn resolve_security_groups(&self) -> Result<Vec<String>, VmError> {
        let wanted: Vec<&str> = self
            .spec
            .security_groups
            .iter()
            .map(|group| group.trim())
            .filter(|group| !group.is_empty())
            .collect();
        if wanted.is_empty() {
            return Ok(Vec::new());
        }
        let known = self
            .api
            .list_security_groups()
            .await
            .map_err(|err| VmError::api("list security groups", &self.name, err))?;
        wanted
            .into_iter()
            .map(|name| {
                known
                    .iter()
                    .find(|group| group.name == name)
                    .map(|group| group.id.clone())
                    .ok_or_else(|| VmError::NotFound {
                        kind: String::from("security group"),
                        name: name.to_owned(),
                    })
            })
            .collect()
    }

    async fn resolve_zone(&self) -> Result<String, VmError> {
        let wanted = self.spec.zone.trim();
        let zones = self
            .api
            .list_zones(&wanted.to_ascii_lowercase())
            .await
            .map_err(|err| VmError::api("list zones", wanted, err))?;
        zones
            .into_iter()
            .find(|zone| zone.name.eq_ignore_ascii_case(wanted))
            .map(|zone| zone.id)
            .ok_or_else(|| VmError::NotFound {
                kind: String::from("zone"),
                name: wanted.to_owned(),
            })
    }

    async fn provision_steps(&mut self) -> Result<(), VmError> {
        self.instance.ensure_vacant(&self.name)?;
        self.spec.validate()?;

        let request = DeployRequest {
            name: self.name.clone(),
            template_id: self.resolve_template().await?,
            service_offering_id: self.resolve_service_offering().await?,
            security_group_ids: self.resolve_security_groups().await?,
            keypair: self.spec.keypair.clone(),
            user_data: self.spec.user_data.clone(),
            zone_id: self.resolve_zone().await?,
        };
        debug!(vm = %self.name, template = %request.template_id, "resolved deployment");

        info!(vm = %self.name, zone = %self.spec.zone, "deploying virtual machine");
        let deployed = self
            .api
            .deploy_virtual_machine(&request)
            .await
            .map_err(|err| VmError::api("deploy virtual machine", &self.name, err))?;
        let id = deployed.id;
        self.instance.assign(id.clone());
        debug!(vm = %self.name, id = %id, job = %deployed.job_id, "deployment accepted");
        self.wait_for_job(&deployed.job_id, "provision").await?;

        poll_state(self.timeouts.action, || self.vm_state(&id), VmState::Running)
            .await
            .map_err(|err| err.into_vm_error("provision", &id))?;
        info!(vm = %self.name, id = %id, "virtual machine provisioned");
        Ok(())
    }

    async fn wait_for_job(&self, job_id: &str, action: &str) -> Result<Job, VmError> {
        poll_until(
            self.timeouts.action,
            || self.api.query_job(job_id),
            Job::succeeded,
            Job::failed,
        )
        .await
        .map_err(|err| err.into_vm_error(action, job_id))
    }

    async fn vm_state(&self, id: &str) -> Result<VmState, ApiError> {
        let found = self.api.get_virtual_machine(id).await?;
        Ok(found.map_or(VmState::Unknown, |vm| translate_vm_state(&vm.state)))
    }

    async fn fetch(&self, id: &str) -> Result<VirtualMachineInfo, VmError> {
        self.api
            .get_virtual_machine(id)
            .await
            .map_err(|err| VmError::api("get virtual machine", id, err))?
            .ok_or_else(|| {
                VmError::api(
                    "get virtual machine",
                    id,
                    ApiError::not_found("virtual machine", id),
                )
            })
    }

    async fn power_change(
        &self,
        operation: &'static str,
        target: VmState,
    ) -> Result<(), VmError> {
        let id = self.instance.require(&self.name)?;
        info!(vm = %self.name, operation, "changing virtual machine power state");
        let submitted = if target == VmState::Running {
            self.api.start_virtual_machine(id).await
        } else {
            self.api.stop_virtual_machine(id).await
        };
        let job_id = submitted.map_err(|err| VmError::api(operation, id, err))?;
        self.wait_for_job(&job_id, operation).await?;
        poll_state(self.timeouts.action, || self.vm_state(id), target)
            .await
            .map(|_| ())
            .map_err(|err| err.into_vm_error(operation, id))
    }

    async fn teardown_steps(&mut self) -> Result<(), VmError> {
        let Some(id) = self.instance.teardown_target(&self.name)? else {
            return Ok(());
        };
        self.remove(&id)
            .await
            .map_err(|err| VmError::teardown("virtual machine", &id, err))?;
        self.instance.clear();
        info!(vm = %self.name, id = %id, "virtual machine destroyed");
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), VmError> {
        match self.api.destroy_virtual_machine(id).await {
            Ok(job_id) => {
                self.wait_for_job(&job_id, "destroy").await?;
            }
            Err(err) => tolerate_absent(Err(err), "destroy virtual machine", id)?,
        }
        poll_until(
            self.timeouts.action,
            || self.api.get_virtual_machine(id),
            |found| found.as_ref().is_none_or(VirtualMachineInfo::is_destroyed),
            |found| {
                found
                    .as_ref()
                    .is_some_and(|vm| translate_vm_state(&vm.state).is_error())
            },
        )
        .await
        .map(|_| ())
        .map_err(|err| err.into_vm_error("destroy", id))
    }
}

impl VirtualMachine for ExoscaleVm {
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
            let id = self.instance.require(&self.name)?;
            let vm = self.fetch(id).await?;
            Ok(translate_vm_state(&vm.state))
        })
    }

    fn ips(&self) -> VmFuture<'_, IpSlots> {
        Box::pin(async move {
            let id = self.instance.require(&self.name)?;
            Ok(self.fetch(id).await?.ip_slots())
        })
    }

    fn destroy(&mut self) -> VmFuture<'_, ()> {
        Box::pin(self.teardown_steps())
    }

    fn ssh(&self, options: SshOptions) -> VmFuture<'_, Box<dyn RemoteSession>> {
        Box::pin(async move {
            let id = self.instance.require(&self.name)?;
            let ips = self.fetch(id).await?.ip_slots();
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
