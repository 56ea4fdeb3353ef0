//! CloudStack-style surface of the Exoscale compute API.
//!
//! Field names follow the lowercase keys CloudStack responses carry, so a
//! signing transport can decode straight into these types.

use std::net::IpAddr;

use serde::Deserialize;

use super::state::is_destroyed;
use crate::error::ApiFuture;
use crate::vm::IpSlots;
use crate::wait::Observation;

/// Featured template.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct Template {
    /// Template identifier.
    pub id: String,
    /// Template name.
    #[serde(default)]
    pub name: String,
    /// Zone the template is published in, lowercase.
    #[serde(default, rename = "zonename")]
    pub zone_name: String,
    /// Root disk size in bytes.
    #[serde(default)]
    pub size: u64,
}

/// Named resource with an identifier: offering, security group or zone.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct Named {
    /// Identifier.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
}

/// Network interface of a virtual machine.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct Nic {
    /// IPv4 address.
    #[serde(default, rename = "ipaddress")]
    pub ip_address: Option<String>,
    /// IPv6 address.
    #[serde(default, rename = "ip6address")]
    pub ip6_address: Option<String>,
    /// `true` for the interface on the default network.
    #[serde(default, rename = "isdefault")]
    pub is_default: bool,
}

impl Nic {
    fn address(&self) -> Option<IpAddr> {
        [self.ip_address.as_ref(), self.ip6_address.as_ref()]
            .into_iter()
            .flatten()
            .find_map(|literal| literal.parse().ok())
    }
}

/// Virtual machine listing entry.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct VirtualMachineInfo {
    /// Identifier.
    pub id: String,
    /// Display name.
    #[serde(default, rename = "displayname")]
    pub display_name: String,
    /// Backend state token.
    #[serde(default)]
    pub state: String,
    /// Network interfaces.
    #[serde(default, rename = "nic")]
    pub nics: Vec<Nic>,
}

impl VirtualMachineInfo {
    /// Places the default NIC in the public slot and the first other NIC in
    /// the private slot.
    #[must_use]
    pub fn ip_slots(&self) -> IpSlots {
        let public = self
            .nics
            .iter()
            .filter(|nic| nic.is_default)
            .find_map(Nic::address);
        let private = self
            .nics
            .iter()
            .filter(|nic| !nic.is_default)
            .find_map(Nic::address);
        IpSlots::new(public, private)
    }

    /// Returns `true` once the VM reports a post-destroy state.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        is_destroyed(&self.state)
    }
}

impl Observation for VirtualMachineInfo {
    fn describe(&self) -> String {
        self.state.clone()
    }
}

/// Async job progress.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JobStatus {
    /// Still running.
    Pending,
    /// Finished successfully.
    Success,
    /// Finished with an error.
    Failure,
}

impl JobStatus {
    /// Maps the numeric CloudStack job status (0, 1, 2).
    #[must_use]
    pub const fn from_code(code: u8) -> Self {
        match code {
            1 => Self::Success,
            2 => Self::Failure,
            _ => Self::Pending,
        }
    }
}

/// Result of polling an async job.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Job {
    /// Job identifier.
    pub id: String,
    /// Progress.
    pub status: JobStatus,
    /// VM the job acted on, once known.
    pub vm_id: Option<String>,
    /// Error text of a failed job.
    pub error: Option<String>,
}

impl Job {
    /// Returns `true` for a successful job.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        matches!(self.status, JobStatus::Success)
    }

    /// Returns `true` for a failed job.
    #[must_use]
    pub const fn failed(&self) -> bool {
        matches!(self.status, JobStatus::Failure)
    }
}

impl Observation for Job {
    fn describe(&self) -> String {
        match (self.status, &self.error) {
            (JobStatus::Pending, _) => String::from("pending"),
            (JobStatus::Success, _) => String::from("success"),
            (JobStatus::Failure, Some(error)) => format!("failure ({error})"),
            (JobStatus::Failure, None) => String::from("failure"),
        }
    }
}

/// Parameters of `deployVirtualMachine`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeployRequest {
    /// Display name.
    pub name: String,
    /// Template identifier.
    pub template_id: String,
    /// Service offering identifier.
    pub service_offering_id: String,
    /// Security group identifiers.
    pub security_group_ids: Vec<String>,
    /// SSH keypair name.
    pub keypair: Option<String>,
    /// User data passed to the guest.
    pub user_data: Option<String>,
    /// Zone identifier.
    pub zone_id: String,
}

/// Acknowledgement of `deployVirtualMachine`.
///
/// CloudStack allocates the VM id synchronously and finishes the deployment
/// in the async job.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct DeployedVm {
    /// Identifier of the new virtual machine.
    pub id: String,
    /// Async job completing the deployment.
    #[serde(rename = "jobid")]
    pub job_id: String,
}

/// Calls the Exoscale adapter issues.
///
/// Mutations return the identifier of an async job that is polled with
/// [`ExoscaleApi::query_job`].
pub trait ExoscaleApi: Send + Sync {
    /// Lists featured templates named `name`.
    fn list_templates<'a>(&'a self, name: &'a str) -> ApiFuture<'a, Vec<Template>>;
    /// Lists service offerings named `name`.
    fn list_service_offerings<'a>(&'a self, name: &'a str) -> ApiFuture<'a, Vec<Named>>;
    /// Lists every security group.
    fn list_security_groups(&self) -> ApiFuture<'_, Vec<Named>>;
    /// Lists zones named `name`.
    fn list_zones<'a>(&'a self, name: &'a str) -> ApiFuture<'a, Vec<Named>>;
    /// Deploys a virtual machine.
    fn deploy_virtual_machine<'a>(
        &'a self,
        request: &'a DeployRequest,
    ) -> ApiFuture<'a, DeployedVm>;
    /// Polls an async job.
    fn query_job<'a>(&'a self, job_id: &'a str) -> ApiFuture<'a, Job>;
    /// Fetches a virtual machine by id.
    fn get_virtual_machine<'a>(&'a self, id: &'a str)
    -> ApiFuture<'a, Option<VirtualMachineInfo>>;
    /// Starts a virtual machine.
    fn start_virtual_machine<'a>(&'a self, id: &'a str) -> ApiFuture<'a, String>;
    /// Stops a virtual machine.
    fn stop_virtual_machine<'a>(&'a self, id: &'a str) -> ApiFuture<'a, String>;
    /// Destroys a virtual machine.
    fn destroy_virtual_machine<'a>(&'a self, id: &'a str) -> ApiFuture<'a, String>;
}
