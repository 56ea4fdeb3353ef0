//! Compute Engine surface consumed by the adapter.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use super::state::OPERATION_DONE;
use crate::error::ApiFuture;
use crate::vm::IpSlots;
use crate::wait::Observation;

/// Any resource addressed by its self link.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Linked {
    /// Resource name.
    #[serde(default)]
    pub name: String,
    /// Fully qualified resource URL.
    #[serde(default)]
    pub self_link: String,
}

/// VPC network.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    /// Fully qualified resource URL.
    #[serde(default)]
    pub self_link: String,
    /// `true` for auto-mode networks.
    #[serde(default)]
    pub auto_create_subnetworks: bool,
    /// Subnetwork URLs of a custom-mode network.
    #[serde(default)]
    pub subnetworks: Vec<String>,
}

impl Network {
    /// Returns `true` when instances must name a subnetwork.
    #[must_use]
    pub fn requires_subnetwork(&self) -> bool {
        !self.auto_create_subnetworks && !self.subnetworks.is_empty()
    }
}

/// One error carried by a finished operation.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct OperationErrorItem {
    /// Error code.
    #[serde(default)]
    pub code: String,
    /// Error message.
    #[serde(default)]
    pub message: String,
}

/// Errors carried by a finished operation.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct OperationError {
    /// Individual errors.
    #[serde(default)]
    pub errors: Vec<OperationErrorItem>,
}

/// Zonal operation handle returned by every mutation.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct Operation {
    /// Operation name used to poll it.
    pub name: String,
    /// `PENDING`, `RUNNING` or `DONE`.
    #[serde(default)]
    pub status: String,
    /// Present when the operation failed.
    #[serde(default)]
    pub error: Option<OperationError>,
}

impl Operation {
    /// Returns `true` once the operation has finished.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.status == OPERATION_DONE
    }

    /// Returns `true` for a finished operation without errors.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.is_done() && !self.failed()
    }

    /// Returns `true` for a finished operation that carries errors.
    #[must_use]
    pub fn failed(&self) -> bool {
        self.is_done()
            && self
                .error
                .as_ref()
                .is_some_and(|error| !error.errors.is_empty())
    }
}

impl Observation for Operation {
    fn describe(&self) -> String {
        let first_error = self
            .error
            .as_ref()
            .and_then(|error| error.errors.first())
            .map(|item| format!("{}: {}", item.code, item.message));
        match first_error {
            Some(detail) => format!("{} ({detail})", self.status),
            None => self.status.clone(),
        }
    }
}

/// External NAT configuration of a network interface.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccessConfig {
    /// External address.
    #[serde(default, rename = "natIP")]
    pub nat_ip: Option<String>,
}

/// Network interface of an instance.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    /// Internal address.
    #[serde(default, rename = "networkIP")]
    pub network_ip: Option<String>,
    /// External NAT configurations.
    #[serde(default)]
    pub access_configs: Vec<AccessConfig>,
}

/// Compute Engine instance snapshot.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    /// Instance name.
    pub name: String,
    /// Instance status token.
    #[serde(default)]
    pub status: String,
    /// Network interfaces in attachment order.
    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterface>,
}

impl Instance {
    /// Returns the first NAT address as public and the first internal
    /// address as private.
    #[must_use]
    pub fn ip_slots(&self) -> IpSlots {
        let parse = |literal: Option<&String>| literal.and_then(|value| value.parse::<IpAddr>().ok());
        let public = self
            .network_interfaces
            .iter()
            .flat_map(|nic| nic.access_configs.iter())
            .find_map(|config| parse(config.nat_ip.as_ref()));
        let private = self
            .network_interfaces
            .iter()
            .find_map(|nic| parse(nic.network_ip.as_ref()));
        IpSlots::new(public, private)
    }
}

impl Observation for Instance {
    fn describe(&self) -> String {
        self.status.clone()
    }
}

/// Parameters for inserting an instance.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct InstanceRequest {
    /// Instance name.
    pub name: String,
    /// Machine type self link.
    pub machine_type: String,
    /// Source image self link.
    pub source_image: String,
    /// Boot disk type name.
    pub disk_type: String,
    /// Boot disk size in gigabytes.
    pub disk_size_gb: u32,
    /// Network self link.
    pub network: String,
    /// Subnetwork self link, for custom-mode networks.
    pub subnetwork: Option<String>,
    /// Request a preemptible instance.
    pub preemptible: bool,
    /// Network tags.
    pub tags: Vec<String>,
    /// Service account scopes.
    pub scopes: Vec<String>,
    /// `user:key` entry for the `ssh-keys` metadata item.
    pub ssh_keys: String,
}

/// Calls the Compute Engine adapter issues within one project.
///
/// Lookups return `Ok(None)` when the resource is absent.
pub trait GceApi: Send + Sync {
    /// Looks up an image in `project`.
    fn get_image<'a>(&'a self, project: &'a str, name: &'a str) -> ApiFuture<'a, Option<Linked>>;
    /// Looks up a machine type in `zone`.
    fn get_machine_type<'a>(&'a self, zone: &'a str, name: &'a str)
    -> ApiFuture<'a, Option<Linked>>;
    /// Looks up a network.
    fn get_network<'a>(&'a self, name: &'a str) -> ApiFuture<'a, Option<Network>>;
    /// Looks up a subnetwork in `region`.
    fn get_subnetwork<'a>(&'a self, region: &'a str, name: &'a str)
    -> ApiFuture<'a, Option<Linked>>;
    /// Inserts an instance.
    fn insert_instance<'a>(
        &'a self,
        zone: &'a str,
        request: &'a InstanceRequest,
    ) -> ApiFuture<'a, Operation>;
    /// Fetches an instance.
    fn get_instance<'a>(&'a self, zone: &'a str, name: &'a str) -> ApiFuture<'a, Option<Instance>>;
    /// Starts an instance.
    fn start_instance<'a>(&'a self, zone: &'a str, name: &'a str) -> ApiFuture<'a, Operation>;
    /// Stops an instance.
    fn stop_instance<'a>(&'a self, zone: &'a str, name: &'a str) -> ApiFuture<'a, Operation>;
    /// Deletes an instance.
    fn delete_instance<'a>(&'a self, zone: &'a str, name: &'a str) -> ApiFuture<'a, Operation>;
    /// Fetches a zonal operation.
    fn get_operation<'a>(&'a self, zone: &'a str, name: &'a str) -> ApiFuture<'a, Operation>;
}
