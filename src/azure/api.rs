//! Azure Resource Manager surface consumed by the adapter.

use std::fmt;

use serde::Deserialize;
use serde_json::Value;

use crate::error::ApiFuture;

/// Side-resources created by the deployment template.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AzureResource {
    /// The virtual machine.
    VirtualMachine,
    /// Managed OS disk.
    Disk,
    /// Network interface.
    NetworkInterface,
    /// Public IP address.
    PublicIp,
}

impl AzureResource {
    /// Resource provider path segment.
    #[must_use]
    pub const fn provider_path(self) -> &'static str {
        match self {
            Self::VirtualMachine => "Microsoft.Compute/virtualMachines",
            Self::Disk => "Microsoft.Compute/disks",
            Self::NetworkInterface => "Microsoft.Network/networkInterfaces",
            Self::PublicIp => "Microsoft.Network/publicIPAddresses",
        }
    }
}

impl fmt::Display for AzureResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::VirtualMachine => "virtual machine",
            Self::Disk => "OS disk",
            Self::NetworkInterface => "network interface",
            Self::PublicIp => "public IP",
        })
    }
}

/// Template deployment submitted to a resource group.
#[derive(Clone, Debug, PartialEq)]
pub struct Deployment {
    /// Deployment name.
    pub name: String,
    /// ARM template document.
    pub template: Value,
    /// Template parameters in ARM `{ "name": { "value": .. } }` form.
    pub parameters: Value,
}

/// One status entry of a VM instance view.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatus {
    /// Machine-readable code such as `PowerState/running`.
    #[serde(default)]
    pub code: String,
    /// Display status such as `VM running`.
    #[serde(default)]
    pub display_status: String,
}

/// VM instance view.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct InstanceView {
    /// Provisioning and power statuses.
    #[serde(default)]
    pub statuses: Vec<InstanceStatus>,
}

impl InstanceView {
    /// Picks the status that describes the VM lifecycle.
    ///
    /// A failed provisioning status wins, then the power status; views
    /// without either report an empty string.
    #[must_use]
    pub fn display_status(&self) -> &str {
        let with_code = |prefix: &str| {
            self.statuses
                .iter()
                .find(|status| status.code.starts_with(prefix))
                .map(|status| status.display_status.as_str())
        };
        with_code("ProvisioningState/failed")
            .or_else(|| with_code("PowerState/"))
            .unwrap_or_default()
    }
}

/// Calls the Azure adapter issues against one resource group.
///
/// Reads of a single resource return `Ok(None)` when it is absent.
pub trait AzureApi: Send + Sync {
    /// Submits an incremental template deployment.
    fn create_deployment<'a>(&'a self, deployment: &'a Deployment) -> ApiFuture<'a, ()>;
    /// Reads a deployment's provisioning state.
    fn deployment_state<'a>(&'a self, name: &'a str) -> ApiFuture<'a, Option<String>>;
    /// Reads a VM instance view.
    fn instance_view<'a>(&'a self, vm_name: &'a str) -> ApiFuture<'a, Option<InstanceView>>;
    /// Powers a VM off.
    fn power_off<'a>(&'a self, vm_name: &'a str) -> ApiFuture<'a, ()>;
    /// Starts a VM.
    fn start<'a>(&'a self, vm_name: &'a str) -> ApiFuture<'a, ()>;
    /// Reads the address of a public IP resource.
    fn public_ip_address<'a>(&'a self, name: &'a str) -> ApiFuture<'a, Option<String>>;
    /// Reads the first private address of a network interface.
    fn private_ip_address<'a>(&'a self, nic_name: &'a str) -> ApiFuture<'a, Option<String>>;
    /// Returns `true` while a resource exists.
    fn resource_exists<'a>(&'a self, kind: AzureResource, name: &'a str) -> ApiFuture<'a, bool>;
    /// Deletes a resource.
    fn delete_resource<'a>(&'a self, kind: AzureResource, name: &'a str) -> ApiFuture<'a, ()>;
}
