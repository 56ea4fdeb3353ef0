//! Scripted Azure Resource Manager double.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{CallLog, FailurePlan, Sticky, lock, ready};
use crate::azure::{AzureApi, AzureResource, Deployment, InstanceStatus, InstanceView};
use crate::error::{ApiError, ApiFuture};

const PUBLIC_ADDRESS: &str = "198.51.100.7";
const PRIVATE_ADDRESS: &str = "10.1.0.4";

#[derive(Debug)]
struct State {
    deployments: Vec<Deployment>,
    deployment_states: Sticky<String>,
    power: Sticky<String>,
    resources: BTreeSet<(String, String)>,
    public_ip_assigned: bool,
    failures: FailurePlan,
}

/// In-memory resource group that accepts one template deployment.
#[derive(Clone, Debug)]
pub struct FakeAzure {
    state: Arc<Mutex<State>>,
    log: CallLog,
}

impl Default for FakeAzure {
    fn default() -> Self {
        Self::new()
    }
}

fn key(kind: AzureResource, name: &str) -> (String, String) {
    (kind.provider_path().to_owned(), name.to_owned())
}

fn parameter(deployment: &Deployment, name: &str) -> Option<String> {
    deployment
        .parameters
        .get(name)
        .and_then(|entry| entry.get("value"))
        .and_then(serde_json::Value::as_str)
        .map(ToOwned::to_owned)
}

impl FakeAzure {
    /// Creates a fake whose deployments succeed and whose VMs run.
    #[must_use]
    pub fn new() -> Self {
        let mut deployment_states = Sticky::default();
        deployment_states.set(String::from("Succeeded"));
        let mut power = Sticky::default();
        power.set(String::from("VM running"));
        Self {
            state: Arc::new(Mutex::new(State {
                deployments: Vec::new(),
                deployment_states,
                power,
                resources: BTreeSet::new(),
                public_ip_assigned: true,
                failures: FailurePlan::default(),
            })),
            log: CallLog::default(),
        }
    }

    /// Queues deployment provisioning states.
    pub fn script_deployment(&self, states: &[&str]) {
        lock(&self.state)
            .deployment_states
            .extend(states.iter().map(|state| (*state).to_owned()));
    }

    /// Queues instance-view display statuses.
    pub fn script_power(&self, statuses: &[&str]) {
        lock(&self.state)
            .power
            .extend(statuses.iter().map(|status| (*status).to_owned()));
    }

    /// Leaves the public IP resource without an address.
    pub fn without_public_address(&self) {
        lock(&self.state).public_ip_assigned = false;
    }

    /// Makes the next call to `operation` fail.
    pub fn fail_next(&self, operation: &str, error: ApiError) {
        lock(&self.state).failures.push(operation, error);
    }

    /// Calls received so far, formatted as `operation argument`.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.log.calls()
    }

    /// Shared call log.
    #[must_use]
    pub fn log(&self) -> CallLog {
        self.log.clone()
    }

    /// Deployments submitted so far.
    #[must_use]
    pub fn deployments(&self) -> Vec<Deployment> {
        lock(&self.state).deployments.clone()
    }

    /// Number of resources that still exist.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        lock(&self.state).resources.len()
    }

    fn begin(&self, operation: &str, argument: &str) -> Result<MutexGuard<'_, State>, ApiError> {
        self.log.record(format!("{operation} {argument}").trim_end());
        let mut state = lock(&self.state);
        match state.failures.take(operation) {
            Some(err) => Err(err),
            None => Ok(state),
        }
    }
}

impl AzureApi for FakeAzure {
    fn create_deployment<'a>(&'a self, deployment: &'a Deployment) -> ApiFuture<'a, ()> {
        ready(
            self.begin("create_deployment", &deployment.name)
                .map(|mut state| {
                    let names = [
                        (AzureResource::VirtualMachine, "vm_name"),
                        (AzureResource::Disk, "os_disk"),
                        (AzureResource::NetworkInterface, "nic"),
                        (AzureResource::PublicIp, "public_ip"),
                    ];
                    for (kind, parameter_name) in names {
                        if let Some(name) = parameter(deployment, parameter_name) {
                            state.resources.insert(key(kind, &name));
                        }
                    }
                    state.deployments.push(deployment.clone());
                }),
        )
    }

    fn deployment_state<'a>(&'a self, name: &'a str) -> ApiFuture<'a, Option<String>> {
        ready(self.begin("deployment_state", name).map(|mut state| {
            let known = state.deployments.iter().any(|found| found.name == name);
            if known {
                state.deployment_states.next_value()
            } else {
                None
            }
        }))
    }

    fn instance_view<'a>(&'a self, vm_name: &'a str) -> ApiFuture<'a, Option<InstanceView>> {
        ready(self.begin("instance_view", vm_name).map(|mut state| {
            if !state
                .resources
                .contains(&key(AzureResource::VirtualMachine, vm_name))
            {
                return None;
            }
            let display = state.power.next_value().unwrap_or_default();
            Some(InstanceView {
                statuses: vec![
                    InstanceStatus {
                        code: String::from("ProvisioningState/succeeded"),
                        display_status: String::from("Provisioning succeeded"),
                    },
                    InstanceStatus {
                        code: String::from("PowerState/current"),
                        display_status: display,
                    },
                ],
            })
        }))
    }

    fn power_off<'a>(&'a self, vm_name: &'a str) -> ApiFuture<'a, ()> {
        ready(self.begin("power_off", vm_name).map(|mut state| {
            if !state.power.has_pending() {
                state.power.set(String::from("VM stopped"));
            }
        }))
    }

    fn start<'a>(&'a self, vm_name: &'a str) -> ApiFuture<'a, ()> {
        ready(self.begin("start", vm_name).map(|mut state| {
            if !state.power.has_pending() {
                state.power.set(String::from("VM running"));
            }
        }))
    }

    fn public_ip_address<'a>(&'a self, name: &'a str) -> ApiFuture<'a, Option<String>> {
        ready(self.begin("public_ip_address", name).map(|state| {
            let exists = state.resources.contains(&key(AzureResource::PublicIp, name));
            (exists && state.public_ip_assigned).then(|| PUBLIC_ADDRESS.to_owned())
        }))
    }

    fn private_ip_address<'a>(&'a self, nic_name: &'a str) -> ApiFuture<'a, Option<String>> {
        ready(self.begin("private_ip_address", nic_name).map(|state| {
            state
                .resources
                .contains(&key(AzureResource::NetworkInterface, nic_name))
                .then(|| PRIVATE_ADDRESS.to_owned())
        }))
    }

    fn resource_exists<'a>(&'a self, kind: AzureResource, name: &'a str) -> ApiFuture<'a, bool> {
        ready(
            self.begin("resource_exists", name)
                .map(|state| state.resources.contains(&key(kind, name))),
        )
    }

    fn delete_resource<'a>(&'a self, kind: AzureResource, name: &'a str) -> ApiFuture<'a, ()> {
        ready(self.begin("delete_resource", name).and_then(|mut state| {
            if state.resources.remove(&key(kind, name)) {
                Ok(())
            } else {
                Err(ApiError::not_found(kind.to_string(), name))
            }
        }))
    }
}
