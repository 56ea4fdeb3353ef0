//! Scripted Compute Engine double.

use std::sync::{Arc, Mutex, MutexGuard};

use super::{CallLog, FailurePlan, Sticky, lock, ready};
use crate::error::{ApiError, ApiFuture};
use crate::gce::{
    AccessConfig, GceApi, Instance, InstanceRequest, Linked, Network, NetworkInterface, Operation,
    OperationError, OperationErrorItem,
};

const NAT_ADDRESS: &str = "34.68.0.10";
const INTERNAL_ADDRESS: &str = "10.128.0.2";

#[derive(Debug)]
struct State {
    images: Vec<(String, String)>,
    machine_types: Vec<String>,
    network: Network,
    subnetworks: Vec<(String, String)>,
    inserted: Vec<InstanceRequest>,
    instance: Option<String>,
    statuses: Sticky<String>,
    operation_statuses: Sticky<String>,
    operation_error: Option<OperationErrorItem>,
    next_operation: usize,
    failures: FailurePlan,
}

impl State {
    fn operation(&mut self) -> Operation {
        self.next_operation += 1;
        Operation {
            name: format!("op-{}", self.next_operation),
            status: String::from("PENDING"),
            error: None,
        }
    }
}

/// In-memory project holding at most one instance.
#[derive(Clone, Debug)]
pub struct FakeGce {
    state: Arc<Mutex<State>>,
    log: CallLog,
}

impl Default for FakeGce {
    fn default() -> Self {
        Self::new()
    }
}

fn link(path: &str, name: &str) -> Linked {
    Linked {
        name: name.to_owned(),
        self_link: format!("{path}/{name}"),
    }
}

impl FakeGce {
    /// Creates a fake with image `ubuntu-2204-lts` in `ubuntu-os-cloud`, an
    /// auto-mode `default` network and operations that finish immediately.
    #[must_use]
    pub fn new() -> Self {
        let mut statuses = Sticky::default();
        statuses.set(String::from("RUNNING"));
        let mut operation_statuses = Sticky::default();
        operation_statuses.set(String::from("DONE"));
        Self {
            state: Arc::new(Mutex::new(State {
                images: vec![(
                    String::from("ubuntu-os-cloud"),
                    String::from("ubuntu-2204-lts"),
                )],
                machine_types: vec![String::from("n1-standard-1")],
                network: Network {
                    self_link: String::from("global/networks/default"),
                    auto_create_subnetworks: true,
                    subnetworks: Vec::new(),
                },
                subnetworks: Vec::new(),
                inserted: Vec::new(),
                instance: None,
                statuses,
                operation_statuses,
                operation_error: None,
                next_operation: 0,
                failures: FailurePlan::default(),
            })),
            log: CallLog::default(),
        }
    }

    /// Turns `default` into a custom-mode network with one subnetwork.
    pub fn use_custom_network(&self, region: &str, subnetwork: &str) {
        let mut state = lock(&self.state);
        state.network.auto_create_subnetworks = false;
        state.network.subnetworks = vec![format!("regions/{region}/subnetworks/{subnetwork}")];
        state
            .subnetworks
            .push((region.to_owned(), subnetwork.to_owned()));
    }

    /// Queues instance statuses.
    pub fn script_statuses(&self, statuses: &[&str]) {
        lock(&self.state)
            .statuses
            .extend(statuses.iter().map(|status| (*status).to_owned()));
    }

    /// Queues operation statuses.
    pub fn script_operations(&self, statuses: &[&str]) {
        lock(&self.state)
            .operation_statuses
            .extend(statuses.iter().map(|status| (*status).to_owned()));
    }

    /// Makes every finished operation carry `code`.
    pub fn fail_operations(&self, code: &str, message: &str) {
        lock(&self.state).operation_error = Some(OperationErrorItem {
            code: code.to_owned(),
            message: message.to_owned(),
        });
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

    /// Insert requests received so far.
    #[must_use]
    pub fn inserted(&self) -> Vec<InstanceRequest> {
        lock(&self.state).inserted.clone()
    }

    /// Deletes the instance without going through the API.
    pub fn remove_out_of_band(&self) {
        lock(&self.state).instance = None;
    }

    /// Returns `true` while the instance exists.
    #[must_use]
    pub fn instance_exists(&self) -> bool {
        lock(&self.state).instance.is_some()
    }

    fn begin(&self, operation: &str, argument: &str) -> Result<MutexGuard<'_, State>, ApiError> {
        self.log.record(format!("{operation} {argument}").trim_end());
        let mut state = lock(&self.state);
        match state.failures.take(operation) {
            Some(err) => Err(err),
            None => Ok(state),
        }
    }

    fn power(&self, operation: &str, name: &str, status: &str) -> Result<Operation, ApiError> {
        let mut state = self.begin(operation, name)?;
        if state.instance.as_deref() != Some(name) {
            return Err(ApiError::not_found("instance", name));
        }
        if !state.statuses.has_pending() {
            state.statuses.set(status.to_owned());
        }
        Ok(state.operation())
    }
}

impl GceApi for FakeGce {
    fn get_image<'a>(&'a self, project: &'a str, name: &'a str) -> ApiFuture<'a, Option<Linked>> {
        ready(self.begin("get_image", &format!("{project}/{name}")).map(|state| {
            state
                .images
                .iter()
                .any(|(owner, image)| owner == project && image == name)
                .then(|| link(&format!("projects/{project}/global/images"), name))
        }))
    }

    fn get_machine_type<'a>(
        &'a self,
        zone: &'a str,
        name: &'a str,
    ) -> ApiFuture<'a, Option<Linked>> {
        ready(self.begin("get_machine_type", name).map(|state| {
            state
                .machine_types
                .iter()
                .any(|known| known == name)
                .then(|| link(&format!("zones/{zone}/machineTypes"), name))
        }))
    }

    fn get_network<'a>(&'a self, name: &'a str) -> ApiFuture<'a, Option<Network>> {
        ready(
            self.begin("get_network", name)
                .map(|state| (name == "default").then(|| state.network.clone())),
        )
    }

    fn get_subnetwork<'a>(
        &'a self,
        region: &'a str,
        name: &'a str,
    ) -> ApiFuture<'a, Option<Linked>> {
        ready(
            self.begin("get_subnetwork", &format!("{region}/{name}"))
                .map(|state| {
                    state
                        .subnetworks
                        .iter()
                        .any(|(known_region, known)| known_region == region && known == name)
                        .then(|| link(&format!("regions/{region}/subnetworks"), name))
                }),
        )
    }

    fn insert_instance<'a>(
        &'a self,
        _zone: &'a str,
        request: &'a InstanceRequest,
    ) -> ApiFuture<'a, Operation> {
        ready(
            self.begin("insert_instance", &request.name)
                .map(|mut state| {
                    state.inserted.push(request.clone());
                    state.instance = Some(request.name.clone());
                    state.operation()
                }),
        )
    }

    fn get_instance<'a>(&'a self, _zone: &'a str, name: &'a str) -> ApiFuture<'a, Option<Instance>> {
        ready(self.begin("get_instance", name).map(|mut state| {
            if state.instance.as_deref() != Some(name) {
                return None;
            }
            Some(Instance {
                name: name.to_owned(),
                status: state.statuses.next_value().unwrap_or_default(),
                network_interfaces: vec![NetworkInterface {
                    network_ip: Some(INTERNAL_ADDRESS.to_owned()),
                    access_configs: vec![AccessConfig {
                        nat_ip: Some(NAT_ADDRESS.to_owned()),
                    }],
                }],
            })
        }))
    }

    fn start_instance<'a>(&'a self, _zone: &'a str, name: &'a str) -> ApiFuture<'a, Operation> {
        ready(self.power("start_instance", name, "RUNNING"))
    }

    fn stop_instance<'a>(&'a self, _zone: &'a str, name: &'a str) -> ApiFuture<'a, Operation> {
        ready(self.power("stop_instance", name, "TERMINATED"))
    }

    fn delete_instance<'a>(&'a self, _zone: &'a str, name: &'a str) -> ApiFuture<'a, Operation> {
        ready(self.begin("delete_instance", name).and_then(|mut state| {
            if state.instance.as_deref() == Some(name) {
                state.instance = None;
                Ok(state.operation())
            } else {
                Err(ApiError::not_found("instance", name))
            }
        }))
    }

    fn get_operation<'a>(&'a self, _zone: &'a str, name: &'a str) -> ApiFuture<'a, Operation> {
        ready(self.begin("get_operation", name).map(|mut state| {
            let status = state.operation_statuses.next_value().unwrap_or_default();
            let error = (status == "DONE")
                .then(|| state.operation_error.clone())
                .flatten()
                .map(|item| OperationError { errors: vec![item] });
            Operation {
                name: name.to_owned(),
                status,
                error,
            }
        }))
    }
}
