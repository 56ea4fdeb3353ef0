//! Scripted Exoscale double.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{CallLog, FailurePlan, Sticky, lock, ready};
use crate::error::{ApiError, ApiFuture};
use crate::exoscale::{
    DeployRequest, DeployedVm, ExoscaleApi, Job, JobStatus, Named, Nic, Template,
    VirtualMachineInfo,
};

const VM_ID: &str = "vm-1";
const DEFAULT_ADDRESS: &str = "185.19.28.4";

#[derive(Debug)]
struct State {
    templates: Vec<Template>,
    offerings: Vec<Named>,
    security_groups: Vec<Named>,
    zones: Vec<Named>,
    deployed: Vec<DeployRequest>,
    vm_exists: bool,
    states: Sticky<String>,
    nics: Vec<Nic>,
    jobs: HashMap<String, Option<String>>,
    job_statuses: Sticky<JobStatus>,
    job_error: Option<String>,
    retained_state: Option<String>,
    next_job: usize,
    failures: FailurePlan,
}

impl State {
    fn job(&mut self, vm_id: Option<&str>) -> String {
        self.next_job += 1;
        let id = format!("job-{}", self.next_job);
        self.jobs.insert(id.clone(), vm_id.map(ToOwned::to_owned));
        id
    }

    fn owns(&self, id: &str) -> bool {
        self.vm_exists && id == VM_ID
    }
}

/// In-memory Exoscale zone holding at most one virtual machine.
#[derive(Clone, Debug)]
pub struct FakeExoscale {
    state: Arc<Mutex<State>>,
    log: CallLog,
}

impl Default for FakeExoscale {
    fn default() -> Self {
        Self::new()
    }
}

fn named(id: &str, name: &str) -> Named {
    Named {
        id: id.to_owned(),
        name: name.to_owned(),
    }
}

impl FakeExoscale {
    /// Creates a fake offering a 10 GB `Linux Ubuntu 22.04 LTS 64-bit`
    /// template in `ch-gva-2`, the `Medium` offering and a `default` security
    /// group. Jobs succeed on their first poll.
    #[must_use]
    pub fn new() -> Self {
        let mut states = Sticky::default();
        states.set(String::from("Running"));
        let mut job_statuses = Sticky::default();
        job_statuses.set(JobStatus::Success);
        Self {
            state: Arc::new(Mutex::new(State {
                templates: vec![Template {
                    id: String::from("tpl-10"),
                    name: String::from("Linux Ubuntu 22.04 LTS 64-bit"),
                    zone_name: String::from("ch-gva-2"),
                    size: 10 << 30,
                }],
                offerings: vec![named("so-medium", "Medium")],
                security_groups: vec![named("sg-default", "default")],
                zones: vec![named("zone-gva2", "ch-gva-2")],
                deployed: Vec::new(),
                vm_exists: false,
                states,
                nics: vec![Nic {
                    ip_address: Some(DEFAULT_ADDRESS.to_owned()),
                    ip6_address: None,
                    is_default: true,
                }],
                jobs: HashMap::new(),
                job_statuses,
                job_error: None,
                retained_state: None,
                next_job: 0,
                failures: FailurePlan::default(),
            })),
            log: CallLog::default(),
        }
    }

    /// Adds a template.
    pub fn add_template(&self, id: &str, name: &str, zone_name: &str, storage_gb: u64) {
        lock(&self.state).templates.push(Template {
            id: id.to_owned(),
            name: name.to_owned(),
            zone_name: zone_name.to_owned(),
            size: storage_gb << 30,
        });
    }

    /// Adds a service offering.
    pub fn add_offering(&self, id: &str, name: &str) {
        lock(&self.state).offerings.push(named(id, name));
    }

    /// Replaces the network interfaces reported for the VM.
    pub fn set_nics(&self, nics: Vec<Nic>) {
        lock(&self.state).nics = nics;
    }

    /// Queues VM states.
    pub fn script_states(&self, states: &[&str]) {
        lock(&self.state)
            .states
            .extend(states.iter().map(|state| (*state).to_owned()));
    }

    /// Queues job statuses.
    pub fn script_jobs(&self, statuses: &[JobStatus]) {
        lock(&self.state).job_statuses.extend(statuses.iter().copied());
    }

    /// Reports `status` for every job from now on, dropping queued statuses.
    pub fn set_job_status(&self, status: JobStatus) {
        lock(&self.state).job_statuses.set(status);
    }

    /// Attaches `error` to failed jobs.
    pub fn set_job_error(&self, error: &str) {
        lock(&self.state).job_error = Some(error.to_owned());
    }

    /// Keeps destroyed VMs listed with `state` instead of removing them.
    pub fn retain_destroyed_as(&self, state: &str) {
        lock(&self.state).retained_state = Some(state.to_owned());
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

    /// Deploy requests received so far.
    #[must_use]
    pub fn deployed(&self) -> Vec<DeployRequest> {
        lock(&self.state).deployed.clone()
    }

    /// Returns `true` while the VM is listed.
    #[must_use]
    pub fn vm_exists(&self) -> bool {
        lock(&self.state).vm_exists
    }

    fn begin(&self, operation: &str, argument: &str) -> Result<MutexGuard<'_, State>, ApiError> {
        self.log.record(format!("{operation} {argument}").trim_end());
        let mut state = lock(&self.state);
        match state.failures.take(operation) {
            Some(err) => Err(err),
            None => Ok(state),
        }
    }

    fn power(&self, operation: &str, id: &str, target: &str) -> Result<String, ApiError> {
        let mut state = self.begin(operation, id)?;
        if !state.owns(id) {
            return Err(ApiError::not_found("virtual machine", id));
        }
        if !state.states.has_pending() {
            state.states.set(target.to_owned());
        }
        Ok(state.job(Some(id)))
    }
}

impl ExoscaleApi for FakeExoscale {
    fn list_templates<'a>(&'a self, name: &'a str) -> ApiFuture<'a, Vec<Template>> {
        ready(self.begin("list_templates", name).map(|state| {
            state
                .templates
                .iter()
                .filter(|template| template.name == name)
                .cloned()
                .collect()
        }))
    }

    fn list_service_offerings<'a>(&'a self, name: &'a str) -> ApiFuture<'a, Vec<Named>> {
        ready(self.begin("list_service_offerings", name).map(|state| {
            state
                .offerings
                .iter()
                .filter(|offering| offering.name.eq_ignore_ascii_case(name))
                .cloned()
                .collect()
        }))
    }

    fn list_security_groups(&self) -> ApiFuture<'_, Vec<Named>> {
        ready(
            self.begin("list_security_groups", "")
                .map(|state| state.security_groups.clone()),
        )
    }

    fn list_zones<'a>(&'a self, name: &'a str) -> ApiFuture<'a, Vec<Named>> {
        ready(self.begin("list_zones", name).map(|state| {
            state
                .zones
                .iter()
                .filter(|zone| zone.name.eq_ignore_ascii_case(name))
                .cloned()
                .collect()
        }))
    }

    fn deploy_virtual_machine<'a>(
        &'a self,
        request: &'a DeployRequest,
    ) -> ApiFuture<'a, DeployedVm> {
        ready(
            self.begin("deploy_virtual_machine", &request.name)
                .map(|mut state| {
                    state.deployed.push(request.clone());
                    state.vm_exists = true;
                    DeployedVm {
                        id: VM_ID.to_owned(),
                        job_id: state.job(Some(VM_ID)),
                    }
                }),
        )
    }

    fn query_job<'a>(&'a self, job_id: &'a str) -> ApiFuture<'a, Job> {
        ready(self.begin("query_job", job_id).and_then(|mut state| {
            let vm_id = state
                .jobs
                .get(job_id)
                .cloned()
                .ok_or_else(|| ApiError::not_found("job", job_id))?;
            let status = state.job_statuses.next_value().unwrap_or(JobStatus::Pending);
            let error = matches!(status, JobStatus::Failure)
                .then(|| state.job_error.clone())
                .flatten();
            Ok(Job {
                id: job_id.to_owned(),
                status,
                vm_id: vm_id.filter(|_| status == JobStatus::Success),
                error,
            })
        }))
    }

    fn get_virtual_machine<'a>(
        &'a self,
        id: &'a str,
    ) -> ApiFuture<'a, Option<VirtualMachineInfo>> {
        ready(self.begin("get_virtual_machine", id).map(|mut state| {
            if !state.owns(id) {
                let retained = (id == VM_ID && !state.deployed.is_empty())
                    .then(|| state.retained_state.clone())
                    .flatten();
                return retained.map(|status| VirtualMachineInfo {
                    id: id.to_owned(),
                    state: status,
                    ..VirtualMachineInfo::default()
                });
            }
            Some(VirtualMachineInfo {
                id: id.to_owned(),
                display_name: state
                    .deployed
                    .last()
                    .map(|request| request.name.clone())
                    .unwrap_or_default(),
                state: state.states.next_value().unwrap_or_default(),
                nics: state.nics.clone(),
            })
        }))
    }

    fn start_virtual_machine<'a>(&'a self, id: &'a str) -> ApiFuture<'a, String> {
        ready(self.power("start_virtual_machine", id, "Running"))
    }

    fn stop_virtual_machine<'a>(&'a self, id: &'a str) -> ApiFuture<'a, String> {
        ready(self.power("stop_virtual_machine", id, "Stopped"))
    }

    fn destroy_virtual_machine<'a>(&'a self, id: &'a str) -> ApiFuture<'a, String> {
        ready(
            self.begin("destroy_virtual_machine", id)
                .and_then(|mut state| {
                    if !state.owns(id) {
                        return Err(ApiError::not_found("virtual machine", id));
                    }
                    state.vm_exists = false;
                    Ok(state.job(Some(id)))
                }),
        )
    }
}
