//! Scripted OpenStack API double.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{CallLog, FailurePlan, Sticky, lock, ready};
use crate::error::{ApiError, ApiFuture};
use crate::openstack::{
    Flavor, FloatingIp, Image, OpenStackApi, PowerAction, Server, ServerAddress, ServerRequest,
    Volume, VolumeRequest,
};

const SERVER_ID: &str = "srv-1";
const FLOATING_ID: &str = "fip-1";
const FLOATING_ADDRESS: &str = "203.0.113.10";
const FIXED_ADDRESS: &str = "10.0.0.5";
const VOLUME_ID: &str = "vol-1";

#[derive(Debug)]
struct State {
    flavors: Vec<Flavor>,
    images: Vec<Image>,
    server_created: bool,
    server_deleted: bool,
    statuses: Sticky<String>,
    floating: Option<String>,
    floating_allocated: bool,
    floating_release_lag: usize,
    floating_lingering: usize,
    volume: Option<String>,
    failures: FailurePlan,
}

/// In-memory OpenStack that models one server, one floating IP and one volume.
#[derive(Clone, Debug)]
pub struct FakeOpenStack {
    state: Arc<Mutex<State>>,
    log: CallLog,
}

impl Default for FakeOpenStack {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeOpenStack {
    /// Creates a fake with flavor `m1.small` and image `Ubuntu-22.04`.
    #[must_use]
    pub fn new() -> Self {
        let mut statuses = Sticky::default();
        statuses.set(String::from("ACTIVE"));
        Self {
            state: Arc::new(Mutex::new(State {
                flavors: vec![Flavor {
                    id: String::from("flv-1"),
                    name: String::from("m1.small"),
                }],
                images: vec![Image {
                    id: String::from("img-1"),
                    name: String::from("Ubuntu-22.04"),
                }],
                server_created: false,
                server_deleted: false,
                statuses,
                floating: None,
                floating_allocated: false,
                floating_release_lag: 0,
                floating_lingering: 0,
                volume: None,
                failures: FailurePlan::default(),
            })),
            log: CallLog::default(),
        }
    }

    /// Adds a flavor.
    pub fn add_flavor(&self, id: &str, name: &str) {
        lock(&self.state).flavors.push(Flavor {
            id: id.to_owned(),
            name: name.to_owned(),
        });
    }

    /// Replaces the image catalogue.
    pub fn set_images(&self, images: &[(&str, &str)]) {
        lock(&self.state).images = images
            .iter()
            .map(|(id, name)| Image {
                id: (*id).to_owned(),
                name: (*name).to_owned(),
            })
            .collect();
    }

    /// Queues server statuses returned by successive lookups.
    pub fn script_statuses(&self, statuses: &[&str]) {
        lock(&self.state)
            .statuses
            .extend(statuses.iter().map(|status| (*status).to_owned()));
    }

    /// Keeps a released floating IP visible for `lookups` further lookups.
    pub fn delay_floating_ip_release(&self, lookups: usize) {
        let mut state = lock(&self.state);
        state.floating_release_lag = lookups;
        state.floating_lingering = state.floating_lingering.min(lookups);
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

    /// Returns `true` while the server exists.
    #[must_use]
    pub fn server_exists(&self) -> bool {
        let state = lock(&self.state);
        state.server_created && !state.server_deleted
    }

    /// Returns `true` while the floating IP is allocated.
    #[must_use]
    pub fn floating_ip_allocated(&self) -> bool {
        lock(&self.state).floating_allocated
    }

    /// Status of the volume, if one exists.
    #[must_use]
    pub fn volume_status(&self) -> Option<String> {
        lock(&self.state).volume.clone()
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

fn server_snapshot(state: &mut State) -> Option<Server> {
    if !state.server_created || state.server_deleted {
        return None;
    }
    let status = state.statuses.next_value().unwrap_or_default();
    let mut addresses = vec![ServerAddress {
        addr: FIXED_ADDRESS.to_owned(),
        kind: String::from("fixed"),
    }];
    if let Some(floating) = &state.floating {
        addresses.push(ServerAddress {
            addr: floating.clone(),
            kind: String::from("floating"),
        });
    }
    Some(Server {
        id: SERVER_ID.to_owned(),
        status,
        addresses: BTreeMap::from([(String::from("private"), addresses)]),
    })
}

impl OpenStackApi for FakeOpenStack {
    fn list_flavors(&self) -> ApiFuture<'_, Vec<Flavor>> {
        ready(self.begin("list_flavors", "").map(|state| state.flavors.clone()))
    }

    fn find_images<'a>(&'a self, name: &'a str) -> ApiFuture<'a, Vec<Image>> {
        ready(self.begin("find_images", name).map(|state| {
            state
                .images
                .iter()
                .filter(|image| image.name == name)
                .cloned()
                .collect()
        }))
    }

    fn create_server<'a>(&'a self, request: &'a ServerRequest) -> ApiFuture<'a, Server> {
        ready(self.begin("create_server", &request.name).map(|mut state| {
            state.server_created = true;
            state.server_deleted = false;
            Server {
                id: SERVER_ID.to_owned(),
                status: String::from("BUILD"),
                addresses: BTreeMap::new(),
            }
        }))
    }

    fn get_server<'a>(&'a self, id: &'a str) -> ApiFuture<'a, Option<Server>> {
        ready(
            self.begin("get_server", id)
                .map(|mut state| server_snapshot(&mut state)),
        )
    }

    fn server_action<'a>(&'a self, id: &'a str, action: PowerAction) -> ApiFuture<'a, ()> {
        let operation = match action {
            PowerAction::Start => "start_server",
            PowerAction::Stop => "stop_server",
        };
        ready(self.begin(operation, id).map(|mut state| {
            let status = match action {
                PowerAction::Start => "ACTIVE",
                PowerAction::Stop => "SHUTOFF",
            };
            if !state.statuses.has_pending() {
                state.statuses.set(status.to_owned());
            }
        }))
    }

    fn delete_server<'a>(&'a self, id: &'a str) -> ApiFuture<'a, ()> {
        ready(self.begin("delete_server", id).and_then(|mut state| {
            if !state.server_created || state.server_deleted {
                return Err(ApiError::not_found("server", id));
            }
            state.server_deleted = true;
            Ok(())
        }))
    }

    fn create_floating_ip<'a>(&'a self, pool: &'a str) -> ApiFuture<'a, FloatingIp> {
        ready(self.begin("create_floating_ip", pool).map(|mut state| {
            state.floating_allocated = true;
            FloatingIp {
                id: FLOATING_ID.to_owned(),
                ip: FLOATING_ADDRESS.to_owned(),
                pool: pool.to_owned(),
                instance_id: None,
            }
        }))
    }

    fn associate_floating_ip<'a>(
        &'a self,
        server_id: &'a str,
        address: &'a str,
    ) -> ApiFuture<'a, ()> {
        ready(
            self.begin("associate_floating_ip", server_id)
                .map(|mut state| state.floating = Some(address.to_owned())),
        )
    }

    fn disassociate_floating_ip<'a>(
        &'a self,
        server_id: &'a str,
        _address: &'a str,
    ) -> ApiFuture<'a, ()> {
        ready(
            self.begin("disassociate_floating_ip", server_id)
                .map(|mut state| state.floating = None),
        )
    }

    fn get_floating_ip<'a>(&'a self, id: &'a str) -> ApiFuture<'a, Option<FloatingIp>> {
        ready(self.begin("get_floating_ip", id).map(|mut state| {
            if id != FLOATING_ID {
                return None;
            }
            if !state.floating_allocated {
                if state.floating_lingering == 0 {
                    return None;
                }
                state.floating_lingering -= 1;
            }
            Some(FloatingIp {
                id: id.to_owned(),
                ip: FLOATING_ADDRESS.to_owned(),
                pool: String::new(),
                instance_id: state.floating.as_ref().map(|_| SERVER_ID.to_owned()),
            })
        }))
    }

    fn delete_floating_ip<'a>(&'a self, id: &'a str) -> ApiFuture<'a, ()> {
        ready(self.begin("delete_floating_ip", id).and_then(|mut state| {
            if !state.floating_allocated {
                return Err(ApiError::not_found("floating IP", id));
            }
            state.floating_allocated = false;
            state.floating_lingering = state.floating_release_lag;
            Ok(())
        }))
    }

    fn create_volume<'a>(&'a self, request: &'a VolumeRequest) -> ApiFuture<'a, Volume> {
        ready(self.begin("create_volume", &request.name).map(|mut state| {
            state.volume = Some(String::from("available"));
            Volume {
                id: VOLUME_ID.to_owned(),
                status: String::from("creating"),
            }
        }))
    }

    fn get_volume<'a>(&'a self, id: &'a str) -> ApiFuture<'a, Option<Volume>> {
        ready(self.begin("get_volume", id).map(|state| {
            state.volume.clone().map(|status| Volume {
                id: id.to_owned(),
                status,
            })
        }))
    }

    fn attach_volume<'a>(
        &'a self,
        server_id: &'a str,
        volume_id: &'a str,
        _device: Option<&'a str>,
    ) -> ApiFuture<'a, ()> {
        ready(
            self.begin("attach_volume", &format!("{volume_id} {server_id}"))
                .map(|mut state| state.volume = Some(String::from("in-use"))),
        )
    }

    fn detach_volume<'a>(&'a self, server_id: &'a str, volume_id: &'a str) -> ApiFuture<'a, ()> {
        ready(
            self.begin("detach_volume", &format!("{volume_id} {server_id}"))
                .map(|mut state| state.volume = Some(String::from("available"))),
        )
    }

    fn delete_volume<'a>(&'a self, id: &'a str) -> ApiFuture<'a, ()> {
        ready(self.begin("delete_volume", id).and_then(|mut state| {
            if state.volume.take().is_none() {
                return Err(ApiError::not_found("volume", id));
            }
            Ok(())
        }))
    }
}
