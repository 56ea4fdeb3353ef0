//! OpenStack API surface consumed by the adapter.

use std::collections::BTreeMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::error::ApiFuture;
use crate::vm::IpSlots;
use crate::wait::Observation;

/// Compute flavor.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct Flavor {
    /// Flavor identifier.
    pub id: String,
    /// Flavor name.
    pub name: String,
}

/// Glance image.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct Image {
    /// Image identifier.
    pub id: String,
    /// Image name.
    pub name: String,
}

/// One address attached to a server.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct ServerAddress {
    /// Address literal.
    pub addr: String,
    /// `fixed` or `floating`.
    #[serde(rename = "OS-EXT-IPS:type", default)]
    pub kind: String,
}

/// Nova server snapshot.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct Server {
    /// Server identifier.
    pub id: String,
    /// Nova status token.
    #[serde(default)]
    pub status: String,
    /// Addresses keyed by network name.
    #[serde(default)]
    pub addresses: BTreeMap<String, Vec<ServerAddress>>,
}

impl Server {
    /// Returns the first floating address as public and the first fixed
    /// address as private.
    #[must_use]
    pub fn ip_slots(&self) -> IpSlots {
        let first_of = |kind: &str| {
            self.addresses
                .values()
                .flatten()
                .filter(|address| address.kind == kind)
                .find_map(|address| address.addr.parse::<IpAddr>().ok())
        };
        IpSlots::new(first_of("floating"), first_of("fixed"))
    }
}

/// Floating IP allocated from a pool.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct FloatingIp {
    /// Allocation identifier.
    pub id: String,
    /// Address literal.
    pub ip: String,
    /// Pool the address came from.
    #[serde(default)]
    pub pool: String,
    /// Server the address is associated with.
    #[serde(default)]
    pub instance_id: Option<String>,
}

impl Observation for FloatingIp {
    fn describe(&self) -> String {
        self.instance_id
            .as_ref()
            .map_or_else(|| String::from("allocated"), |id| format!("associated with {id}"))
    }
}

/// Cinder volume snapshot.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct Volume {
    /// Volume identifier.
    pub id: String,
    /// Cinder status token.
    pub status: String,
}

/// Parameters for creating a server.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ServerRequest {
    /// Server name.
    pub name: String,
    /// Resolved flavor identifier.
    pub flavor_id: String,
    /// Resolved image identifier.
    pub image_id: String,
    /// Network identifiers to attach.
    pub networks: Vec<String>,
    /// Security group names.
    pub security_groups: Vec<String>,
    /// Key pair injected at boot.
    pub key_name: Option<String>,
}

/// Parameters for creating a volume.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct VolumeRequest {
    /// Volume name.
    pub name: String,
    /// Size in gigabytes.
    pub size_gb: u32,
    /// Optional volume type.
    pub volume_type: Option<String>,
}

/// Power actions accepted by Nova.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PowerAction {
    /// `os-start`.
    Start,
    /// `os-stop`.
    Stop,
}

/// Calls the OpenStack adapter issues.
///
/// Lookups that address a single resource return `Ok(None)` when it is
/// absent; deletions report absence as [`crate::ApiError::NotFound`].
pub trait OpenStackApi: Send + Sync {
    /// Lists all flavors.
    fn list_flavors(&self) -> ApiFuture<'_, Vec<Flavor>>;
    /// Lists images whose name equals `name`.
    fn find_images<'a>(&'a self, name: &'a str) -> ApiFuture<'a, Vec<Image>>;
    /// Creates a server.
    fn create_server<'a>(&'a self, request: &'a ServerRequest) -> ApiFuture<'a, Server>;
    /// Fetches a server.
    fn get_server<'a>(&'a self, id: &'a str) -> ApiFuture<'a, Option<Server>>;
    /// Starts or stops a server.
    fn server_action<'a>(&'a self, id: &'a str, action: PowerAction) -> ApiFuture<'a, ()>;
    /// Deletes a server.
    fn delete_server<'a>(&'a self, id: &'a str) -> ApiFuture<'a, ()>;
    /// Allocates a floating IP from `pool`.
    fn create_floating_ip<'a>(&'a self, pool: &'a str) -> ApiFuture<'a, FloatingIp>;
    /// Associates `address` with a server.
    fn associate_floating_ip<'a>(
        &'a self,
        server_id: &'a str,
        address: &'a str,
    ) -> ApiFuture<'a, ()>;
    /// Removes `address` from a server.
    fn disassociate_floating_ip<'a>(
        &'a self,
        server_id: &'a str,
        address: &'a str,
    ) -> ApiFuture<'a, ()>;
    /// Fetches a floating IP allocation.
    fn get_floating_ip<'a>(&'a self, id: &'a str) -> ApiFuture<'a, Option<FloatingIp>>;
    /// Releases a floating IP allocation.
    fn delete_floating_ip<'a>(&'a self, id: &'a str) -> ApiFuture<'a, ()>;
    /// Creates a volume.
    fn create_volume<'a>(&'a self, request: &'a VolumeRequest) -> ApiFuture<'a, Volume>;
    /// Fetches a volume.
    fn get_volume<'a>(&'a self, id: &'a str) -> ApiFuture<'a, Option<Volume>>;
    /// Attaches a volume to a server.
    fn attach_volume<'a>(
        &'a self,
        server_id: &'a str,
        volume_id: &'a str,
        device: Option<&'a str>,
    ) -> ApiFuture<'a, ()>;
    /// Detaches a volume from a server.
    fn detach_volume<'a>(&'a self, server_id: &'a str, volume_id: &'a str) -> ApiFuture<'a, ()>;
    /// Deletes a volume.
    fn delete_volume<'a>(&'a self, id: &'a str) -> ApiFuture<'a, ()>;
}
