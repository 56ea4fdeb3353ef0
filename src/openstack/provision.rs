//! Provisioning steps for [`OpenStackVm`].

use std::net::IpAddr;

use tracing::{debug, info};

use super::{
    DEFAULT_SECURITY_GROUP, OpenStackVm, OwnedFloatingIp, OwnedVolume, ServerRequest, VolumeRequest,
    VolumeSpec, is_volume_error,
};
use crate::error::{ApiError, VmError};
use crate::remote::{SshOptions, open_session};
use crate::vm::VmState;
use crate::wait::poll_until;

impl OpenStackVm {
    pub(super) async fn provision_steps(&mut self) -> Result<(), VmError> {
        self.instance.ensure_vacant(&self.name)?;
        self.spec.validate()?;

        let flavor_id = self.resolve_flavor().await?;
        let image_id = self.resolve_image().await?;
        let request = self.server_request(flavor_id, image_id);

        info!(vm = %self.name, "creating server");
        let server = self
            .api
            .create_server(&request)
            .await
            .map_err(|err| VmError::api("create server", &self.name, err))?;
        self.instance.assign(server.id.clone());
        self.wait_for_server(&server.id, VmState::Running, "provision")
            .await?;

        self.attach_floating_ip(&server.id).await?;
        self.wait_for_ssh(&server.id).await?;

        if let Some(volume) = self.spec.volume.clone().filter(|volume| volume.size_gb > 0) {
            self.attach_new_volume(&server.id, &volume).await?;
        }
        info!(vm = %self.name, server = %server.id, "server provisioned");
        Ok(())
    }

    fn server_request(&self, flavor_id: String, image_id: String) -> ServerRequest {
        let mut security_groups: Vec<String> = self
            .spec
            .security_groups
            .iter()
            .map(|group| group.trim())
            .filter(|group| !group.is_empty())
            .map(ToOwned::to_owned)
            .collect();
        if security_groups.is_empty() {
            security_groups.push(DEFAULT_SECURITY_GROUP.to_owned());
        }

        ServerRequest {
            name: self.name.clone(),
            flavor_id,
            image_id,
            networks: self
                .spec
                .networks
                .iter()
                .map(|network| network.trim())
                .filter(|network| !network.is_empty())
                .map(ToOwned::to_owned)
                .collect(),
            security_groups,
            key_name: self.spec.key_name.clone(),
        }
    }

    async fn resolve_flavor(&self) -> Result<String, VmError> {
        let wanted = self.spec.flavor_name.trim();
        let flavors = self
            .api
            .list_flavors()
            .await
            .map_err(|err| VmError::api("list flavors", wanted, err))?;
        let ids: Vec<String> = flavors
            .into_iter()
            .filter(|flavor| flavor.name == wanted)
            .map(|flavor| flavor.id)
            .collect();
        single_match("flavor", wanted, ids)
    }

    async fn resolve_image(&self) -> Result<String, VmError> {
        if let Some(id) = self
            .spec
            .image_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
        {
            return Ok(id.to_owned());
        }

        let wanted = self.spec.image_name.trim();
        let images = self
            .api
            .find_images(wanted)
            .await
            .map_err(|err| VmError::api("find images", wanted, err))?;
        let ids: Vec<String> = images
            .into_iter()
            .filter(|image| image.name == wanted)
            .map(|image| image.id)
            .collect();
        single_match("image", wanted, ids)
    }

    async fn attach_floating_ip(&mut self, server_id: &str) -> Result<(), VmError> {
        let pool = self.spec.floating_ip_pool.trim().to_owned();
        let allocation = self
            .api
            .create_floating_ip(&pool)
            .await
            .map_err(|err| VmError::api("create floating IP", &pool, err))?;
        debug!(vm = %self.name, address = %allocation.ip, "allocated floating IP");
        let address = allocation.ip.clone();
        self.floating_ip = Some(OwnedFloatingIp {
            allocation,
            associated: false,
        });

        self.api
            .associate_floating_ip(server_id, &address)
            .await
            .map_err(|err| VmError::api("associate floating IP", &address, err))?;
        if let Some(owned) = self.floating_ip.as_mut() {
            owned.associated = true;
        }

        let expected = address
            .parse::<IpAddr>()
            .map_or_else(|_| address.clone(), |ip| ip.to_string());
        poll_until(
            self.timeouts.action,
            || self.public_address(server_id),
            |public| public.as_deref() == Some(expected.as_str()),
            |_| false,
        )
        .await
        .map(|_| ())
        .map_err(|err| err.into_vm_error("associate floating IP", &address))
    }

    async fn public_address(&self, server_id: &str) -> Result<Option<String>, ApiError> {
        let server = self.api.get_server(server_id).await?;
        Ok(server
            .and_then(|found| found.ip_slots().public)
            .map(|ip| ip.to_string()))
    }

    async fn wait_for_ssh(&self, server_id: &str) -> Result<(), VmError> {
        let ips = self.fetch_server(server_id).await?.ip_slots();
        open_session(
            self.remote.as_ref(),
            &self.name,
            ips,
            &self.spec.credentials,
            &SshOptions::default(),
            self.timeouts.ssh,
        )
        .await
        .map(|_| ())
    }

    async fn attach_new_volume(&mut self, server_id: &str, spec: &VolumeSpec) -> Result<(), VmError> {
        let request = VolumeRequest {
            name: format!("{}-volume", self.name),
            size_gb: spec.size_gb,
            volume_type: spec.volume_type.clone(),
        };
        let volume = self
            .api
            .create_volume(&request)
            .await
            .map_err(|err| VmError::api("create volume", &request.name, err))?;
        self.volume = Some(OwnedVolume {
            id: volume.id.clone(),
            attached: false,
        });
        self.wait_for_volume(&volume.id, "available", "create volume")
            .await?;

        self.api
            .attach_volume(server_id, &volume.id, spec.device.as_deref())
            .await
            .map_err(|err| VmError::api("attach volume", &volume.id, err))?;
        if let Some(owned) = self.volume.as_mut() {
            owned.attached = true;
        }
        self.wait_for_volume(&volume.id, "in-use", "attach volume")
            .await
    }

    pub(super) async fn volume_status(&self, volume_id: &str) -> Result<Option<String>, ApiError> {
        Ok(self
            .api
            .get_volume(volume_id)
            .await?
            .map(|volume| volume.status))
    }

    async fn wait_for_volume(
        &self,
        volume_id: &str,
        target: &str,
        action: &str,
    ) -> Result<(), VmError> {
        poll_until(
            self.timeouts.action,
            || self.volume_status(volume_id),
            |status| status.as_deref() == Some(target),
            |status| status.as_deref().is_some_and(is_volume_error),
        )
        .await
        .map(|_| ())
        .map_err(|err| err.into_vm_error(action, volume_id))
    }
}

fn single_match(kind: &str, name: &str, mut ids: Vec<String>) -> Result<String, VmError> {
    match ids.len() {
        0 => Err(VmError::NotFound {
            kind: kind.to_owned(),
            name: name.to_owned(),
        }),
        1 => ids.pop().ok_or_else(|| VmError::NotFound {
            kind: kind.to_owned(),
            name: name.to_owned(),
        }),
        count => Err(VmError::Ambiguous {
            kind: kind.to_owned(),
            name: name.to_owned(),
            count,
        }),
    }
}
