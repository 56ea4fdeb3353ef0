//! Teardown of an OpenStack server and its side-resources.
//!
//! Resources go in reverse creation order: volume, floating IP, server. Each
//! one is polled until the backend stops listing it and is forgotten once it
//! is confirmed gone, so a retried `destroy` resumes at the resource that
//! failed. A not-found answer at any step counts as already removed.

use tracing::info;

use super::{OpenStackVm, OwnedFloatingIp, OwnedVolume, is_volume_error, translate_server_state};
use crate::error::{ApiError, VmError, tolerate_absent};
use crate::vm::VmState;
use crate::wait::poll_until;

impl OpenStackVm {
    pub(super) async fn teardown_steps(&mut self) -> Result<(), VmError> {
        let Some(server_id) = self.instance.teardown_target(&self.name)? else {
            return Ok(());
        };

        if let Some(volume) = self.volume.clone() {
            self.remove_volume(&server_id, &volume)
                .await
                .map_err(|err| VmError::teardown("volume", &volume.id, err))?;
            self.volume = None;
        }

        if let Some(floating_ip) = self.floating_ip.clone() {
            self.release_floating_ip(&server_id, &floating_ip)
                .await
                .map_err(|err| VmError::teardown("floating IP", &floating_ip.allocation.ip, err))?;
            self.floating_ip = None;
        }

        self.remove_server(&server_id)
            .await
            .map_err(|err| VmError::teardown("server", &server_id, err))?;
        self.instance.clear();
        info!(vm = %self.name, server = %server_id, "server destroyed");
        Ok(())
    }

    async fn remove_volume(&self, server_id: &str, volume: &OwnedVolume) -> Result<(), VmError> {
        if volume.attached {
            tolerate_absent(
                self.api.detach_volume(server_id, &volume.id).await,
                "detach volume",
                &volume.id,
            )?;
            poll_until(
                self.timeouts.action,
                || self.volume_status(&volume.id),
                |status| status.as_deref().is_none_or(|found| found == "available"),
                |status| status.as_deref().is_some_and(is_volume_error),
            )
            .await
            .map_err(|err| err.into_vm_error("detach volume", &volume.id))?;
        }

        tolerate_absent(
            self.api.delete_volume(&volume.id).await,
            "delete volume",
            &volume.id,
        )?;
        poll_until(
            self.timeouts.action,
            || self.volume_status(&volume.id),
            Option::is_none,
            |status| status.as_deref().is_some_and(is_volume_error),
        )
        .await
        .map(|_| ())
        .map_err(|err| err.into_vm_error("delete volume", &volume.id))
    }

    async fn release_floating_ip(
        &self,
        server_id: &str,
        floating_ip: &OwnedFloatingIp,
    ) -> Result<(), VmError> {
        let allocation = &floating_ip.allocation;
        if floating_ip.associated {
            tolerate_absent(
                self.api
                    .disassociate_floating_ip(server_id, &allocation.ip)
                    .await,
                "disassociate floating IP",
                &allocation.ip,
            )?;
            poll_until(
                self.timeouts.action,
                || self.api.get_floating_ip(&allocation.id),
                |found| found.as_ref().is_none_or(|ip| ip.instance_id.is_none()),
                |_| false,
            )
            .await
            .map_err(|err| err.into_vm_error("disassociate floating IP", &allocation.ip))?;
        }

        tolerate_absent(
            self.api.delete_floating_ip(&allocation.id).await,
            "release floating IP",
            &allocation.id,
        )?;
        poll_until(
            self.timeouts.action,
            || self.api.get_floating_ip(&allocation.id),
            Option::is_none,
            |_| false,
        )
        .await
        .map(|_| ())
        .map_err(|err| err.into_vm_error("release floating IP", &allocation.ip))
    }

    async fn remove_server(&self, server_id: &str) -> Result<(), VmError> {
        tolerate_absent(
            self.api.delete_server(server_id).await,
            "delete server",
            server_id,
        )?;
        poll_until(
            self.timeouts.action,
            move || async move {
                let server = self.api.get_server(server_id).await?;
                Ok::<_, ApiError>(server.map(|found| translate_server_state(&found.status)))
            },
            Option::is_none,
            |state| *state == Some(VmState::Error),
        )
        .await
        .map(|_| ())
        .map_err(|err| err.into_vm_error("delete server", server_id))
    }
}
