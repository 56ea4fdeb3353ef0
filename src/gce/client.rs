//! REST client for the Compute Engine v1 API.

use std::sync::Arc;

use reqwest::{Method, RequestBuilder};
use serde_json::{Value, json};

use super::api::{GceApi, Instance, InstanceRequest, Linked, Network, Operation};
use crate::error::{ApiError, ApiFuture};
use crate::http::{self, Call, HTTP_CLIENT, TokenSource};

/// Public Compute Engine endpoint.
pub const COMPUTE_BASE_URL: &str = "https://compute.googleapis.com/compute/v1";

/// [`GceApi`] over HTTPS, scoped to one project.
#[derive(Clone, Debug)]
pub struct GceClient {
    base_url: String,
    project: String,
    tokens: Arc<dyn TokenSource>,
}

impl GceClient {
    /// Creates a client for `project` against the public endpoint.
    #[must_use]
    pub fn new(project: impl Into<String>, tokens: Arc<dyn TokenSource>) -> Self {
        Self::with_base_url(COMPUTE_BASE_URL, project, tokens)
    }

    /// Creates a client against another Compute Engine endpoint.
    #[must_use]
    pub fn with_base_url(
        base_url: impl Into<String>,
        project: impl Into<String>,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            project: project.into(),
            tokens,
        }
    }

    fn project_url(&self, project: &str) -> String {
        format!("{}/projects/{project}", self.base_url)
    }

    fn zone_url(&self, zone: &str) -> String {
        format!("{}/zones/{zone}", self.project_url(&self.project))
    }

    async fn request(&self, method: Method, url: String) -> Result<RequestBuilder, ApiError> {
        http::authorise(HTTP_CLIENT.request(method, url), self.tokens.as_ref()).await
    }

    async fn lookup<T: serde::de::DeserializeOwned>(
        &self,
        url: String,
        call: Call<'_>,
    ) -> Result<Option<T>, ApiError> {
        let request = self.request(Method::GET, url).await?;
        http::send_optional(request, call).await
    }

    async fn instance_action(
        &self,
        zone: &str,
        name: &str,
        action: &str,
    ) -> Result<Operation, ApiError> {
        let url = format!("{}/instances/{name}/{action}", self.zone_url(zone));
        let request = self
            .request(Method::POST, url)
            .await?
            .header(reqwest::header::CONTENT_LENGTH, 0);
        http::send_json(request, Call::new(action, "instance", name)).await
    }
}

fn instance_body(zone: &str, request: &InstanceRequest) -> Value {
    let mut interface = json!({
        "network": request.network,
        "accessConfigs": [{ "name": "External NAT", "type": "ONE_TO_ONE_NAT" }],
    });
    if let Some(subnetwork) = &request.subnetwork {
        interface["subnetwork"] = json!(subnetwork);
    }
    let maintenance = if request.preemptible {
        "TERMINATE"
    } else {
        "MIGRATE"
    };
    json!({
        "name": request.name,
        "machineType": request.machine_type,
        "disks": [{
            "boot": true,
            "autoDelete": true,
            "type": "PERSISTENT",
            "initializeParams": {
                "sourceImage": request.source_image,
                "diskSizeGb": request.disk_size_gb.to_string(),
                "diskType": format!("zones/{zone}/diskTypes/{}", request.disk_type),
            },
        }],
        "metadata": {
            "items": [{ "key": "ssh-keys", "value": request.ssh_keys }],
        },
        "networkInterfaces": [interface],
        "scheduling": {
            "preemptible": request.preemptible,
            "automaticRestart": !request.preemptible,
            "onHostMaintenance": maintenance,
        },
        "serviceAccounts": [{ "email": "default", "scopes": request.scopes }],
        "tags": { "items": request.tags },
    })
}

impl GceApi for GceClient {
    fn get_image<'a>(&'a self, project: &'a str, name: &'a str) -> ApiFuture<'a, Option<Linked>> {
        Box::pin(async move {
            let url = format!("{}/global/images/{name}", self.project_url(project));
            self.lookup(url, Call::new("get image", "image", name)).await
        })
    }

    fn get_machine_type<'a>(
        &'a self,
        zone: &'a str,
        name: &'a str,
    ) -> ApiFuture<'a, Option<Linked>> {
        Box::pin(async move {
            let url = format!("{}/machineTypes/{name}", self.zone_url(zone));
            self.lookup(url, Call::new("get machine type", "machine type", name))
                .await
        })
    }

    fn get_network<'a>(&'a self, name: &'a str) -> ApiFuture<'a, Option<Network>> {
        Box::pin(async move {
            let url = format!(
                "{}/global/networks/{name}",
                self.project_url(&self.project)
            );
            self.lookup(url, Call::new("get network", "network", name))
                .await
        })
    }

    fn get_subnetwork<'a>(
        &'a self,
        region: &'a str,
        name: &'a str,
    ) -> ApiFuture<'a, Option<Linked>> {
        Box::pin(async move {
            let url = format!(
                "{}/regions/{region}/subnetworks/{name}",
                self.project_url(&self.project)
            );
            self.lookup(url, Call::new("get subnetwork", "subnetwork", name))
                .await
        })
    }

    fn insert_instance<'a>(
        &'a self,
        zone: &'a str,
        request: &'a InstanceRequest,
    ) -> ApiFuture<'a, Operation> {
        Box::pin(async move {
            let url = format!("{}/instances", self.zone_url(zone));
            let builder = self
                .request(Method::POST, url)
                .await?
                .json(&instance_body(zone, request));
            http::send_json(
                builder,
                Call::new("insert instance", "instance", &request.name),
            )
            .await
        })
    }

    fn get_instance<'a>(&'a self, zone: &'a str, name: &'a str) -> ApiFuture<'a, Option<Instance>> {
        Box::pin(async move {
            let url = format!("{}/instances/{name}", self.zone_url(zone));
            self.lookup(url, Call::new("get instance", "instance", name))
                .await
        })
    }

    fn start_instance<'a>(&'a self, zone: &'a str, name: &'a str) -> ApiFuture<'a, Operation> {
        Box::pin(self.instance_action(zone, name, "start"))
    }

    fn stop_instance<'a>(&'a self, zone: &'a str, name: &'a str) -> ApiFuture<'a, Operation> {
        Box::pin(self.instance_action(zone, name, "stop"))
    }

    fn delete_instance<'a>(&'a self, zone: &'a str, name: &'a str) -> ApiFuture<'a, Operation> {
        Box::pin(async move {
            let url = format!("{}/instances/{name}", self.zone_url(zone));
            let request = self.request(Method::DELETE, url).await?;
            http::send_json(request, Call::new("delete instance", "instance", name)).await
        })
    }

    fn get_operation<'a>(&'a self, zone: &'a str, name: &'a str) -> ApiFuture<'a, Operation> {
        Box::pin(async move {
            let url = format!("{}/operations/{name}", self.zone_url(zone));
            let request = self.request(Method::GET, url).await?;
            http::send_json(request, Call::new("get operation", "operation", name)).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_body_carries_disk_keys_and_nat() {
        let request = InstanceRequest {
            name: String::from("vm"),
            machine_type: String::from("mt"),
            source_image: String::from("img"),
            disk_type: String::from("pd-ssd"),
            disk_size_gb: 20,
            network: String::from("net"),
            subnetwork: Some(String::from("sub")),
            preemptible: true,
            tags: vec![String::from("ci")],
            scopes: Vec::new(),
            ssh_keys: String::from("ubuntu:ssh-ed25519 AAAA"),
        };

        let body = instance_body("europe-west1-b", &request);

        assert_eq!(
            body["disks"][0]["initializeParams"]["diskType"],
            json!("zones/europe-west1-b/diskTypes/pd-ssd")
        );
        assert_eq!(body["metadata"]["items"][0]["key"], json!("ssh-keys"));
        assert_eq!(
            body["networkInterfaces"][0]["accessConfigs"][0]["type"],
            json!("ONE_TO_ONE_NAT")
        );
        assert_eq!(body["networkInterfaces"][0]["subnetwork"], json!("sub"));
        assert_eq!(body["scheduling"]["onHostMaintenance"], json!("TERMINATE"));
    }
}
