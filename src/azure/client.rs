//! REST client for the Azure Resource Manager API.

use std::sync::Arc;

use reqwest::{Method, RequestBuilder};
use serde::Deserialize;
use serde_json::json;

use super::api::{AzureApi, AzureResource, Deployment, InstanceView};
use crate::error::{ApiError, ApiFuture};
use crate::http::{self, Call, HTTP_CLIENT, TokenSource};

/// Public-cloud Resource Manager endpoint.
pub const DEFAULT_MANAGEMENT_URL: &str = "https://management.azure.com";

const DEPLOYMENTS_API_VERSION: &str = "2021-04-01";
const COMPUTE_API_VERSION: &str = "2023-03-01";
const DISKS_API_VERSION: &str = "2023-04-02";
const NETWORK_API_VERSION: &str = "2023-05-01";

/// Subscription and resource group a client operates in.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AzureTarget {
    /// Subscription identifier.
    pub subscription_id: String,
    /// Resource group holding every resource.
    pub resource_group: String,
}

/// [`AzureApi`] over HTTPS.
#[derive(Clone, Debug)]
pub struct AzureClient {
    base_url: String,
    target: AzureTarget,
    tokens: Arc<dyn TokenSource>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentEnvelope {
    #[serde(default)]
    properties: DeploymentProperties,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentProperties {
    #[serde(default)]
    provisioning_state: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublicIpEnvelope {
    #[serde(default)]
    properties: PublicIpProperties,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublicIpProperties {
    #[serde(default)]
    ip_address: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NicEnvelope {
    #[serde(default)]
    properties: NicProperties,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NicProperties {
    #[serde(default)]
    ip_configurations: Vec<IpConfiguration>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpConfiguration {
    #[serde(default)]
    properties: IpConfigurationProperties,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpConfigurationProperties {
    #[serde(rename = "privateIPAddress", default)]
    private_ip_address: Option<String>,
}

const fn api_version(kind: AzureResource) -> &'static str {
    match kind {
        AzureResource::VirtualMachine => COMPUTE_API_VERSION,
        AzureResource::Disk => DISKS_API_VERSION,
        AzureResource::NetworkInterface | AzureResource::PublicIp => NETWORK_API_VERSION,
    }
}

impl AzureClient {
    /// Creates a client for the public cloud.
    #[must_use]
    pub fn new(target: AzureTarget, tokens: Arc<dyn TokenSource>) -> Self {
        Self::with_base_url(DEFAULT_MANAGEMENT_URL, target, tokens)
    }

    /// Creates a client against another Resource Manager endpoint.
    #[must_use]
    pub fn with_base_url(
        base_url: impl Into<String>,
        target: AzureTarget,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            target,
            tokens,
        }
    }

    fn group_url(&self) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}",
            self.base_url, self.target.subscription_id, self.target.resource_group
        )
    }

    fn resource_url(&self, kind: AzureResource, name: &str) -> String {
        format!(
            "{}/providers/{}/{name}",
            self.group_url(),
            kind.provider_path()
        )
    }

    fn deployment_url(&self, name: &str) -> String {
        format!(
            "{}/providers/Microsoft.Resources/deployments/{name}",
            self.group_url()
        )
    }

    async fn request(
        &self,
        method: Method,
        url: String,
        version: &str,
    ) -> Result<RequestBuilder, ApiError> {
        let request = HTTP_CLIENT
            .request(method, url)
            .query(&[("api-version", version)]);
        http::authorise(request, self.tokens.as_ref()).await
    }

    async fn vm_action(&self, vm_name: &str, action: &str) -> Result<(), ApiError> {
        let url = format!(
            "{}/{action}",
            self.resource_url(AzureResource::VirtualMachine, vm_name)
        );
        let request = self
            .request(Method::POST, url, COMPUTE_API_VERSION)
            .await?
            .header(reqwest::header::CONTENT_LENGTH, 0);
        http::send_empty(request, Call::new(action, "virtual machine", vm_name)).await
    }
}

impl AzureApi for AzureClient {
    fn create_deployment<'a>(&'a self, deployment: &'a Deployment) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            let body = json!({
                "properties": {
                    "mode": "Incremental",
                    "template": deployment.template,
                    "parameters": deployment.parameters,
                }
            });
            let request = self
                .request(
                    Method::PUT,
                    self.deployment_url(&deployment.name),
                    DEPLOYMENTS_API_VERSION,
                )
                .await?
                .json(&body);
            http::send_empty(
                request,
                Call::new("create deployment", "deployment", &deployment.name),
            )
            .await
        })
    }

    fn deployment_state<'a>(&'a self, name: &'a str) -> ApiFuture<'a, Option<String>> {
        Box::pin(async move {
            let request = self
                .request(Method::GET, self.deployment_url(name), DEPLOYMENTS_API_VERSION)
                .await?;
            let found: Option<DeploymentEnvelope> = http::send_optional(
                request,
                Call::new("get deployment", "deployment", name),
            )
            .await?;
            Ok(found.and_then(|envelope| envelope.properties.provisioning_state))
        })
    }

    fn instance_view<'a>(&'a self, vm_name: &'a str) -> ApiFuture<'a, Option<InstanceView>> {
        Box::pin(async move {
            let url = format!(
                "{}/instanceView",
                self.resource_url(AzureResource::VirtualMachine, vm_name)
            );
            let request = self.request(Method::GET, url, COMPUTE_API_VERSION).await?;
            http::send_optional(
                request,
                Call::new("get instance view", "virtual machine", vm_name),
            )
            .await
        })
    }

    fn power_off<'a>(&'a self, vm_name: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(self.vm_action(vm_name, "powerOff"))
    }

    fn start<'a>(&'a self, vm_name: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(self.vm_action(vm_name, "start"))
    }

    fn public_ip_address<'a>(&'a self, name: &'a str) -> ApiFuture<'a, Option<String>> {
        Box::pin(async move {
            let request = self
                .request(
                    Method::GET,
                    self.resource_url(AzureResource::PublicIp, name),
                    NETWORK_API_VERSION,
                )
                .await?;
            let found: Option<PublicIpEnvelope> =
                http::send_optional(request, Call::new("get public IP", "public IP", name))
                    .await?;
            Ok(found.and_then(|envelope| envelope.properties.ip_address))
        })
    }

    fn private_ip_address<'a>(&'a self, nic_name: &'a str) -> ApiFuture<'a, Option<String>> {
        Box::pin(async move {
            let request = self
                .request(
                    Method::GET,
                    self.resource_url(AzureResource::NetworkInterface, nic_name),
                    NETWORK_API_VERSION,
                )
                .await?;
            let found: Option<NicEnvelope> = http::send_optional(
                request,
                Call::new("get network interface", "network interface", nic_name),
            )
            .await?;
            Ok(found.and_then(|envelope| {
                envelope
                    .properties
                    .ip_configurations
                    .into_iter()
                    .find_map(|config| config.properties.private_ip_address)
            }))
        })
    }

    fn resource_exists<'a>(&'a self, kind: AzureResource, name: &'a str) -> ApiFuture<'a, bool> {
        Box::pin(async move {
            let request = self
                .request(Method::GET, self.resource_url(kind, name), api_version(kind))
                .await?;
            match http::send(request, Call::new("get resource", "resource", name)).await {
                Ok(_) => Ok(true),
                Err(err) if err.is_not_found() => Ok(false),
                Err(err) => Err(err),
            }
        })
    }

    fn delete_resource<'a>(&'a self, kind: AzureResource, name: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            let request = self
                .request(
                    Method::DELETE,
                    self.resource_url(kind, name),
                    api_version(kind),
                )
                .await?;
            http::send_empty(request, Call::new("delete resource", "resource", name)).await
        })
    }
}
