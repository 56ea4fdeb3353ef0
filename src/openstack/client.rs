//! REST client for Keystone v3, Nova, Glance and Cinder.
//!
//! The Keystone token and service catalog live in a [`SessionCache`]. By
//! default clients draw their cache from a process-wide registry keyed by
//! credentials, so clients for the same cloud and project share one login
//! while clients for different ones never see each other's token.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use reqwest::{Method, RequestBuilder};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::api::{
    Flavor, FloatingIp, Image, OpenStackApi, PowerAction, Server, ServerRequest, Volume,
    VolumeRequest,
};
use crate::error::{ApiError, ApiFuture};
use crate::http::{self, Call, HTTP_CLIENT};
use crate::session::SessionCache;

const TOKEN_HEADER: &str = "X-Auth-Token";
const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";

type SessionRegistry = HashMap<OpenStackCredentials, Arc<SessionCache<KeystoneSession>>>;

static GLOBAL_SESSIONS: LazyLock<Mutex<SessionRegistry>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn shared_session(credentials: &OpenStackCredentials) -> Arc<SessionCache<KeystoneSession>> {
    let mut registry = GLOBAL_SESSIONS
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    Arc::clone(
        registry
            .entry(credentials.clone())
            .or_insert_with(|| Arc::new(SessionCache::new())),
    )
}

/// Drops every process-wide Keystone session.
pub fn reset_global_session() {
    GLOBAL_SESSIONS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .values()
        .for_each(|sessions| sessions.reset());
}

/// Keystone v3 password credentials.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct OpenStackCredentials {
    /// Identity endpoint, such as `https://keystone.example:5000/v3`.
    pub auth_url: String,
    /// User name.
    pub username: String,
    /// Password.
    pub password: String,
    /// Domain of the user.
    pub user_domain_name: String,
    /// Project to scope the token to.
    pub project_name: String,
    /// Domain of the project.
    pub project_domain_name: String,
    /// Region used to pick catalog endpoints; any region when unset.
    pub region: Option<String>,
}

/// Authenticated Keystone session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeystoneSession {
    token: String,
    compute: String,
    image: Option<String>,
    volume: Option<String>,
}

impl KeystoneSession {
    /// Nova endpoint URL.
    #[must_use]
    pub fn compute_url(&self) -> &str {
        &self.compute
    }
}

#[derive(Debug, Deserialize)]
struct TokenEnvelope {
    token: TokenBody,
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    #[serde(default)]
    catalog: Vec<CatalogService>,
}

#[derive(Debug, Deserialize)]
struct CatalogService {
    #[serde(rename = "type")]
    service_type: String,
    #[serde(default)]
    endpoints: Vec<CatalogEndpoint>,
}

#[derive(Debug, Deserialize)]
struct CatalogEndpoint {
    interface: String,
    url: String,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    region_id: Option<String>,
}

fn endpoint_for(catalog: &[CatalogService], types: &[&str], region: Option<&str>) -> Option<String> {
    types.iter().find_map(|wanted| {
        catalog
            .iter()
            .filter(|service| service.service_type == *wanted)
            .flat_map(|service| service.endpoints.iter())
            .find(|endpoint| {
                endpoint.interface == "public"
                    && region.is_none_or(|name| {
                        endpoint.region_id.as_deref() == Some(name)
                            || endpoint.region.as_deref() == Some(name)
                    })
            })
            .map(|endpoint| endpoint.url.trim_end_matches('/').to_owned())
    })
}

async fn authenticate(credentials: &OpenStackCredentials) -> Result<KeystoneSession, ApiError> {
    let url = format!("{}/auth/tokens", credentials.auth_url.trim_end_matches('/'));
    let body = json!({
        "auth": {
            "identity": {
                "methods": ["password"],
                "password": {
                    "user": {
                        "name": credentials.username,
                        "domain": { "name": credentials.user_domain_name },
                        "password": credentials.password,
                    }
                }
            },
            "scope": {
                "project": {
                    "name": credentials.project_name,
                    "domain": { "name": credentials.project_domain_name },
                }
            }
        }
    });

    debug!(auth_url = %credentials.auth_url, "requesting keystone token");
    let call = Call::new("authenticate", "token", &credentials.username);
    let response = http::send(HTTP_CLIENT.post(&url).json(&body), call)
        .await
        .map_err(|err| ApiError::Auth(err.to_string()))?;
    let token = response
        .headers()
        .get(SUBJECT_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(ToOwned::to_owned)
        .ok_or_else(|| ApiError::Auth(String::from("keystone response carried no token")))?;
    let envelope: TokenEnvelope = http::decode(response, call).await?;

    let region = credentials.region.as_deref();
    let catalog = &envelope.token.catalog;
    let compute = endpoint_for(catalog, &["compute"], region)
        .ok_or_else(|| ApiError::Auth(String::from("service catalog has no compute endpoint")))?;
    Ok(KeystoneSession {
        token,
        compute,
        image: endpoint_for(catalog, &["image"], region),
        volume: endpoint_for(catalog, &["volumev3", "block-storage", "volume"], region),
    })
}

/// [`OpenStackApi`] over HTTPS.
#[derive(Clone, Debug)]
pub struct OpenStackClient {
    credentials: OpenStackCredentials,
    sessions: Arc<SessionCache<KeystoneSession>>,
}

#[derive(Clone, Copy, Debug)]
enum Service {
    Compute,
    Image,
    Volume,
}

impl OpenStackClient {
    /// Creates a client sharing the process-wide session of clients with
    /// identical credentials.
    #[must_use]
    pub fn new(credentials: OpenStackCredentials) -> Self {
        let sessions = shared_session(&credentials);
        Self::with_session_cache(credentials, sessions)
    }

    /// Creates a client with its own session cache.
    #[must_use]
    pub const fn with_session_cache(
        credentials: OpenStackCredentials,
        sessions: Arc<SessionCache<KeystoneSession>>,
    ) -> Self {
        Self {
            credentials,
            sessions,
        }
    }

    /// Returns the cached session, authenticating on first use.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Auth`] when Keystone rejects the credentials.
    pub async fn session(&self) -> Result<Arc<KeystoneSession>, ApiError> {
        self.sessions
            .get_or_try_init(|| authenticate(&self.credentials))
            .await
    }

    async fn request(
        &self,
        method: Method,
        service: Service,
        path: &str,
    ) -> Result<RequestBuilder, ApiError> {
        let session = self.session().await?;
        let base = match service {
            Service::Compute => Some(session.compute.as_str()),
            Service::Image => session.image.as_deref(),
            Service::Volume => session.volume.as_deref(),
        }
        .ok_or_else(|| ApiError::Auth(format!("service catalog has no {service:?} endpoint")))?;
        Ok(HTTP_CLIENT
            .request(method, format!("{base}{path}"))
            .header(TOKEN_HEADER, &session.token))
    }

    /// Drops the session when a call reports an expired token.
    fn observe<T>(&self, result: Result<T, ApiError>) -> Result<T, ApiError> {
        if let Err(err) = &result
            && http::is_unauthorised(err)
        {
            self.sessions.reset();
        }
        result
    }

    async fn fetch<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        service: Service,
        path: &str,
        body: Option<Value>,
        call: Call<'_>,
    ) -> Result<T, ApiError> {
        let mut request = self.request(method, service, path).await?;
        if let Some(payload) = body {
            request = request.json(&payload);
        }
        self.observe(http::send_json(request, call).await)
    }

    async fn fetch_optional<T: serde::de::DeserializeOwned>(
        &self,
        service: Service,
        path: &str,
        call: Call<'_>,
    ) -> Result<Option<T>, ApiError> {
        let request = self.request(Method::GET, service, path).await?;
        self.observe(http::send_optional(request, call).await)
    }

    async fn execute(
        &self,
        method: Method,
        service: Service,
        path: &str,
        body: Option<Value>,
        call: Call<'_>,
    ) -> Result<(), ApiError> {
        let mut request = self.request(method, service, path).await?;
        if let Some(payload) = body {
            request = request.json(&payload);
        }
        self.observe(http::send_empty(request, call).await)
    }
}

#[derive(Deserialize)]
struct FlavorList {
    flavors: Vec<Flavor>,
}

#[derive(Deserialize)]
struct ImageList {
    images: Vec<Image>,
}

#[derive(Deserialize)]
struct ServerEnvelope {
    server: Server,
}

#[derive(Deserialize)]
struct CreatedServer {
    server: CreatedServerId,
}

#[derive(Deserialize)]
struct CreatedServerId {
    id: String,
}

#[derive(Deserialize)]
struct FloatingIpEnvelope {
    floating_ip: FloatingIp,
}

#[derive(Deserialize)]
struct VolumeEnvelope {
    volume: Volume,
}

impl OpenStackApi for OpenStackClient {
    fn list_flavors(&self) -> ApiFuture<'_, Vec<Flavor>> {
        Box::pin(async move {
            let list: FlavorList = self
                .fetch(
                    Method::GET,
                    Service::Compute,
                    "/flavors",
                    None,
                    Call::new("list flavors", "flavor", "*"),
                )
                .await?;
            Ok(list.flavors)
        })
    }

    fn find_images<'a>(&'a self, name: &'a str) -> ApiFuture<'a, Vec<Image>> {
        Box::pin(async move {
            let request = self
                .request(Method::GET, Service::Image, "/v2/images")
                .await?
                .query(&[("name", name)]);
            let list: ImageList = self
                .observe(http::send_json(request, Call::new("find images", "image", name)).await)?;
            Ok(list.images)
        })
    }

    fn create_server<'a>(&'a self, request: &'a ServerRequest) -> ApiFuture<'a, Server> {
        Box::pin(async move {
            let networks: Vec<Value> = request
                .networks
                .iter()
                .map(|uuid| json!({ "uuid": uuid }))
                .collect();
            let groups: Vec<Value> = request
                .security_groups
                .iter()
                .map(|name| json!({ "name": name }))
                .collect();
            let mut server = json!({
                "name": request.name,
                "flavorRef": request.flavor_id,
                "imageRef": request.image_id,
                "networks": networks,
                "security_groups": groups,
            });
            if let (Some(key_name), Some(fields)) = (&request.key_name, server.as_object_mut()) {
                fields.insert(String::from("key_name"), json!(key_name));
            }

            let created: CreatedServer = self
                .fetch(
                    Method::POST,
                    Service::Compute,
                    "/servers",
                    Some(json!({ "server": server })),
                    Call::new("create server", "server", &request.name),
                )
                .await?;
            Ok(Server {
                id: created.server.id,
                status: String::from("BUILD"),
                addresses: std::collections::BTreeMap::new(),
            })
        })
    }

    fn get_server<'a>(&'a self, id: &'a str) -> ApiFuture<'a, Option<Server>> {
        Box::pin(async move {
            let found: Option<ServerEnvelope> = self
                .fetch_optional(
                    Service::Compute,
                    &format!("/servers/{id}"),
                    Call::new("get server", "server", id),
                )
                .await?;
            Ok(found.map(|envelope| envelope.server))
        })
    }

    fn server_action<'a>(&'a self, id: &'a str, action: PowerAction) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            let body = match action {
                PowerAction::Start => json!({ "os-start": null }),
                PowerAction::Stop => json!({ "os-stop": null }),
            };
            self.execute(
                Method::POST,
                Service::Compute,
                &format!("/servers/{id}/action"),
                Some(body),
                Call::new("server action", "server", id),
            )
            .await
        })
    }

    fn delete_server<'a>(&'a self, id: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            self.execute(
                Method::DELETE,
                Service::Compute,
                &format!("/servers/{id}"),
                None,
                Call::new("delete server", "server", id),
            )
            .await
        })
    }

    fn create_floating_ip<'a>(&'a self, pool: &'a str) -> ApiFuture<'a, FloatingIp> {
        Box::pin(async move {
            let envelope: FloatingIpEnvelope = self
                .fetch(
                    Method::POST,
                    Service::Compute,
                    "/os-floating-ips",
                    Some(json!({ "pool": pool })),
                    Call::new("create floating IP", "floating IP pool", pool),
                )
                .await?;
            Ok(envelope.floating_ip)
        })
    }

    fn associate_floating_ip<'a>(
        &'a self,
        server_id: &'a str,
        address: &'a str,
    ) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            self.execute(
                Method::POST,
                Service::Compute,
                &format!("/servers/{server_id}/action"),
                Some(json!({ "addFloatingIp": { "address": address } })),
                Call::new("associate floating IP", "server", server_id),
            )
            .await
        })
    }

    fn disassociate_floating_ip<'a>(
        &'a self,
        server_id: &'a str,
        address: &'a str,
    ) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            self.execute(
                Method::POST,
                Service::Compute,
                &format!("/servers/{server_id}/action"),
                Some(json!({ "removeFloatingIp": { "address": address } })),
                Call::new("disassociate floating IP", "server", server_id),
            )
            .await
        })
    }

    fn get_floating_ip<'a>(&'a self, id: &'a str) -> ApiFuture<'a, Option<FloatingIp>> {
        Box::pin(async move {
            let found: Option<FloatingIpEnvelope> = self
                .fetch_optional(
                    Service::Compute,
                    &format!("/os-floating-ips/{id}"),
                    Call::new("get floating IP", "floating IP", id),
                )
                .await?;
            Ok(found.map(|envelope| envelope.floating_ip))
        })
    }

    fn delete_floating_ip<'a>(&'a self, id: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            self.execute(
                Method::DELETE,
                Service::Compute,
                &format!("/os-floating-ips/{id}"),
                None,
                Call::new("release floating IP", "floating IP", id),
            )
            .await
        })
    }

    fn create_volume<'a>(&'a self, request: &'a VolumeRequest) -> ApiFuture<'a, Volume> {
        Box::pin(async move {
            let mut volume = json!({ "name": request.name, "size": request.size_gb });
            if let (Some(kind), Some(fields)) = (&request.volume_type, volume.as_object_mut()) {
                fields.insert(String::from("volume_type"), json!(kind));
            }
            let envelope: VolumeEnvelope = self
                .fetch(
                    Method::POST,
                    Service::Volume,
                    "/volumes",
                    Some(json!({ "volume": volume })),
                    Call::new("create volume", "volume", &request.name),
                )
                .await?;
            Ok(envelope.volume)
        })
    }

    fn get_volume<'a>(&'a self, id: &'a str) -> ApiFuture<'a, Option<Volume>> {
        Box::pin(async move {
            let found: Option<VolumeEnvelope> = self
                .fetch_optional(
                    Service::Volume,
                    &format!("/volumes/{id}"),
                    Call::new("get volume", "volume", id),
                )
                .await?;
            Ok(found.map(|envelope| envelope.volume))
        })
    }

    fn attach_volume<'a>(
        &'a self,
        server_id: &'a str,
        volume_id: &'a str,
        device: Option<&'a str>,
    ) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            let mut attachment = json!({ "volumeId": volume_id });
            if let (Some(path), Some(fields)) = (device, attachment.as_object_mut()) {
                fields.insert(String::from("device"), json!(path));
            }
            self.execute(
                Method::POST,
                Service::Compute,
                &format!("/servers/{server_id}/os-volume_attachments"),
                Some(json!({ "volumeAttachment": attachment })),
                Call::new("attach volume", "server", server_id),
            )
            .await
        })
    }

    fn detach_volume<'a>(&'a self, server_id: &'a str, volume_id: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            self.execute(
                Method::DELETE,
                Service::Compute,
                &format!("/servers/{server_id}/os-volume_attachments/{volume_id}"),
                None,
                Call::new("detach volume", "volume attachment", volume_id),
            )
            .await
        })
    }

    fn delete_volume<'a>(&'a self, id: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            self.execute(
                Method::DELETE,
                Service::Volume,
                &format!("/volumes/{id}"),
                None,
                Call::new("delete volume", "volume", id),
            )
            .await
        })
    }
}
