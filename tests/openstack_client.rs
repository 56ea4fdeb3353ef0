//! HTTP-level checks for the OpenStack REST client against a local mock.

use std::sync::Arc;

use serde_json::json;
use vmdrive::openstack::{OpenStackApi, OpenStackClient, OpenStackCredentials, ServerRequest};
use vmdrive::{ApiError, SessionCache};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "tok-123";

fn credentials(server: &MockServer) -> OpenStackCredentials {
    OpenStackCredentials {
        auth_url: format!("{}/v3/", server.uri()),
        username: String::from("ci"),
        password: String::from("secret"),
        user_domain_name: String::from("Default"),
        project_name: String::from("ci-project"),
        project_domain_name: String::from("Default"),
        region: None,
    }
}

fn client(server: &MockServer) -> OpenStackClient {
    OpenStackClient::with_session_cache(credentials(server), Arc::new(SessionCache::new()))
}

async fn mount_keystone(server: &MockServer, expected_logins: u64) {
    let catalog = json!({
        "token": {
            "catalog": [
                {
                    "type": "compute",
                    "endpoints": [
                        { "interface": "internal", "url": format!("{}/internal", server.uri()) },
                        { "interface": "public", "url": format!("{}/compute/", server.uri()) }
                    ]
                },
                {
                    "type": "image",
                    "endpoints": [
                        { "interface": "public", "url": format!("{}/image", server.uri()) }
                    ]
                }
            ]
        }
    });
    Mock::given(method("POST"))
        .and(path("/v3/auth/tokens"))
        .and(body_partial_json(json!({
            "auth": { "scope": { "project": { "name": "ci-project" } } }
        })))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("X-Subject-Token", TOKEN)
                .set_body_json(catalog),
        )
        .expect(expected_logins)
        .mount(server)
        .await;
}

fn flavors() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "flavors": [{ "id": "flv-1", "name": "m1.small" }]
    }))
}

#[tokio::test]
async fn token_is_reused_across_calls() {
    let server = MockServer::start().await;
    mount_keystone(&server, 1).await;
    Mock::given(method("GET"))
        .and(path("/compute/flavors"))
        .and(header("X-Auth-Token", TOKEN))
        .respond_with(flavors())
        .expect(2)
        .mount(&server)
        .await;
    let api = client(&server);

    let first = api
        .list_flavors()
        .await
        .unwrap_or_else(|err| panic!("list flavors: {err}"));
    let second = api
        .list_flavors()
        .await
        .unwrap_or_else(|err| panic!("list flavors: {err}"));

    assert_eq!(first, second);
    assert_eq!(
        first.first().map(|flavor| flavor.name.as_str()),
        Some("m1.small")
    );
}

#[tokio::test]
async fn default_clients_share_a_login_per_cloud() {
    let first_cloud = MockServer::start().await;
    let second_cloud = MockServer::start().await;
    for server in [&first_cloud, &second_cloud] {
        mount_keystone(server, 1).await;
        Mock::given(method("GET"))
            .and(path("/compute/flavors"))
            .and(header("X-Auth-Token", TOKEN))
            .respond_with(flavors())
            .expect(2)
            .mount(server)
            .await;
    }

    for server in [&first_cloud, &second_cloud] {
        for _ in 0..2 {
            OpenStackClient::new(credentials(server))
                .list_flavors()
                .await
                .unwrap_or_else(|err| panic!("list flavors: {err}"));
        }
    }
}

#[tokio::test]
async fn rejected_token_forces_a_fresh_login() {
    let server = MockServer::start().await;
    mount_keystone(&server, 2).await;
    Mock::given(method("GET"))
        .and(path("/compute/flavors"))
        .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/compute/flavors"))
        .respond_with(flavors())
        .mount(&server)
        .await;
    let api = client(&server);

    let expired = api.list_flavors().await;
    let refreshed = api.list_flavors().await;

    assert!(
        matches!(expired, Err(ApiError::Status { status: 401, .. })),
        "first call returned {expired:?}"
    );
    assert!(refreshed.is_ok(), "second call returned {refreshed:?}");
}

#[tokio::test]
async fn keystone_rejection_is_an_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/auth/tokens"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let result = client(&server).list_flavors().await;

    assert!(matches!(result, Err(ApiError::Auth(_))), "got {result:?}");
}

#[tokio::test]
async fn missing_server_reads_as_absent() {
    let server = MockServer::start().await;
    mount_keystone(&server, 1).await;
    Mock::given(method("GET"))
        .and(path("/compute/servers/srv-gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let found = client(&server)
        .get_server("srv-gone")
        .await
        .unwrap_or_else(|err| panic!("get server: {err}"));

    assert_eq!(found, None);
}

#[tokio::test]
async fn floating_ip_lookup_reports_association_and_absence() {
    let server = MockServer::start().await;
    mount_keystone(&server, 1).await;
    Mock::given(method("GET"))
        .and(path("/compute/os-floating-ips/fip-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "floating_ip": {
                "id": "fip-1",
                "ip": "203.0.113.10",
                "pool": "public",
                "instance_id": "srv-1"
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/compute/os-floating-ips/fip-gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let api = client(&server);

    let associated = api
        .get_floating_ip("fip-1")
        .await
        .unwrap_or_else(|err| panic!("get floating IP: {err}"));
    let released = api
        .get_floating_ip("fip-gone")
        .await
        .unwrap_or_else(|err| panic!("get floating IP: {err}"));

    assert_eq!(
        associated.and_then(|ip| ip.instance_id),
        Some(String::from("srv-1"))
    );
    assert_eq!(released, None);
}

#[tokio::test]
async fn images_are_filtered_by_name() {
    let server = MockServer::start().await;
    mount_keystone(&server, 1).await;
    Mock::given(method("GET"))
        .and(path("/image/v2/images"))
        .and(query_param("name", "Ubuntu-22.04"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "images": [{ "id": "img-1", "name": "Ubuntu-22.04" }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let images = client(&server)
        .find_images("Ubuntu-22.04")
        .await
        .unwrap_or_else(|err| panic!("find images: {err}"));

    assert_eq!(images.len(), 1);
}

#[tokio::test]
async fn create_server_sends_resolved_references() {
    let server = MockServer::start().await;
    mount_keystone(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/compute/servers"))
        .and(body_partial_json(json!({
            "server": {
                "name": "build-box",
                "flavorRef": "flv-1",
                "imageRef": "img-1",
                "networks": [{ "uuid": "net-1" }],
                "key_name": "ci-key"
            }
        })))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({
            "server": { "id": "srv-1", "adminPass": "ignored" }
        })))
        .expect(1)
        .mount(&server)
        .await;
    let request = ServerRequest {
        name: String::from("build-box"),
        flavor_id: String::from("flv-1"),
        image_id: String::from("img-1"),
        networks: vec![String::from("net-1")],
        security_groups: vec![String::from("default")],
        key_name: Some(String::from("ci-key")),
    };

    let created = client(&server)
        .create_server(&request)
        .await
        .unwrap_or_else(|err| panic!("create server: {err}"));

    assert_eq!(created.id, "srv-1");
    assert_eq!(created.status, "BUILD");
}
