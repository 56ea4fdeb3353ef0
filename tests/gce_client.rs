//! HTTP-level checks for the Compute Engine REST client against a local mock.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use serde_json::json;
use vmdrive::gce::{GceApi, GceClient, InstanceRequest};
use vmdrive::{ApiError, StaticToken};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ZONE_PATH: &str = "/projects/ci-project/zones/europe-west1-b";

fn client(server: &MockServer, token: &str) -> GceClient {
    GceClient::with_base_url(
        format!("{}/", server.uri()),
        "ci-project",
        Arc::new(StaticToken::new(token)),
    )
}

#[tokio::test]
async fn instance_addresses_are_decoded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{ZONE_PATH}/instances/ci-vm")))
        .and(header("authorization", "Bearer gce-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "ci-vm",
            "status": "RUNNING",
            "networkInterfaces": [{
                "networkIP": "10.128.0.7",
                "accessConfigs": [{ "name": "External NAT", "natIP": "34.76.1.2" }]
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let instance = client(&server, "gce-token")
        .get_instance("europe-west1-b", "ci-vm")
        .await
        .unwrap_or_else(|err| panic!("get instance: {err}"))
        .unwrap_or_else(|| panic!("instance should exist"));

    assert_eq!(instance.status, "RUNNING");
    assert_eq!(
        instance.ip_slots().to_array(),
        [
            Some(IpAddr::V4(Ipv4Addr::new(34, 76, 1, 2))),
            Some(IpAddr::V4(Ipv4Addr::new(10, 128, 0, 7)))
        ]
    );
}

#[tokio::test]
async fn missing_instance_reads_as_absent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{ZONE_PATH}/instances/gone")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let found = client(&server, "gce-token")
        .get_instance("europe-west1-b", "gone")
        .await
        .unwrap_or_else(|err| panic!("get instance: {err}"));

    assert!(found.is_none());
}

#[tokio::test]
async fn insert_posts_the_instance_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{ZONE_PATH}/instances")))
        .and(body_partial_json(json!({
            "name": "ci-vm",
            "machineType": "zones/europe-west1-b/machineTypes/e2-small",
            "scheduling": { "preemptible": false, "onHostMaintenance": "MIGRATE" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "op-insert",
            "status": "PENDING"
        })))
        .expect(1)
        .mount(&server)
        .await;
    let request = InstanceRequest {
        name: String::from("ci-vm"),
        machine_type: String::from("zones/europe-west1-b/machineTypes/e2-small"),
        source_image: String::from("projects/ubuntu-os-cloud/global/images/ubuntu-2204"),
        disk_type: String::from("pd-standard"),
        disk_size_gb: 20,
        network: String::from("global/networks/default"),
        subnetwork: None,
        preemptible: false,
        tags: Vec::new(),
        scopes: Vec::new(),
        ssh_keys: String::from("ubuntu:ssh-ed25519 AAAA ci"),
    };

    let operation = client(&server, "gce-token")
        .insert_instance("europe-west1-b", &request)
        .await
        .unwrap_or_else(|err| panic!("insert instance: {err}"));

    assert_eq!(operation.name, "op-insert");
    assert_eq!(operation.status, "PENDING");
}

#[tokio::test]
async fn power_actions_post_to_the_instance() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{ZONE_PATH}/instances/ci-vm/stop")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "op-stop",
            "status": "RUNNING"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let operation = client(&server, "gce-token")
        .stop_instance("europe-west1-b", "ci-vm")
        .await
        .unwrap_or_else(|err| panic!("stop instance: {err}"));

    assert_eq!(operation.name, "op-stop");
}

#[tokio::test]
async fn server_errors_keep_their_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{ZONE_PATH}/operations/op-1")))
        .respond_with(ResponseTemplate::new(503).set_body_string("backend unavailable"))
        .mount(&server)
        .await;

    let result = client(&server, "gce-token")
        .get_operation("europe-west1-b", "op-1")
        .await;

    match result {
        Err(ApiError::Status { status, body, .. }) => {
            assert_eq!(status, 503);
            assert!(body.contains("backend unavailable"));
        }
        other => panic!("expected a status error, got {other:?}"),
    }
}

#[tokio::test]
async fn empty_token_fails_before_any_request() {
    let server = MockServer::start().await;

    let result = client(&server, " ")
        .get_instance("europe-west1-b", "ci-vm")
        .await;

    assert!(matches!(result, Err(ApiError::Auth(_))), "got {result:?}");
    let received = server.received_requests().await.unwrap_or_default();
    assert!(received.is_empty());
}
