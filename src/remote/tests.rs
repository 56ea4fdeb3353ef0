//! Tests for remote access helpers.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use rstest::rstest;
use tokio::net::TcpListener;

use super::ssh::expand_tilde;
use super::*;
use crate::test_support::RecordingRemote;

fn settings() -> SshSettings {
    SshSettings {
        probe_interval: Duration::from_millis(10),
        connect_timeout: Duration::from_millis(50),
        ..SshSettings::default()
    }
}

fn key_credentials() -> Credentials {
    Credentials::with_key("ubuntu", "/keys/id_ed25519")
}

#[rstest]
#[case(Credentials::default(), "ssh user required")]
#[case(
    Credentials { user: String::from("ubuntu"), ..Credentials::default() },
    "ssh password or private key required"
)]
fn rejects_incomplete_credentials(#[case] credentials: Credentials, #[case] message: &str) {
    let err = credentials
        .validate()
        .expect_err("incomplete credentials should be rejected");
    assert_eq!(err.to_string(), message);
}

fn password_credentials() -> Credentials {
    Credentials {
        user: String::from("root"),
        password: Some(String::from("hunter2")),
        private_key: None,
    }
}

#[test]
fn password_only_credentials_are_complete() {
    assert!(password_credentials().validate().is_ok());
}

#[test]
fn system_ssh_refuses_password_only_credentials() {
    let address = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 22);

    let err = SystemSsh::new(settings())
        .connect(address, &password_credentials(), &SshOptions::default())
        .err()
        .unwrap_or_else(|| panic!("password-only credentials should be refused"));

    assert!(matches!(&err, VmError::InvalidField { field, .. } if field == "ssh credentials"));
    assert_eq!(err.kind(), crate::error::ErrorKind::Precondition);
    assert!(err.to_string().contains("configure a private key"));
}

#[test]
fn builds_ssh_arguments_with_identity_and_host() {
    let address = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7)), 2222);
    let session = SystemSsh::new(settings())
        .connect(address, &key_credentials(), &SshOptions::default())
        .expect("session should be created");
    assert_eq!(session.address(), address);

    let concrete = SshSession {
        settings: settings(),
        address,
        credentials: key_credentials(),
    };
    let args: Vec<String> = concrete
        .ssh_args("uname -a")
        .into_iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();

    assert_eq!(args.first().map(String::as_str), Some("-p"));
    assert!(args.contains(&String::from("2222")));
    assert!(args.contains(&String::from("/keys/id_ed25519")));
    assert!(args.contains(&String::from("BatchMode=yes")));
    assert!(args.contains(&String::from("StrictHostKeyChecking=no")));
    assert!(args.contains(&String::from("UserKnownHostsFile=/dev/null")));
    assert_eq!(
        args.get(args.len() - 2).map(String::as_str),
        Some("ubuntu@203.0.113.7")
    );
    assert_eq!(args.last().map(String::as_str), Some("uname -a"));
}

#[test]
fn expands_home_prefix_only() {
    assert_eq!(expand_tilde("/absolute/key"), "/absolute/key");
    if let Some(home) = std::env::var_os("HOME") {
        assert_eq!(
            expand_tilde("~/.ssh/id_ed25519"),
            format!("{}/.ssh/id_ed25519", home.to_string_lossy())
        );
    }
}

#[tokio::test]
async fn wait_reachable_succeeds_when_port_listens() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let address = listener.local_addr().expect("listener address");
    let accept = tokio::spawn(async move {
        let _ = listener.accept().await;
    });

    let session = SystemSsh::new(settings())
        .connect(address, &key_credentials(), &SshOptions::default())
        .expect("session");
    session
        .wait_reachable(Duration::from_secs(2))
        .await
        .expect("listening port should be reachable");
    accept.abort();
}

#[tokio::test]
async fn wait_reachable_times_out_on_closed_port() {
    let address = {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind listener");
        listener.local_addr().expect("listener address")
    };

    let session = SystemSsh::new(settings())
        .connect(address, &key_credentials(), &SshOptions::default())
        .expect("session");
    let err = session
        .wait_reachable(Duration::from_millis(60))
        .await
        .expect_err("closed port should time out");
    assert!(matches!(
        err,
        VmError::Timeout { ref last_observed, .. } if last_observed == "unreachable"
    ));
}

#[tokio::test]
async fn open_session_prefers_public_address() {
    let remote = RecordingRemote::new();
    let public = IpAddr::V4(Ipv4Addr::new(198, 51, 100, 4));
    let private = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 4));

    let session = open_session(
        &remote,
        "vm",
        IpSlots::new(Some(public), Some(private)),
        &key_credentials(),
        &SshOptions::default(),
        Duration::from_secs(1),
    )
    .await
    .expect("session should open");

    assert_eq!(session.address(), SocketAddr::new(public, DEFAULT_SSH_PORT));
    assert_eq!(remote.connections(), vec![SocketAddr::new(public, 22)]);
}

#[tokio::test]
async fn open_session_honours_private_preference_and_port() {
    let remote = RecordingRemote::new();
    let private = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 4));
    let options = SshOptions {
        use_private_ip: true,
        port: Some(2200),
    };

    let session = open_session(
        &remote,
        "vm",
        IpSlots::new(None, Some(private)),
        &key_credentials(),
        &options,
        Duration::from_secs(1),
    )
    .await
    .expect("session should open");

    assert_eq!(session.address(), SocketAddr::new(private, 2200));
}

#[tokio::test]
async fn open_session_without_addresses_fails() {
    let remote = RecordingRemote::new();
    let err = open_session(
        &remote,
        "vm",
        IpSlots::default(),
        &key_credentials(),
        &SshOptions::default(),
        Duration::from_secs(1),
    )
    .await
    .expect_err("no address should fail");
    assert!(matches!(err, VmError::NoUsableIp { .. }));
    assert!(remote.connections().is_empty());
}
