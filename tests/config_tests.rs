//! Unit tests for configuration validation and spec conversion.

use camino::Utf8PathBuf;
use cap_std::{ambient_authority, fs_utf8::Dir};
use rstest::*;
use serde_json::json;
use tempfile::TempDir;

use vmdrive::config::{
    AzureConfig, ConfigError, GceConfig, OpenStackConfig, SshConfig, VmrunConfig,
};

#[fixture]
fn openstack_config() -> OpenStackConfig {
    OpenStackConfig {
        auth_url: String::from("https://keystone.example.test/v3/"),
        username: String::from("ci"),
        password: String::from("secret"),
        user_domain_name: String::from("Default"),
        project_name: String::from("ci-project"),
        project_domain_name: String::from("Default"),
        region_name: Some(String::from("  ")),
        flavor_name: String::from(" m1.small "),
        image_name: Some(String::from("Ubuntu-22.04")),
        image_id: None,
        networks: String::from("net-1, ,net-2"),
        floating_ip_pool: String::from("public"),
        security_groups: String::from("default"),
        key_name: None,
        volume_size_gb: None,
        volume_type: None,
        volume_device: None,
    }
}

#[fixture]
fn gce_config() -> GceConfig {
    GceConfig {
        project: String::from("ci-project"),
        zone: String::from("europe-west1-b"),
        machine_type: String::from("e2-small"),
        source_image: String::from("ubuntu-2204-lts"),
        image_projects: None,
        disk_type: String::from("pd-standard"),
        disk_size_gb: 20,
        network: String::from("default"),
        subnetwork: None,
        use_internal_ip: false,
        preemptible: false,
        access_token: String::from("gce-token"),
        ssh_public_key_file: String::from("/nonexistent/id_ed25519.pub"),
    }
}

#[fixture]
fn azure_config() -> AzureConfig {
    AzureConfig {
        subscription_id: String::from("sub-1"),
        resource_group: String::from("ci-rg"),
        access_token: String::from("arm-token"),
        template_file: String::from("/nonexistent/template.json"),
        location: None,
        size: String::from("Standard_B2s"),
        image_publisher: String::from("Canonical"),
        image_offer: String::from("0001-com-ubuntu-server-jammy"),
        image_sku: String::from("22_04-lts"),
        image_version: String::from("latest"),
        virtual_network: String::from("ci-vnet"),
        subnet: String::from("default"),
        admin_user: String::from("azureuser"),
        ssh_public_key_file: String::from("/nonexistent/id_ed25519.pub"),
    }
}

#[fixture]
fn vmrun_config() -> VmrunConfig {
    VmrunConfig {
        vmrun_bin: String::from("vmrun"),
        source_vmx: String::from("/vms/base/ubuntu.vmx"),
        destination_dir: String::from("/vms/clones/ci"),
        gui: false,
    }
}

fn assert_actionable(error: &ConfigError, env_var: &str, toml_key: &str, file: &str) {
    let ConfigError::MissingField(message) = error else {
        panic!("expected MissingField error, got {error:?}");
    };
    for needle in [env_var, toml_key, file] {
        assert!(
            message.contains(needle),
            "error should mention {needle}: {message}"
        );
    }
}

struct Scratch {
    _dir: TempDir,
    root: Utf8PathBuf,
}

impl Scratch {
    fn new() -> Self {
        let dir = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
            .unwrap_or_else(|path| panic!("temp dir should be utf8: {}", path.display()));
        Self { _dir: dir, root }
    }

    fn write(&self, name: &str, contents: &str) -> String {
        Dir::open_ambient_dir(&self.root, ambient_authority())
            .unwrap_or_else(|err| panic!("open temp dir: {err}"))
            .write(name, contents)
            .unwrap_or_else(|err| panic!("write {name}: {err}"));
        self.root.join(name).into_string()
    }
}

#[rstest]
#[case::auth_url(|cfg: &mut OpenStackConfig| cfg.auth_url.clear(), "OS_AUTH_URL", "auth_url")]
#[case::password(|cfg: &mut OpenStackConfig| cfg.password = String::from(" "), "OS_PASSWORD", "password")]
#[case::flavor(|cfg: &mut OpenStackConfig| cfg.flavor_name.clear(), "OS_FLAVOR_NAME", "flavor_name")]
#[case::image(|cfg: &mut OpenStackConfig| cfg.image_name = None, "OS_IMAGE_NAME", "image_name")]
#[case::networks(|cfg: &mut OpenStackConfig| cfg.networks = String::from(" , "), "OS_NETWORKS", "networks")]
#[case::pool(|cfg: &mut OpenStackConfig| cfg.floating_ip_pool.clear(), "OS_FLOATING_IP_POOL", "floating_ip_pool")]
fn openstack_validation_names_the_missing_setting(
    mut openstack_config: OpenStackConfig,
    #[case] mutate: fn(&mut OpenStackConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    mutate(&mut openstack_config);

    let error = openstack_config
        .validate()
        .expect_err("validation should fail");

    assert_actionable(&error, env_var, toml_key, "vmdrive-openstack.toml");
}

#[rstest]
fn openstack_image_id_alone_satisfies_the_image_requirement(mut openstack_config: OpenStackConfig) {
    openstack_config.image_name = None;
    openstack_config.image_id = Some(String::from("img-9"));

    assert!(openstack_config.validate().is_ok());
}

#[rstest]
fn openstack_spec_splits_lists_and_trims_values(openstack_config: OpenStackConfig) {
    let spec = openstack_config
        .spec("build-box", &SshConfig::default())
        .unwrap_or_else(|err| panic!("spec: {err}"));

    assert_eq!(spec.name, "build-box");
    assert_eq!(spec.flavor_name, "m1.small");
    assert_eq!(spec.networks, vec![String::from("net-1"), String::from("net-2")]);
    assert_eq!(spec.security_groups, vec![String::from("default")]);
    assert!(spec.volume.is_none());
    assert_eq!(spec.credentials.user, "ubuntu");
    assert_eq!(openstack_config.credentials().region, None);
}

#[rstest]
fn openstack_volume_is_attached_only_for_a_positive_size(mut openstack_config: OpenStackConfig) {
    openstack_config.volume_size_gb = Some(0);
    let without = openstack_config
        .spec("", &SshConfig::default())
        .unwrap_or_else(|err| panic!("spec: {err}"));
    openstack_config.volume_size_gb = Some(40);
    openstack_config.volume_type = Some(String::from("ssd"));
    let with = openstack_config
        .spec("", &SshConfig::default())
        .unwrap_or_else(|err| panic!("spec: {err}"));

    assert!(without.volume.is_none());
    let volume = with.volume.unwrap_or_else(|| panic!("volume expected"));
    assert_eq!(volume.size_gb, 40);
    assert_eq!(volume.volume_type.as_deref(), Some("ssd"));
}

#[rstest]
#[case::project(|cfg: &mut GceConfig| cfg.project.clear(), "GCE_PROJECT", "project")]
#[case::image(|cfg: &mut GceConfig| cfg.source_image.clear(), "GCE_SOURCE_IMAGE", "source_image")]
#[case::token(|cfg: &mut GceConfig| cfg.access_token.clear(), "GCE_ACCESS_TOKEN", "access_token")]
#[case::subnetwork(|cfg: &mut GceConfig| cfg.subnetwork = Some(String::new()), "GCE_SUBNETWORK", "subnetwork")]
fn gce_validation_names_the_missing_setting(
    mut gce_config: GceConfig,
    #[case] mutate: fn(&mut GceConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    mutate(&mut gce_config);

    let error = gce_config.validate().expect_err("validation should fail");

    assert_actionable(&error, env_var, toml_key, "vmdrive-gce.toml");
}

#[rstest]
fn gce_spec_reads_the_public_key_and_defaults_image_projects(mut gce_config: GceConfig) {
    let scratch = Scratch::new();
    gce_config.ssh_public_key_file = scratch.write("id.pub", "ssh-ed25519 AAAA ci\n");

    let spec = gce_config
        .spec("ci-vm", &SshConfig::default())
        .unwrap_or_else(|err| panic!("spec: {err}"));

    assert_eq!(spec.ssh_public_key, "ssh-ed25519 AAAA ci");
    assert!(!spec.image_projects.is_empty());
    assert_eq!(spec.zone, "europe-west1-b");
}

#[rstest]
fn gce_spec_reports_an_unreadable_key_file(gce_config: GceConfig) {
    let error = gce_config
        .spec("ci-vm", &SshConfig::default())
        .expect_err("missing key file should fail");

    let ConfigError::FileRead { field, path, .. } = error else {
        panic!("expected FileRead error, got {error:?}");
    };
    assert_eq!(field, "ssh_public_key_file");
    assert_eq!(path, "/nonexistent/id_ed25519.pub");
}

#[rstest]
fn azure_validation_names_the_missing_setting(mut azure_config: AzureConfig) {
    azure_config.subnet.clear();

    let error = azure_config.validate().expect_err("validation should fail");

    assert_actionable(&error, "AZURE_SUBNET", "subnet", "vmdrive-azure.toml");
}

#[rstest]
fn azure_spec_parses_the_template_and_logs_in_as_the_admin(mut azure_config: AzureConfig) {
    let scratch = Scratch::new();
    azure_config.template_file = scratch.write("template.json", r#"{ "resources": [] }"#);
    azure_config.ssh_public_key_file = scratch.write("id.pub", "ssh-ed25519 AAAA ci");

    let spec = azure_config
        .spec("ci-vm", &SshConfig::default())
        .unwrap_or_else(|err| panic!("spec: {err}"));

    assert_eq!(spec.template, json!({ "resources": [] }));
    assert_eq!(spec.credentials.user, "azureuser");
    assert_eq!(spec.location, None);
}

#[rstest]
fn azure_spec_rejects_a_template_that_is_not_json(mut azure_config: AzureConfig) {
    let scratch = Scratch::new();
    azure_config.template_file = scratch.write("template.json", "resources: []");
    azure_config.ssh_public_key_file = scratch.write("id.pub", "ssh-ed25519 AAAA ci");

    let error = azure_config
        .spec("ci-vm", &SshConfig::default())
        .expect_err("YAML template should fail");

    assert!(
        matches!(error, ConfigError::FileRead { field: "template_file", .. }),
        "unexpected error: {error:?}"
    );
}

#[rstest]
fn vmrun_validation_names_the_missing_setting(mut vmrun_config: VmrunConfig) {
    vmrun_config.destination_dir = String::from("  ");

    let error = vmrun_config.validate().expect_err("validation should fail");

    assert_actionable(
        &error,
        "VMRUN_DESTINATION_DIR",
        "destination_dir",
        "vmdrive-vmrun.toml",
    );
}

#[tokio::test]
async fn vmrun_spec_expands_home_relative_paths() {
    let _guard = vmdrive::test_support::EnvGuard::set_vars(&[("HOME", Some("/home/ci"))]).await;
    let config = VmrunConfig {
        source_vmx: String::from("~/vms/base/ubuntu.vmx"),
        destination_dir: String::from("~/vms/clones/ci"),
        ..vmrun_config()
    };

    let spec = config
        .spec("ci", &SshConfig::default())
        .unwrap_or_else(|err| panic!("spec: {err}"));

    assert_eq!(spec.source_vmx.as_str(), "/home/ci/vms/base/ubuntu.vmx");
    assert_eq!(spec.destination.as_str(), "/home/ci/vms/clones/ci");
    assert!(spec.nics.is_empty());
}

#[test]
fn ssh_validation_names_the_missing_setting() {
    let config = SshConfig {
        user: String::new(),
        ..SshConfig::default()
    };

    let error = config.credentials().expect_err("validation should fail");

    assert_actionable(&error, "VMDRIVE_SSH_USER", "user", "vmdrive.toml");
}

#[test]
fn ssh_defaults_use_key_authentication_without_host_checks() {
    let config = SshConfig {
        port: Some(2222),
        ..SshConfig::default()
    };

    let credentials = config
        .credentials()
        .unwrap_or_else(|err| panic!("credentials: {err}"));
    let settings = config.settings();

    assert_eq!(credentials.user, "ubuntu");
    assert_eq!(
        credentials.private_key.as_ref().map(|key| key.as_str()),
        Some("~/.ssh/id_rsa")
    );
    assert!(settings.batch_mode);
    assert!(!settings.strict_host_key_checking);
    assert_eq!(config.options().port, Some(2222));
}

#[tokio::test]
async fn vmrun_config_loads_from_the_environment() {
    let _guard = vmdrive::test_support::EnvGuard::set_vars(&[
        ("VMRUN_SOURCE_VMX", Some("/vms/base/ubuntu.vmx")),
        ("VMRUN_DESTINATION_DIR", Some("/vms/clones/env")),
        ("VMRUN_VMRUN_BIN", None),
    ])
    .await;

    let config =
        VmrunConfig::load_without_cli_args().unwrap_or_else(|err| panic!("load: {err}"));

    assert_eq!(config.source_vmx, "/vms/base/ubuntu.vmx");
    assert_eq!(config.destination_dir, "/vms/clones/env");
    assert_eq!(config.vmrun_bin, "vmrun");
    assert!(!config.gui);
}

#[tokio::test]
async fn unparsable_values_surface_as_parse_errors() {
    let _guard =
        vmdrive::test_support::EnvGuard::set_vars(&[("VMDRIVE_SSH_PORT", Some("not-a-port"))])
            .await;

    let error = SshConfig::load_without_cli_args().expect_err("port must be numeric");

    assert!(
        matches!(error, ConfigError::Parse(_)),
        "unexpected error: {error:?}"
    );
}
