//! Configuration loading via `ortho-config`.
//!
//! Each backend has its own configuration struct. Values merge defaults,
//! configuration files, environment variables, and CLI flags in that order of
//! precedence, and every struct converts into the typed spec its adapter
//! consumes. Validation errors name the environment variable and file key
//! that supply the missing value.

use std::ffi::OsString;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use ortho_config::OrthoConfig;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::azure::AzureSpec;
use crate::gce::{
    DEFAULT_DISK_SIZE_GB, DEFAULT_DISK_TYPE, DEFAULT_IMAGE_PROJECTS, DEFAULT_MACHINE_TYPE,
    DEFAULT_NETWORK, DEFAULT_ZONE, GceSpec,
};
use crate::openstack::{DEFAULT_SECURITY_GROUP, OpenStackCredentials, OpenStackSpec, VolumeSpec};
use crate::remote::{Credentials, SshOptions, SshSettings, expand_tilde};
use crate::vmrun::{VmrunProcess, VmrunSpec};

const CONFIG_NAME: &str = "vmdrive";

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    file: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        file: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            file,
        }
    }

    fn missing(&self) -> ConfigError {
        ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to {}",
            self.description, self.env_var, self.toml_key, self.file
        ))
    }

    fn require(&self, value: &str) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(self.missing());
        }
        Ok(())
    }

    fn require_optional(&self, value: Option<&str>) -> Result<(), ConfigError> {
        value.map_or(Ok(()), |present| self.require(present))
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn read_file(path: &str, metadata: &FieldMetadata) -> Result<String, ConfigError> {
    let expanded = Utf8PathBuf::from(expand_tilde(path));
    let (directory, file) = match (expanded.parent(), expanded.file_name()) {
        (Some(parent), Some(name)) if !parent.as_str().is_empty() => (parent, name),
        (_, Some(name)) => (Utf8Path::new("."), name),
        (_, None) => return Err(metadata.missing()),
    };
    Dir::open_ambient_dir(directory, ambient_authority())
        .and_then(|dir| dir.read_to_string(file))
        .map_err(|err| ConfigError::FileRead {
            field: metadata.toml_key,
            path: expanded.to_string(),
            message: err.to_string(),
        })
}

fn program_args() -> [OsString; 1] {
    [OsString::from(CONFIG_NAME)]
}

/// OpenStack settings, read from the conventional `OS_*` variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "OS",
    discovery(
        app_name = "vmdrive",
        env_var = "VMDRIVE_OPENSTACK_CONFIG",
        config_file_name = "openstack.toml",
        dotfile_name = ".vmdrive-openstack.toml",
        project_file_name = "vmdrive-openstack.toml"
    )
)]
pub struct OpenStackConfig {
    /// Keystone v3 endpoint.
    pub auth_url: String,
    /// User name.
    pub username: String,
    /// Password.
    pub password: String,
    /// Domain of the user.
    #[ortho_config(default = "Default".to_owned())]
    pub user_domain_name: String,
    /// Project the token is scoped to.
    pub project_name: String,
    /// Domain of the project.
    #[ortho_config(default = "Default".to_owned())]
    pub project_domain_name: String,
    /// Region used to pick catalog endpoints.
    pub region_name: Option<String>,
    /// Flavor name.
    pub flavor_name: String,
    /// Image name, resolved through Glance.
    pub image_name: Option<String>,
    /// Image id; takes precedence over the name.
    pub image_id: Option<String>,
    /// Comma separated network ids.
    pub networks: String,
    /// Floating IP pool.
    pub floating_ip_pool: String,
    /// Comma separated security group names.
    #[ortho_config(default = DEFAULT_SECURITY_GROUP.to_owned())]
    pub security_groups: String,
    /// Key pair injected at boot.
    pub key_name: Option<String>,
    /// Data volume size; no volume when unset or zero.
    pub volume_size_gb: Option<u32>,
    /// Cinder volume type.
    pub volume_type: Option<String>,
    /// Device path requested for the volume.
    pub volume_device: Option<String>,
}

const OS_FILE: &str = "vmdrive-openstack.toml";

impl OpenStackConfig {
    /// Loads configuration from defaults, files, and the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter(program_args())
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the first missing value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        FieldMetadata::new("identity endpoint", "OS_AUTH_URL", "auth_url", OS_FILE)
            .require(&self.auth_url)?;
        FieldMetadata::new("user name", "OS_USERNAME", "username", OS_FILE)
            .require(&self.username)?;
        FieldMetadata::new("password", "OS_PASSWORD", "password", OS_FILE)
            .require(&self.password)?;
        FieldMetadata::new("project name", "OS_PROJECT_NAME", "project_name", OS_FILE)
            .require(&self.project_name)?;
        FieldMetadata::new("flavor name", "OS_FLAVOR_NAME", "flavor_name", OS_FILE)
            .require(&self.flavor_name)?;
        let image = FieldMetadata::new("image reference", "OS_IMAGE_NAME", "image_name", OS_FILE);
        let has_image = [self.image_name.as_deref(), self.image_id.as_deref()]
            .into_iter()
            .flatten()
            .any(|value| !value.trim().is_empty());
        if !has_image {
            return Err(image.missing());
        }
        if split_list(&self.networks).is_empty() {
            return Err(FieldMetadata::new("network", "OS_NETWORKS", "networks", OS_FILE).missing());
        }
        FieldMetadata::new(
            "floating IP pool",
            "OS_FLOATING_IP_POOL",
            "floating_ip_pool",
            OS_FILE,
        )
        .require(&self.floating_ip_pool)
    }

    /// Keystone credentials for the REST client.
    #[must_use]
    pub fn credentials(&self) -> OpenStackCredentials {
        OpenStackCredentials {
            auth_url: self.auth_url.trim().to_owned(),
            username: self.username.clone(),
            password: self.password.clone(),
            user_domain_name: self.user_domain_name.clone(),
            project_name: self.project_name.clone(),
            project_domain_name: self.project_domain_name.clone(),
            region: self.region_name.clone().filter(|region| !region.trim().is_empty()),
        }
    }

    /// Builds the adapter spec.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn spec(&self, name: &str, ssh: &SshConfig) -> Result<OpenStackSpec, ConfigError> {
        self.validate()?;
        let volume = self
            .volume_size_gb
            .filter(|size| *size > 0)
            .map(|size_gb| VolumeSpec {
                size_gb,
                volume_type: self.volume_type.clone(),
                device: self.volume_device.clone(),
            });
        Ok(OpenStackSpec {
            name: name.to_owned(),
            flavor_name: self.flavor_name.trim().to_owned(),
            image_name: self.image_name.clone().unwrap_or_default(),
            image_id: self.image_id.clone().filter(|id| !id.trim().is_empty()),
            networks: split_list(&self.networks),
            floating_ip_pool: self.floating_ip_pool.trim().to_owned(),
            security_groups: split_list(&self.security_groups),
            key_name: self.key_name.clone(),
            volume,
            credentials: ssh.credentials()?,
        })
    }
}

/// Google Compute Engine settings.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "GCE",
    discovery(
        app_name = "vmdrive",
        env_var = "VMDRIVE_GCE_CONFIG",
        config_file_name = "gce.toml",
        dotfile_name = ".vmdrive-gce.toml",
        project_file_name = "vmdrive-gce.toml"
    )
)]
pub struct GceConfig {
    /// Project owning the instance.
    pub project: String,
    /// Zone.
    #[ortho_config(default = DEFAULT_ZONE.to_owned())]
    pub zone: String,
    /// Machine type.
    #[ortho_config(default = DEFAULT_MACHINE_TYPE.to_owned())]
    pub machine_type: String,
    /// Source image name.
    pub source_image: String,
    /// Comma separated projects searched for the image.
    pub image_projects: Option<String>,
    /// Boot disk type.
    #[ortho_config(default = DEFAULT_DISK_TYPE.to_owned())]
    pub disk_type: String,
    /// Boot disk size.
    #[ortho_config(default = DEFAULT_DISK_SIZE_GB)]
    pub disk_size_gb: u32,
    /// Network name.
    #[ortho_config(default = DEFAULT_NETWORK.to_owned())]
    pub network: String,
    /// Subnetwork name.
    pub subnetwork: Option<String>,
    /// Connect through the internal address.
    #[ortho_config(default = false)]
    pub use_internal_ip: bool,
    /// Request a preemptible instance.
    #[ortho_config(default = false)]
    pub preemptible: bool,
    /// OAuth access token for the Compute API.
    pub access_token: String,
    /// OpenSSH public key installed for the SSH user.
    pub ssh_public_key_file: String,
}

const GCE_FILE: &str = "vmdrive-gce.toml";

impl GceConfig {
    /// Loads configuration from defaults, files, and the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter(program_args())
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the first missing value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        FieldMetadata::new("project", "GCE_PROJECT", "project", GCE_FILE).require(&self.project)?;
        FieldMetadata::new("zone", "GCE_ZONE", "zone", GCE_FILE).require(&self.zone)?;
        FieldMetadata::new("source image", "GCE_SOURCE_IMAGE", "source_image", GCE_FILE)
            .require(&self.source_image)?;
        FieldMetadata::new("access token", "GCE_ACCESS_TOKEN", "access_token", GCE_FILE)
            .require(&self.access_token)?;
        FieldMetadata::new(
            "SSH public key file",
            "GCE_SSH_PUBLIC_KEY_FILE",
            "ssh_public_key_file",
            GCE_FILE,
        )
        .require(&self.ssh_public_key_file)?;
        FieldMetadata::new("subnetwork", "GCE_SUBNETWORK", "subnetwork", GCE_FILE)
            .require_optional(self.subnetwork.as_deref())
    }

    /// Builds the adapter spec, reading the public key file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails or the key cannot be
    /// read.
    pub fn spec(&self, name: &str, ssh: &SshConfig) -> Result<GceSpec, ConfigError> {
        self.validate()?;
        let key_field = FieldMetadata::new(
            "SSH public key file",
            "GCE_SSH_PUBLIC_KEY_FILE",
            "ssh_public_key_file",
            GCE_FILE,
        );
        let ssh_public_key = read_file(&self.ssh_public_key_file, &key_field)?;
        let image_projects = self
            .image_projects
            .as_deref()
            .map(split_list)
            .filter(|projects| !projects.is_empty())
            .unwrap_or_else(|| DEFAULT_IMAGE_PROJECTS.map(str::to_owned).to_vec());
        Ok(GceSpec {
            name: name.to_owned(),
            zone: self.zone.trim().to_owned(),
            machine_type: self.machine_type.trim().to_owned(),
            source_image: self.source_image.trim().to_owned(),
            image_projects,
            disk_type: self.disk_type.trim().to_owned(),
            disk_size_gb: self.disk_size_gb,
            network: self.network.trim().to_owned(),
            subnetwork: self.subnetwork.clone(),
            use_internal_ip: self.use_internal_ip,
            preemptible: self.preemptible,
            ssh_public_key: ssh_public_key.trim().to_owned(),
            credentials: ssh.credentials()?,
            ..GceSpec::default()
        })
    }
}

/// Azure Resource Manager settings.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "AZURE",
    discovery(
        app_name = "vmdrive",
        env_var = "VMDRIVE_AZURE_CONFIG",
        config_file_name = "azure.toml",
        dotfile_name = ".vmdrive-azure.toml",
        project_file_name = "vmdrive-azure.toml"
    )
)]
pub struct AzureConfig {
    /// Subscription identifier.
    pub subscription_id: String,
    /// Resource group holding every resource.
    pub resource_group: String,
    /// OAuth access token for the management API.
    pub access_token: String,
    /// ARM template deployed for each VM.
    pub template_file: String,
    /// Region; the template decides when unset.
    pub location: Option<String>,
    /// VM size.
    pub size: String,
    /// Marketplace image publisher.
    pub image_publisher: String,
    /// Marketplace image offer.
    pub image_offer: String,
    /// Marketplace image SKU.
    pub image_sku: String,
    /// Marketplace image version.
    #[ortho_config(default = "latest".to_owned())]
    pub image_version: String,
    /// Existing virtual network.
    pub virtual_network: String,
    /// Subnet within the virtual network.
    pub subnet: String,
    /// Admin user created on the VM.
    pub admin_user: String,
    /// OpenSSH public key authorised for the admin user.
    pub ssh_public_key_file: String,
}

const AZURE_FILE: &str = "vmdrive-azure.toml";

impl AzureConfig {
    /// Loads configuration from defaults, files, and the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter(program_args())
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the first missing value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            (&self.subscription_id, "subscription", "AZURE_SUBSCRIPTION_ID", "subscription_id"),
            (&self.resource_group, "resource group", "AZURE_RESOURCE_GROUP", "resource_group"),
            (&self.access_token, "access token", "AZURE_ACCESS_TOKEN", "access_token"),
            (&self.template_file, "template file", "AZURE_TEMPLATE_FILE", "template_file"),
            (&self.size, "VM size", "AZURE_SIZE", "size"),
            (&self.image_publisher, "image publisher", "AZURE_IMAGE_PUBLISHER", "image_publisher"),
            (&self.image_offer, "image offer", "AZURE_IMAGE_OFFER", "image_offer"),
            (&self.image_sku, "image SKU", "AZURE_IMAGE_SKU", "image_sku"),
            (&self.virtual_network, "virtual network", "AZURE_VIRTUAL_NETWORK", "virtual_network"),
            (&self.subnet, "subnet", "AZURE_SUBNET", "subnet"),
            (&self.admin_user, "admin user", "AZURE_ADMIN_USER", "admin_user"),
            (
                &self.ssh_public_key_file,
                "SSH public key file",
                "AZURE_SSH_PUBLIC_KEY_FILE",
                "ssh_public_key_file",
            ),
        ];
        for (value, description, env_var, key) in required {
            FieldMetadata::new(description, env_var, key, AZURE_FILE).require(value)?;
        }
        Ok(())
    }

    /// Builds the adapter spec, reading the template and public key files.
    ///
    /// The admin user replaces the SSH user so the session logs in as the
    /// account the template creates.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails, a file cannot be read,
    /// or the template is not JSON.
    pub fn spec(&self, name: &str, ssh: &SshConfig) -> Result<AzureSpec, ConfigError> {
        self.validate()?;
        let template_field =
            FieldMetadata::new("template file", "AZURE_TEMPLATE_FILE", "template_file", AZURE_FILE);
        let raw_template = read_file(&self.template_file, &template_field)?;
        let template: Value =
            serde_json::from_str(&raw_template).map_err(|err| ConfigError::FileRead {
                field: template_field.toml_key,
                path: self.template_file.clone(),
                message: err.to_string(),
            })?;
        let key_field = FieldMetadata::new(
            "SSH public key file",
            "AZURE_SSH_PUBLIC_KEY_FILE",
            "ssh_public_key_file",
            AZURE_FILE,
        );
        let ssh_public_key = read_file(&self.ssh_public_key_file, &key_field)?;
        let mut credentials = ssh.credentials()?;
        credentials.user = self.admin_user.trim().to_owned();
        Ok(AzureSpec {
            name: name.to_owned(),
            location: self.location.clone().filter(|location| !location.trim().is_empty()),
            size: self.size.trim().to_owned(),
            image_publisher: self.image_publisher.trim().to_owned(),
            image_offer: self.image_offer.trim().to_owned(),
            image_sku: self.image_sku.trim().to_owned(),
            image_version: self.image_version.trim().to_owned(),
            virtual_network: self.virtual_network.trim().to_owned(),
            subnet: self.subnet.trim().to_owned(),
            template,
            ssh_public_key: ssh_public_key.trim().to_owned(),
            credentials,
        })
    }
}

/// Local hypervisor settings.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "VMRUN",
    discovery(
        app_name = "vmdrive",
        env_var = "VMDRIVE_VMRUN_CONFIG",
        config_file_name = "vmrun.toml",
        dotfile_name = ".vmdrive-vmrun.toml",
        project_file_name = "vmdrive-vmrun.toml"
    )
)]
pub struct VmrunConfig {
    /// Path to the `vmrun` executable.
    #[ortho_config(default = "vmrun".to_owned())]
    pub vmrun_bin: String,
    /// VMX file of the VM to clone.
    pub source_vmx: String,
    /// Directory the clone is written to.
    pub destination_dir: String,
    /// Open the hypervisor window when starting.
    #[ortho_config(default = false)]
    pub gui: bool,
}

const VMRUN_FILE: &str = "vmdrive-vmrun.toml";

impl VmrunConfig {
    /// Loads configuration from defaults, files, and the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter(program_args())
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the first missing value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        FieldMetadata::new("vmrun executable", "VMRUN_VMRUN_BIN", "vmrun_bin", VMRUN_FILE)
            .require(&self.vmrun_bin)?;
        FieldMetadata::new("source VMX", "VMRUN_SOURCE_VMX", "source_vmx", VMRUN_FILE)
            .require(&self.source_vmx)?;
        FieldMetadata::new(
            "destination directory",
            "VMRUN_DESTINATION_DIR",
            "destination_dir",
            VMRUN_FILE,
        )
        .require(&self.destination_dir)
    }

    /// Runner invoking the configured executable.
    #[must_use]
    pub fn runner(&self) -> VmrunProcess {
        VmrunProcess::new(self.vmrun_bin.trim())
    }

    /// Builds the adapter spec. Source NICs are kept as they are.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn spec(&self, name: &str, ssh: &SshConfig) -> Result<VmrunSpec, ConfigError> {
        self.validate()?;
        Ok(VmrunSpec {
            name: name.to_owned(),
            source_vmx: Utf8PathBuf::from(expand_tilde(self.source_vmx.trim())),
            destination: Utf8PathBuf::from(expand_tilde(self.destination_dir.trim())),
            nics: Vec::new(),
            gui: self.gui,
            credentials: ssh.credentials()?,
        })
    }
}

/// SSH client settings shared by every backend.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "VMDRIVE_SSH",
    discovery(
        app_name = "vmdrive",
        env_var = "VMDRIVE_CONFIG_PATH",
        config_file_name = "vmdrive.toml",
        dotfile_name = ".vmdrive.toml",
        project_file_name = "vmdrive.toml"
    )
)]
pub struct SshConfig {
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Remote user to connect as.
    #[ortho_config(default = "ubuntu".to_owned())]
    pub user: String,
    /// Private key used for authentication. Supports `~/` expansion.
    #[ortho_config(default = DEFAULT_IDENTITY_FILE.to_owned())]
    pub identity_file: String,
    /// Force batch mode so ssh never prompts.
    #[ortho_config(default = true)]
    pub batch_mode: bool,
    /// Enforce host key checking; off by default for ephemeral hosts.
    #[ortho_config(default = false)]
    pub strict_host_key_checking: bool,
    /// Known hosts file override.
    #[ortho_config(default = "/dev/null".to_owned())]
    pub known_hosts_file: String,
    /// Port override.
    pub port: Option<u16>,
}

const SSH_FILE: &str = "vmdrive.toml";
const DEFAULT_IDENTITY_FILE: &str = "~/.ssh/id_rsa";

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            ssh_bin: String::from("ssh"),
            user: String::from("ubuntu"),
            identity_file: DEFAULT_IDENTITY_FILE.to_owned(),
            batch_mode: true,
            strict_host_key_checking: false,
            known_hosts_file: String::from("/dev/null"),
            port: None,
        }
    }
}

impl SshConfig {
    /// Loads configuration from defaults, files, and the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter(program_args())
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the first missing value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        FieldMetadata::new("ssh executable", "VMDRIVE_SSH_SSH_BIN", "ssh_bin", SSH_FILE)
            .require(&self.ssh_bin)?;
        FieldMetadata::new("ssh user", "VMDRIVE_SSH_USER", "user", SSH_FILE).require(&self.user)?;
        FieldMetadata::new(
            "identity file",
            "VMDRIVE_SSH_IDENTITY_FILE",
            "identity_file",
            SSH_FILE,
        )
        .require(&self.identity_file)?;
        FieldMetadata::new(
            "known hosts file",
            "VMDRIVE_SSH_KNOWN_HOSTS_FILE",
            "known_hosts_file",
            SSH_FILE,
        )
        .require(&self.known_hosts_file)
    }

    /// Login material for the remote session.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when validation fails.
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        self.validate()?;
        Ok(Credentials {
            user: self.user.trim().to_owned(),
            password: None,
            private_key: Some(Utf8PathBuf::from(self.identity_file.trim())),
        })
    }

    /// Settings for [`crate::remote::SystemSsh`].
    #[must_use]
    pub fn settings(&self) -> SshSettings {
        SshSettings {
            ssh_bin: self.ssh_bin.trim().to_owned(),
            batch_mode: self.batch_mode,
            strict_host_key_checking: self.strict_host_key_checking,
            known_hosts_file: self.known_hosts_file.trim().to_owned(),
            ..SshSettings::default()
        }
    }

    /// Per-call options passed to [`crate::VirtualMachine::ssh`].
    #[must_use]
    pub fn options(&self) -> SshOptions {
        SshOptions {
            use_private_ip: false,
            port: self.port,
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// A required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// A file named by the configuration could not be used.
    #[error("cannot use {field} {path}: {message}")]
    FileRead {
        /// Configuration key naming the file.
        field: &'static str,
        /// Path after `~/` expansion.
        path: String,
        /// Underlying failure.
        message: String,
    },
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}
