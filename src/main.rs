//! Binary entry point for the `vmdrive` CLI.

use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use clap::Parser;
use shell_escape::unix::escape;
use thiserror::Error;
use tracing::info;

use vmdrive::azure::{AzureClient, AzureTarget, AzureVm};
use vmdrive::config::{AzureConfig, ConfigError, GceConfig, OpenStackConfig, SshConfig, VmrunConfig};
use vmdrive::gce::{GceClient, GceVm};
use vmdrive::openstack::{OpenStackClient, OpenStackVm};
use vmdrive::remote::{RemoteAccess, SshOptions, SystemSsh};
use vmdrive::vmrun::VmrunVm;
use vmdrive::{RunError, RunOrchestrator, StaticToken, VirtualMachine, logging};

mod cli;

use cli::{BackendKind, Cli, RunCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("remote command terminated without an exit status")]
    MissingExitCode,
    #[error("remote run failed: {0}")]
    Run(#[from] RunError),
    #[error("invalid command argument: {0}")]
    InvalidCommand(String),
}

#[tokio::main]
async fn main() {
    logging::init();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    match cli {
        Cli::Run(command) => run_command(command).await,
    }
}

async fn run_command(args: RunCommand) -> Result<i32, CliError> {
    validate_command_args(&args.command)?;
    let ssh = SshConfig::load_without_cli_args()?;
    let name = args.name.clone().unwrap_or_default();
    let vm = build_vm(args.backend, &name, &ssh)?;
    info!(backend = ?args.backend, vm = %vm.name(), "starting remote run");

    let options = SshOptions {
        use_private_ip: args.private_ip,
        ..ssh.options()
    };
    let mut orchestrator = RunOrchestrator::new(vm)
        .with_ssh_options(options)
        .keep_on_success(args.keep);
    let remote_command = render_remote_command(&args.command);
    let output = orchestrator.execute(&remote_command).await?;

    io::stdout().write_all(output.stdout.as_bytes()).ok();
    io::stderr().write_all(output.stderr.as_bytes()).ok();
    output.exit_code.ok_or(CliError::MissingExitCode)
}

fn build_vm(
    backend: BackendKind,
    name: &str,
    ssh: &SshConfig,
) -> Result<Box<dyn VirtualMachine>, CliError> {
    let remote: Arc<dyn RemoteAccess> = Arc::new(SystemSsh::new(ssh.settings()));
    let vm: Box<dyn VirtualMachine> = match backend {
        BackendKind::Openstack => {
            let config = OpenStackConfig::load_without_cli_args()?;
            let spec = config.spec(name, ssh)?;
            let client = OpenStackClient::new(config.credentials());
            Box::new(OpenStackVm::new(spec, Arc::new(client), remote))
        }
        BackendKind::Gce => {
            let config = GceConfig::load_without_cli_args()?;
            let spec = config.spec(name, ssh)?;
            let tokens = Arc::new(StaticToken::new(config.access_token.trim()));
            let client = GceClient::new(config.project.trim(), tokens);
            Box::new(GceVm::new(spec, Arc::new(client), remote))
        }
        BackendKind::Azure => {
            let config = AzureConfig::load_without_cli_args()?;
            let spec = config.spec(name, ssh)?;
            let target = AzureTarget {
                subscription_id: config.subscription_id.trim().to_owned(),
                resource_group: config.resource_group.trim().to_owned(),
            };
            let tokens = Arc::new(StaticToken::new(config.access_token.trim()));
            Box::new(AzureVm::new(
                spec,
                Arc::new(AzureClient::new(target, tokens)),
                remote,
            ))
        }
        BackendKind::Vmrun => {
            let config = VmrunConfig::load_without_cli_args()?;
            let spec = config.spec(name, ssh)?;
            Box::new(VmrunVm::new(spec, Arc::new(config.runner()), remote))
        }
    };
    Ok(vm)
}

fn render_remote_command(args: &[String]) -> String {
    args.iter()
        .map(|arg| escape(arg.as_str().into()).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

fn validate_command_args(args: &[String]) -> Result<(), CliError> {
    let has_control = args.iter().any(|arg| {
        arg.chars()
            .any(|ch| matches!(ch, '\u{0000}'..='\u{001F}' | '\u{007F}'))
    });
    if has_control {
        return Err(CliError::InvalidCommand(String::from(concat!(
            "command arguments must not contain control characters (ASCII ",
            "0x00-0x1F or 0x7F, e.g. newline, carriage return, tab, NUL)"
        ))));
    }
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        writeln!(target, "  caused by: {cause}").ok();
        source = cause.source();
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use vmdrive::VmError;
    use vmdrive::test_support::EnvGuard;

    use super::*;

    #[rstest]
    #[case("echo\tbad")]
    #[case("line\nbreak")]
    #[case("bell\u{7}")]
    fn validate_command_args_rejects_control_characters(#[case] arg: &str) {
        let err = validate_command_args(&[arg.to_owned()]).expect_err("should be rejected");

        assert!(
            matches!(err, CliError::InvalidCommand(ref message) if message.contains("control characters")),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn validate_command_args_accepts_safe_arguments() {
        assert!(validate_command_args(&[String::from("echo"), String::from("ok")]).is_ok());
    }

    #[test]
    fn render_remote_command_escapes_arguments() {
        let args = vec![
            String::from("echo"),
            String::from("a b"),
            String::from("c'd"),
        ];

        assert_eq!(render_remote_command(&args), "echo 'a b' 'c'\\''d'");
    }

    #[test]
    fn write_error_includes_the_cause_chain() {
        let mut buf = Vec::new();
        let err = CliError::Run(RunError::Teardown(VmError::missing("image reference")));

        write_error(&mut buf, &err);

        let rendered = String::from_utf8(buf).unwrap_or_else(|err| panic!("utf8: {err}"));
        assert!(rendered.contains("remote run failed"), "rendered: {rendered}");
        assert!(
            rendered.contains("caused by: image reference required"),
            "rendered: {rendered}"
        );
    }

    #[tokio::test]
    async fn vmrun_backend_is_built_from_the_environment() {
        let _guard = EnvGuard::set_vars(&[
            ("VMRUN_SOURCE_VMX", Some("/vms/base/ubuntu.vmx")),
            ("VMRUN_DESTINATION_DIR", Some("/tmp/vmdrive-clone")),
        ])
        .await;

        let vm = build_vm(BackendKind::Vmrun, "ci", &SshConfig::default())
            .unwrap_or_else(|err| panic!("build: {err}"));

        assert_eq!(vm.name(), "ci");
    }
}
