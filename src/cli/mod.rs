//! Command-line interface definitions for the `vmdrive` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Parser, ValueEnum};

/// Top-level CLI for the `vmdrive` binary.
#[derive(Debug, Parser)]
#[command(
    name = "vmdrive",
    about = "Provision a throwaway VM on any supported backend and run a command on it",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Provision a VM, run a command over SSH, and destroy the VM.
    #[command(name = "run", about = "Provision a VM, run a command over SSH, and destroy it")]
    Run(RunCommand),
}

/// Backends selectable from the command line.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum BackendKind {
    /// OpenStack, configured through the `OS_*` variables.
    Openstack,
    /// Google Compute Engine, configured through the `GCE_*` variables.
    Gce,
    /// Azure Resource Manager, configured through the `AZURE_*` variables.
    Azure,
    /// Local hypervisor driven by `vmrun`, configured through `VMRUN_*`.
    Vmrun,
}

/// Arguments for the `vmdrive run` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct RunCommand {
    /// Backend that provisions the VM.
    #[arg(long, value_enum, env = "VMDRIVE_BACKEND")]
    pub(crate) backend: BackendKind,
    /// Name of the VM; a unique name is generated when omitted.
    #[arg(long, value_name = "NAME")]
    pub(crate) name: Option<String>,
    /// Keep the VM after a successful run instead of destroying it.
    #[arg(long)]
    pub(crate) keep: bool,
    /// Connect through the private address instead of the public one.
    #[arg(long)]
    pub(crate) private_ip: bool,
    /// Command to execute on the remote host (use -- to separate flags).
    #[arg(required = true, trailing_var_arg = true)]
    pub(crate) command: Vec<String>,
}
