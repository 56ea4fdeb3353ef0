//! Uniform lifecycle control for short-lived virtual machines.
//!
//! Every backend adapter implements [`VirtualMachine`]: provision, power
//! control, state and address queries, SSH access, and idempotent teardown.
//! Adapters for OpenStack, Azure Resource Manager, Google Compute Engine,
//! Exoscale, and the local `vmrun` hypervisor share one polling primitive and
//! one error taxonomy, so callers can hold a `Box<dyn VirtualMachine>` and
//! stay backend-agnostic. [`RunOrchestrator`] builds the common
//! provision → run → destroy flow on top.

pub mod azure;
pub mod config;
pub mod error;
pub mod exoscale;
pub mod gce;
mod http;
pub mod logging;
pub mod mock;
pub mod openstack;
pub mod remote;
pub mod run;
pub mod session;
pub mod test_support;
pub mod vm;
pub mod vmrun;
pub mod wait;

pub use error::{ApiError, ApiFuture, ErrorKind, VmError};
pub use http::{StaticToken, TokenSource};
pub use mock::MockVm;
pub use remote::{
    Credentials, RemoteAccess, RemoteCommandOutput, RemoteSession, SshOptions, SystemSsh,
};
pub use run::{RunError, RunOrchestrator};
pub use session::SessionCache;
pub use vm::{InstanceSlot, IpSlots, PRIVATE_IP, PUBLIC_IP, VirtualMachine, VmFuture, VmState};
pub use wait::{PollError, PollPolicy, poll_state, poll_until};
