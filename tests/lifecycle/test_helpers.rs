//! Shared fixtures for lifecycle BDD scenarios.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rstest::fixture;
use thiserror::Error;
use tokio::runtime::{Builder, Runtime};
use vmdrive::exoscale::{ExoscaleSpec, ExoscaleTimeouts, ExoscaleVm};
use vmdrive::openstack::{OpenStackSpec, OpenStackTimeouts, OpenStackVm};
use vmdrive::test_support::{FakeExoscale, FakeOpenStack, RecordingRemote};
use vmdrive::{
    Credentials, IpSlots, PollPolicy, RemoteCommandOutput, RunError, VirtualMachine, VmError,
};

/// Interval every scenario VM polls at.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum LifecycleTestError {
    #[error("no VM has been configured for this scenario")]
    NoVm,
    #[error("failed to build runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

#[derive(Default)]
pub struct LifecycleState {
    pub vm: Option<Box<dyn VirtualMachine>>,
    pub outcome: Option<Result<(), VmError>>,
    pub ips: Option<IpSlots>,
    pub elapsed: Option<Duration>,
    pub probes: Option<usize>,
    pub run: Option<Result<RemoteCommandOutput, RunError>>,
}

/// Scenario world. Clones share the same state, so steps can take it by
/// reference and still record results for later steps.
#[derive(Clone)]
pub struct LifecycleContext {
    pub openstack: FakeOpenStack,
    pub exoscale: FakeExoscale,
    pub remote: RecordingRemote,
    state: Arc<Mutex<LifecycleState>>,
}

impl LifecycleContext {
    pub fn state(&self) -> MutexGuard<'_, LifecycleState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn install(&self, vm: impl VirtualMachine + 'static) {
        self.state().vm = Some(Box::new(vm));
    }

    pub fn take_vm(&self) -> Result<Box<dyn VirtualMachine>, LifecycleTestError> {
        self.state().vm.take().ok_or(LifecycleTestError::NoVm)
    }

    /// Lends the installed VM to `action` together with a paused-clock
    /// runtime, then puts it back.
    pub fn with_vm<T>(
        &self,
        action: impl FnOnce(&mut Box<dyn VirtualMachine>, &Runtime) -> T,
    ) -> Result<T, LifecycleTestError> {
        let mut vm = self.take_vm()?;
        let runtime = paused_runtime()?;
        let result = action(&mut vm, &runtime);
        self.state().vm = Some(vm);
        Ok(result)
    }

    pub fn record(&self, outcome: Result<(), VmError>) {
        self.state().outcome = Some(outcome);
    }
}

pub fn paused_runtime() -> Result<Runtime, LifecycleTestError> {
    Ok(Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()?)
}

pub fn openstack_spec(image_name: &str) -> OpenStackSpec {
    OpenStackSpec {
        name: String::from("build-box"),
        flavor_name: String::from("m1.small"),
        image_name: image_name.to_owned(),
        networks: vec![String::from("net-1")],
        floating_ip_pool: String::from("public"),
        credentials: Credentials::with_key("ubuntu", "~/.ssh/id_ed25519"),
        ..OpenStackSpec::default()
    }
}

pub fn openstack_vm(context: &LifecycleContext, spec: OpenStackSpec) -> OpenStackVm {
    OpenStackVm::new(
        spec,
        Arc::new(context.openstack.clone()),
        Arc::new(context.remote.clone()),
    )
    .with_timeouts(OpenStackTimeouts {
        action: PollPolicy::new(POLL_INTERVAL, Duration::from_secs(30)),
        ssh: Duration::from_secs(30),
    })
}

pub fn exoscale_vm(context: &LifecycleContext) -> ExoscaleVm {
    let spec = ExoscaleSpec {
        name: String::from("ci-exo"),
        template_name: String::from("Linux Ubuntu 22.04 LTS 64-bit"),
        storage_gb: 10,
        service_offering: String::from("Medium"),
        zone: String::from("ch-gva-2"),
        security_groups: vec![String::from("default")],
        credentials: Credentials::with_key("ubuntu", "~/.ssh/id_ed25519"),
        ..ExoscaleSpec::default()
    };
    ExoscaleVm::new(
        spec,
        Arc::new(context.exoscale.clone()),
        Arc::new(context.remote.clone()),
    )
    .with_timeouts(ExoscaleTimeouts {
        action: PollPolicy::new(POLL_INTERVAL, Duration::from_secs(30)),
        ssh: Duration::from_secs(30),
    })
}

pub fn count_calls(calls: &[String], operation: &str) -> usize {
    calls
        .iter()
        .filter(|call| call.split_whitespace().next() == Some(operation))
        .count()
}

#[fixture]
pub fn lifecycle_context() -> LifecycleContext {
    LifecycleContext {
        openstack: FakeOpenStack::new(),
        exoscale: FakeExoscale::new(),
        remote: RecordingRemote::new(),
        state: Arc::new(Mutex::new(LifecycleState::default())),
    }
}
