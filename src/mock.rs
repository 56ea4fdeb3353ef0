//! Closure-backed [`VirtualMachine`] for callers that test their own code.
//!
//! Each operation runs the closure registered for it. Operations without a
//! closure return [`VmError::Unsupported`].
//!
//! ```
//! use vmdrive::{MockVm, VirtualMachine, VmState};
//!
//! let vm = MockVm::new("fixture").on_state(|| Ok(VmState::Running));
//! let runtime = tokio::runtime::Builder::new_current_thread()
//!     .build()
//!     .unwrap_or_else(|err| panic!("runtime: {err}"));
//! assert_eq!(runtime.block_on(vm.state()).ok(), Some(VmState::Running));
//! ```

use std::fmt;

use crate::error::VmError;
use crate::remote::{RemoteSession, SshOptions};
use crate::vm::{IpSlots, VirtualMachine, VmFuture, VmState};

const BACKEND: &str = "mock";

type Action = Box<dyn Fn() -> Result<(), VmError> + Send + Sync>;
type StateFn = Box<dyn Fn() -> Result<VmState, VmError> + Send + Sync>;
type IpsFn = Box<dyn Fn() -> Result<IpSlots, VmError> + Send + Sync>;
type SshFn = Box<dyn Fn(SshOptions) -> Result<Box<dyn RemoteSession>, VmError> + Send + Sync>;

/// [`VirtualMachine`] whose behaviour is supplied by closures.
#[derive(Default)]
pub struct MockVm {
    name: String,
    provision: Option<Action>,
    start: Option<Action>,
    halt: Option<Action>,
    suspend: Option<Action>,
    resume: Option<Action>,
    destroy: Option<Action>,
    state: Option<StateFn>,
    ips: Option<IpsFn>,
    ssh: Option<SshFn>,
}

impl fmt::Debug for MockVm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockVm")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

fn unsupported<T>(operation: &'static str) -> Result<T, VmError> {
    Err(VmError::Unsupported {
        operation,
        backend: BACKEND,
    })
}

fn run_action(action: Option<&Action>, operation: &'static str) -> Result<(), VmError> {
    action.map_or_else(|| unsupported(operation), |callback| callback())
}

impl MockVm {
    /// Creates a mock where every operation is unsupported.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the `provision` behaviour.
    #[must_use]
    pub fn on_provision(
        mut self,
        callback: impl Fn() -> Result<(), VmError> + Send + Sync + 'static,
    ) -> Self {
        self.provision = Some(Box::new(callback));
        self
    }

    /// Sets the `start` behaviour.
    #[must_use]
    pub fn on_start(
        mut self,
        callback: impl Fn() -> Result<(), VmError> + Send + Sync + 'static,
    ) -> Self {
        self.start = Some(Box::new(callback));
        self
    }

    /// Sets the `halt` behaviour.
    #[must_use]
    pub fn on_halt(
        mut self,
        callback: impl Fn() -> Result<(), VmError> + Send + Sync + 'static,
    ) -> Self {
        self.halt = Some(Box::new(callback));
        self
    }

    /// Sets the `suspend` behaviour.
    #[must_use]
    pub fn on_suspend(
        mut self,
        callback: impl Fn() -> Result<(), VmError> + Send + Sync + 'static,
    ) -> Self {
        self.suspend = Some(Box::new(callback));
        self
    }

    /// Sets the `resume` behaviour.
    #[must_use]
    pub fn on_resume(
        mut self,
        callback: impl Fn() -> Result<(), VmError> + Send + Sync + 'static,
    ) -> Self {
        self.resume = Some(Box::new(callback));
        self
    }

    /// Sets the `destroy` behaviour.
    #[must_use]
    pub fn on_destroy(
        mut self,
        callback: impl Fn() -> Result<(), VmError> + Send + Sync + 'static,
    ) -> Self {
        self.destroy = Some(Box::new(callback));
        self
    }

    /// Sets the `state` behaviour.
    #[must_use]
    pub fn on_state(
        mut self,
        callback: impl Fn() -> Result<VmState, VmError> + Send + Sync + 'static,
    ) -> Self {
        self.state = Some(Box::new(callback));
        self
    }

    /// Sets the `ips` behaviour.
    #[must_use]
    pub fn on_ips(
        mut self,
        callback: impl Fn() -> Result<IpSlots, VmError> + Send + Sync + 'static,
    ) -> Self {
        self.ips = Some(Box::new(callback));
        self
    }

    /// Sets the `ssh` behaviour.
    #[must_use]
    pub fn on_ssh(
        mut self,
        callback: impl Fn(SshOptions) -> Result<Box<dyn RemoteSession>, VmError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.ssh = Some(Box::new(callback));
        self
    }
}

impl VirtualMachine for MockVm {
    fn name(&self) -> &str {
        &self.name
    }

    fn provision(&mut self) -> VmFuture<'_, ()> {
        let result = run_action(self.provision.as_ref(), "provision");
        Box::pin(async move { result })
    }

    fn start(&self) -> VmFuture<'_, ()> {
        let result = run_action(self.start.as_ref(), "start");
        Box::pin(async move { result })
    }

    fn halt(&self) -> VmFuture<'_, ()> {
        let result = run_action(self.halt.as_ref(), "halt");
        Box::pin(async move { result })
    }

    fn suspend(&self) -> VmFuture<'_, ()> {
        let result = run_action(self.suspend.as_ref(), "suspend");
        Box::pin(async move { result })
    }

    fn resume(&self) -> VmFuture<'_, ()> {
        let result = run_action(self.resume.as_ref(), "resume");
        Box::pin(async move { result })
    }

    fn state(&self) -> VmFuture<'_, VmState> {
        let result = self
            .state
            .as_ref()
            .map_or_else(|| unsupported("state"), |callback| callback());
        Box::pin(async move { result })
    }

    fn ips(&self) -> VmFuture<'_, IpSlots> {
        let result = self
            .ips
            .as_ref()
            .map_or_else(|| unsupported("ips"), |callback| callback());
        Box::pin(async move { result })
    }

    fn destroy(&mut self) -> VmFuture<'_, ()> {
        let result = run_action(self.destroy.as_ref(), "destroy");
        Box::pin(async move { result })
    }

    fn ssh(&self, options: SshOptions) -> VmFuture<'_, Box<dyn RemoteSession>> {
        let result = self
            .ssh
            .as_ref()
            .map_or_else(|| unsupported("ssh"), |callback| callback(options));
        Box::pin(async move { result })
    }
}
