//! Test support utilities shared across unit and integration tests.
//!
//! Every backend API trait has a scripted fake here. Fakes keep their state
//! behind `Arc<Mutex<_>>`, so clones observe the same calls, and record each
//! invocation by name so tests can assert on order or on the absence of
//! backend traffic.

mod azure;
mod exoscale;
mod gce;
mod openstack;
mod vmrun;

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::env;
use std::ffi::OsString;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

pub use azure::FakeAzure;
pub use exoscale::FakeExoscale;
pub use gce::FakeGce;
pub use openstack::FakeOpenStack;
pub use vmrun::ScriptedHypervisor;

use crate::error::{ApiError, ApiFuture, VmError};
use crate::remote::{Credentials, RemoteAccess, RemoteCommandOutput, RemoteSession, SshOptions};
use crate::vm::VmFuture;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn ready<'a, T: Send + 'a>(result: Result<T, ApiError>) -> ApiFuture<'a, T> {
    Box::pin(std::future::ready(result))
}

/// Ordered record of backend calls.
#[derive(Clone, Debug, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    /// Records a call.
    pub fn record(&self, call: impl Into<String>) {
        lock(&self.calls).push(call.into());
    }

    /// Returns every call recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    /// Returns how many calls were recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Returns `true` when nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.calls).is_empty()
    }

    /// Returns the position of the first call starting with `prefix`.
    #[must_use]
    pub fn position(&self, prefix: &str) -> Option<usize> {
        lock(&self.calls)
            .iter()
            .position(|call| call.starts_with(prefix))
    }
}

/// FIFO of scripted values that keeps repeating the last one once drained.
#[derive(Clone, Debug)]
pub struct Sticky<T> {
    queue: VecDeque<T>,
    last: Option<T>,
}

impl<T> Default for Sticky<T> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            last: None,
        }
    }
}

impl<T: Clone> Sticky<T> {
    /// Queues values.
    pub fn extend(&mut self, values: impl IntoIterator<Item = T>) {
        self.queue.extend(values);
    }

    /// Replaces the script with a single repeating value.
    pub fn set(&mut self, value: T) {
        self.queue.clear();
        self.last = Some(value);
    }

    /// Returns `true` while scripted values remain unconsumed.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Pops the next value, or repeats the last one.
    pub fn next_value(&mut self) -> Option<T> {
        if let Some(value) = self.queue.pop_front() {
            self.last = Some(value.clone());
            return Some(value);
        }
        self.last.clone()
    }
}

/// One-shot failures keyed by operation name.
#[derive(Clone, Debug, Default)]
pub struct FailurePlan {
    failures: HashMap<String, VecDeque<ApiError>>,
}

impl FailurePlan {
    /// Makes the next call to `operation` fail with `error`.
    pub fn push(&mut self, operation: &str, error: ApiError) {
        self.failures
            .entry(operation.to_owned())
            .or_default()
            .push_back(error);
    }

    /// Takes the pending failure for `operation`, if any.
    pub fn take(&mut self, operation: &str) -> Option<ApiError> {
        self.failures
            .get_mut(operation)
            .and_then(VecDeque::pop_front)
    }
}

#[derive(Debug, Default)]
struct RemoteState {
    connections: Vec<SocketAddr>,
    commands: Vec<String>,
    outputs: VecDeque<RemoteCommandOutput>,
    unreachable: bool,
}

/// Remote access double that records connections and scripted commands.
#[derive(Clone, Debug, Default)]
pub struct RecordingRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl RecordingRemote {
    /// Creates a double whose sessions are immediately reachable.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a double whose sessions never become reachable.
    #[must_use]
    pub fn unreachable() -> Self {
        let remote = Self::default();
        lock(&remote.state).unreachable = true;
        remote
    }

    /// Queues the output of the next remote command.
    pub fn push_output(&self, exit_code: i32, stdout: &str) {
        lock(&self.state).outputs.push_back(RemoteCommandOutput {
            exit_code: Some(exit_code),
            stdout: stdout.to_owned(),
            stderr: String::new(),
        });
    }

    /// Addresses connected to so far.
    #[must_use]
    pub fn connections(&self) -> Vec<SocketAddr> {
        lock(&self.state).connections.clone()
    }

    /// Commands run so far.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        lock(&self.state).commands.clone()
    }
}

impl RemoteAccess for RecordingRemote {
    fn connect(
        &self,
        address: SocketAddr,
        _credentials: &Credentials,
        _options: &SshOptions,
    ) -> Result<Box<dyn RemoteSession>, VmError> {
        lock(&self.state).connections.push(address);
        Ok(Box::new(ScriptedSession {
            address,
            state: Arc::clone(&self.state),
        }))
    }
}

/// Session handed out by [`RecordingRemote`].
#[derive(Debug)]
pub struct ScriptedSession {
    address: SocketAddr,
    state: Arc<Mutex<RemoteState>>,
}

impl RemoteSession for ScriptedSession {
    fn address(&self) -> SocketAddr {
        self.address
    }

    fn wait_reachable(&self, _timeout: Duration) -> VmFuture<'_, ()> {
        let unreachable = lock(&self.state).unreachable;
        let address = self.address;
        Box::pin(async move {
            if unreachable {
                Err(VmError::Timeout {
                    action: String::from("reach ssh on"),
                    resource: address.to_string(),
                    last_observed: String::from("unreachable"),
                })
            } else {
                Ok(())
            }
        })
    }

    fn run(&self, command: &str) -> VmFuture<'_, RemoteCommandOutput> {
        let output = {
            let mut state = lock(&self.state);
            state.commands.push(command.to_owned());
            state.outputs.pop_front().unwrap_or(RemoteCommandOutput {
                exit_code: Some(0),
                stdout: String::new(),
                stderr: String::new(),
            })
        };
        Box::pin(async move { Ok(output) })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets and clears environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, Option<&str>)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe {
                match value {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
