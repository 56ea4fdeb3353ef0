//! Bounded polling shared by every adapter.
//!
//! [`poll_until`] repeatedly awaits a probe until its value satisfies a
//! terminal predicate, a fatal predicate, or the deadline passes. It never
//! spawns work; one call drives one logical wait.

use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;

use tokio::time::{Instant, sleep};

use crate::error::{ApiError, VmError};
use crate::vm::VmState;

/// Interval and deadline for one poll loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollPolicy {
    /// Delay between consecutive probes.
    pub interval: Duration,
    /// Upper bound on the whole loop.
    pub timeout: Duration,
}

impl PollPolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// Reasons a poll loop stopped without reaching a terminal value.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PollError<T, E> {
    /// The probe itself failed.
    Probe(E),
    /// The probe returned a value classified as fatal.
    Fatal(T),
    /// The deadline passed; carries the last observed value.
    Timeout {
        /// Last value returned by the probe.
        last: T,
    },
}

/// Renders a probe observation for diagnostics.
pub trait Observation {
    /// Short, human-readable description.
    fn describe(&self) -> String;
}

impl Observation for VmState {
    fn describe(&self) -> String {
        self.to_string()
    }
}

impl Observation for String {
    fn describe(&self) -> String {
        self.clone()
    }
}

impl Observation for bool {
    fn describe(&self) -> String {
        if *self {
            String::from("reachable")
        } else {
            String::from("unreachable")
        }
    }
}

impl Observation for IpAddr {
    fn describe(&self) -> String {
        self.to_string()
    }
}

impl<T: Observation> Observation for Option<T> {
    fn describe(&self) -> String {
        self.as_ref()
            .map_or_else(|| String::from("absent"), Observation::describe)
    }
}

impl<T: Observation> PollError<T, ApiError> {
    /// Converts the poll failure into a lifecycle error naming the action and
    /// resource that were awaited.
    #[must_use]
    pub fn into_vm_error(self, action: &str, resource: &str) -> VmError {
        match self {
            Self::Probe(source) => VmError::api(action, resource, source),
            Self::Fatal(observed) => VmError::Failed {
                action: action.to_owned(),
                resource: resource.to_owned(),
                state: observed.describe(),
            },
            Self::Timeout { last } => VmError::Timeout {
                action: action.to_owned(),
                resource: resource.to_owned(),
                last_observed: last.describe(),
            },
        }
    }
}

/// Polls `probe` until `is_terminal` accepts its value.
///
/// The terminal predicate is consulted before the fatal one, so a value both
/// accept counts as success. After every non-terminal value the loop checks
/// the deadline and then sleeps for the interval, clamped to the remaining
/// time so the final probe happens at the deadline.
///
/// # Errors
///
/// Returns [`PollError::Probe`] when the probe fails, [`PollError::Fatal`]
/// when `is_fatal` accepts a value, and [`PollError::Timeout`] with the last
/// value once the deadline passes.
pub async fn poll_until<T, E, P, Fut, D, F>(
    policy: PollPolicy,
    mut probe: P,
    is_terminal: D,
    is_fatal: F,
) -> Result<T, PollError<T, E>>
where
    P: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    D: Fn(&T) -> bool,
    F: Fn(&T) -> bool,
{
    let deadline = Instant::now() + policy.timeout;
    loop {
        let observed = probe().await.map_err(PollError::Probe)?;
        if is_terminal(&observed) {
            return Ok(observed);
        }
        if is_fatal(&observed) {
            return Err(PollError::Fatal(observed));
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(PollError::Timeout { last: observed });
        }
        sleep(policy.interval.min(deadline - now)).await;
    }
}

/// Polls a canonical state probe until it reports `target`, treating
/// [`VmState::Error`] as fatal.
///
/// # Errors
///
/// Returns the same failures as [`poll_until`].
pub async fn poll_state<P, Fut>(
    policy: PollPolicy,
    probe: P,
    target: VmState,
) -> Result<VmState, PollError<VmState, ApiError>>
where
    P: FnMut() -> Fut,
    Fut: Future<Output = Result<VmState, ApiError>>,
{
    poll_until(
        policy,
        probe,
        |state| *state == target,
        |state| state.is_error(),
    )
    .await
}
