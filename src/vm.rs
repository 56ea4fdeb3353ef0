//! Uniform lifecycle contract implemented by every backend adapter.

use std::fmt;
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::VmError;
use crate::remote::{RemoteSession, SshOptions};

/// Boxed future returned by [`VirtualMachine`] operations.
pub type VmFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, VmError>> + Send + 'a>>;

/// Index of the public address in [`IpSlots::to_array`].
pub const PUBLIC_IP: usize = 0;
/// Index of the private address in [`IpSlots::to_array`].
pub const PRIVATE_IP: usize = 1;

/// Canonical lifecycle state shared by all backends.
///
/// Callers branch on the lowercase tokens produced by `Display` and serde.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VmState {
    /// The backend is booting the instance.
    Starting,
    /// The instance is up.
    Running,
    /// The instance is powered off.
    Halted,
    /// The instance memory is saved and execution paused.
    Suspended,
    /// A transition is in progress.
    Pending,
    /// The backend reports the instance failed.
    Error,
    /// The backend status was not recognised.
    Unknown,
}

impl VmState {
    /// Every canonical state.
    pub const ALL: [Self; 7] = [
        Self::Starting,
        Self::Running,
        Self::Halted,
        Self::Suspended,
        Self::Pending,
        Self::Error,
        Self::Unknown,
    ];

    /// Returns the lowercase token for this state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Halted => "halted",
            Self::Suspended => "suspended",
            Self::Pending => "pending",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }

    /// Returns `true` for the fatal [`VmState::Error`] state.
    #[must_use]
    pub const fn is_error(self) -> bool {
        matches!(self, Self::Error)
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VmState {
    type Err = VmError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == value)
            .ok_or_else(|| VmError::InvalidField {
                field: String::from("state"),
                reason: format!("`{value}` is not a lifecycle state"),
            })
    }
}

/// Addresses reported by [`VirtualMachine::ips`].
///
/// Slot 0 holds the public address and slot 1 the private one; `None` marks
/// an address class the VM does not have.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct IpSlots {
    /// Public or external address.
    pub public: Option<IpAddr>,
    /// Private or internal address.
    pub private: Option<IpAddr>,
}

impl IpSlots {
    /// Creates a slot pair.
    #[must_use]
    pub const fn new(public: Option<IpAddr>, private: Option<IpAddr>) -> Self {
        Self { public, private }
    }

    /// Returns the positional form `[public, private]`.
    #[must_use]
    pub const fn to_array(self) -> [Option<IpAddr>; 2] {
        [self.public, self.private]
    }

    /// Returns the address at `index`, or `None` when absent or out of range.
    #[must_use]
    pub fn get(self, index: usize) -> Option<IpAddr> {
        self.to_array().get(index).copied().flatten()
    }

    /// Returns `true` when neither slot holds an address.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.public.is_none() && self.private.is_none()
    }

    /// Picks the address used for remote access, falling back to the other
    /// slot when the preferred one is empty.
    #[must_use]
    pub const fn preferred(self, use_private: bool) -> Option<IpAddr> {
        let (first, second) = if use_private {
            (self.private, self.public)
        } else {
            (self.public, self.private)
        };
        match first {
            Some(ip) => Some(ip),
            None => second,
        }
    }
}

/// Backend identifier owned by an adapter.
///
/// The identifier is present exactly while a backend instance is believed to
/// exist. A slot cleared by a successful teardown remembers that, so a
/// repeated `destroy` can succeed while every other operation still fails
/// fast.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InstanceSlot {
    id: Option<String>,
    destroyed: bool,
}

impl InstanceSlot {
    /// Creates an empty slot.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            id: None,
            destroyed: false,
        }
    }

    /// Returns the identifier when one is held.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Returns `true` after a successful teardown.
    #[must_use]
    pub const fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Returns the identifier or the precondition error for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::NotProvisioned`] for a fresh slot and
    /// [`VmError::AlreadyDestroyed`] after teardown.
    pub fn require(&self, name: &str) -> Result<&str, VmError> {
        match (self.id.as_deref(), self.destroyed) {
            (Some(id), _) => Ok(id),
            (None, true) => Err(VmError::AlreadyDestroyed {
                name: name.to_owned(),
            }),
            (None, false) => Err(VmError::NotProvisioned {
                name: name.to_owned(),
            }),
        }
    }

    /// Returns the identifier a teardown should act on, or `None` when the
    /// instance was already destroyed.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::NotProvisioned`] for a slot that never held an id.
    pub fn teardown_target(&self, name: &str) -> Result<Option<String>, VmError> {
        match self.require(name) {
            Ok(id) => Ok(Some(id.to_owned())),
            Err(VmError::AlreadyDestroyed { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Fails when the slot already holds an identifier.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::AlreadyProvisioned`] naming the existing id.
    pub fn ensure_vacant(&self, name: &str) -> Result<(), VmError> {
        self.id.as_ref().map_or(Ok(()), |id| {
            Err(VmError::AlreadyProvisioned {
                name: name.to_owned(),
                id: id.clone(),
            })
        })
    }

    /// Records the identifier assigned by the backend.
    pub fn assign(&mut self, id: impl Into<String>) {
        self.id = Some(id.into());
        self.destroyed = false;
    }

    /// Forgets the identifier after a complete teardown.
    pub fn clear(&mut self) {
        self.id = None;
        self.destroyed = true;
    }
}

/// Generates the default VM name used when callers leave it empty.
#[must_use]
pub fn default_name() -> String {
    format!("vmdrive-{}", uuid::Uuid::new_v4())
}

/// Returns `name` unless it is blank, in which case a generated default.
#[must_use]
pub fn name_or_default(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        default_name()
    } else {
        trimmed.to_owned()
    }
}

/// Lifecycle operations every backend adapter provides.
///
/// Operations other than [`VirtualMachine::provision`] fail fast with a
/// precondition error, and make no backend call, while the VM has no
/// instance identifier. Backends without a suspend primitive return
/// [`VmError::Unsupported`] from `suspend` and `resume`.
pub trait VirtualMachine: Send + Sync {
    /// Returns the VM name without contacting the backend.
    fn name(&self) -> &str;

    /// Allocates backend resources and waits until the VM is usable.
    ///
    /// # Errors
    ///
    /// Returns a precondition error for an incomplete spec, a resolution
    /// error for unknown names, and backend or timeout errors otherwise.
    fn provision(&mut self) -> VmFuture<'_, ()>;

    /// Powers on a halted VM.
    ///
    /// # Errors
    ///
    /// See [`VmError`].
    fn start(&self) -> VmFuture<'_, ()>;

    /// Powers off a running VM.
    ///
    /// # Errors
    ///
    /// See [`VmError`].
    fn halt(&self) -> VmFuture<'_, ()>;

    /// Suspends a running VM.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::Unsupported`] on backends without suspend.
    fn suspend(&self) -> VmFuture<'_, ()>;

    /// Resumes a suspended VM.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::Unsupported`] on backends without suspend.
    fn resume(&self) -> VmFuture<'_, ()>;

    /// Queries the backend for the current canonical state.
    ///
    /// # Errors
    ///
    /// See [`VmError`].
    fn state(&self) -> VmFuture<'_, VmState>;

    /// Queries the backend for the VM addresses.
    ///
    /// # Errors
    ///
    /// See [`VmError`].
    fn ips(&self) -> VmFuture<'_, IpSlots>;

    /// Tears down the VM and its side-resources; safe to call again after a
    /// partial failure.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::Teardown`] naming the resource that could not be
    /// removed.
    fn destroy(&mut self) -> VmFuture<'_, ()>;

    /// Opens a remote shell session once the VM is reachable.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::NoUsableIp`] when the VM has no address.
    fn ssh(&self, options: SshOptions) -> VmFuture<'_, Box<dyn RemoteSession>>;
}
