//! Error taxonomy shared by every lifecycle adapter.
//!
//! Backend API traits report [`ApiError`]; adapters wrap those with the step
//! and resource they were working on and surface a [`VmError`]. Callers use
//! [`VmError::kind`] to decide between retrying and correcting their input.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;
use tracing::warn;

use crate::vm::VmState;

/// Boxed future returned by backend API traits.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ApiError>> + Send + 'a>>;

/// Broad classes of lifecycle failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Caller input or instance bookkeeping was wrong; no backend call was made.
    Precondition,
    /// A named backend resource matched zero or several candidates.
    Resolution,
    /// A backend call failed in flight and may succeed when retried.
    Transient,
    /// The backend reported the resource itself entered an error state.
    Terminal,
    /// A poll gave up while the resource was still converging.
    Timeout,
    /// The backend has no primitive for the requested operation.
    Unsupported,
}

/// Errors reported by backend API clients.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ApiError {
    /// The addressed resource does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Resource class, such as `server` or `volume`.
        kind: String,
        /// Identifier that was looked up.
        id: String,
    },
    /// The backend answered with an unexpected status.
    #[error("{operation} returned HTTP {status}: {body}")]
    Status {
        /// Operation being attempted.
        operation: String,
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },
    /// The request could not be delivered.
    #[error("{operation} failed: {message}")]
    Transport {
        /// Operation being attempted.
        operation: String,
        /// Transport error description.
        message: String,
    },
    /// The response could not be decoded.
    #[error("failed to decode {operation} response: {message}")]
    Decode {
        /// Operation being attempted.
        operation: String,
        /// Decoder error description.
        message: String,
    },
    /// Authentication was rejected or returned an unusable session.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// A local control utility exited unsuccessfully.
    #[error("{program} exited with status {status_text}: {stderr}")]
    Command {
        /// Program that was invoked.
        program: String,
        /// Human readable exit status.
        status_text: String,
        /// Captured standard error.
        stderr: String,
    },
    /// A local file operation failed.
    #[error("{operation} {path}: {message}")]
    Io {
        /// Operation being attempted.
        operation: String,
        /// Path involved.
        path: String,
        /// I/O error description.
        message: String,
    },
}

impl ApiError {
    /// Builds a [`ApiError::NotFound`] for the given resource.
    #[must_use]
    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Returns `true` when the error reports a missing resource.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors surfaced by lifecycle operations.
#[derive(Clone, Debug, Error)]
pub enum VmError {
    /// The VM has no instance identifier yet.
    #[error("virtual machine {name} has not been provisioned")]
    NotProvisioned {
        /// VM name.
        name: String,
    },
    /// The VM was torn down by an earlier `destroy`.
    #[error("virtual machine {name} has already been destroyed")]
    AlreadyDestroyed {
        /// VM name.
        name: String,
    },
    /// `provision` was called on a VM that already owns a backend instance.
    #[error("virtual machine {name} is already provisioned as {id}")]
    AlreadyProvisioned {
        /// VM name.
        name: String,
        /// Existing backend identifier.
        id: String,
    },
    /// The VM is not in a state the operation can start from.
    #[error("cannot {operation} {name} while it is {state}")]
    InvalidState {
        /// VM name.
        name: String,
        /// Lifecycle operation requested.
        operation: &'static str,
        /// State reported by the backend.
        state: VmState,
    },
    /// A mandatory spec field was left empty.
    #[error("{field} required")]
    MissingField {
        /// Human readable field description.
        field: String,
    },
    /// A spec field holds an unusable value.
    #[error("invalid {field}: {reason}")]
    InvalidField {
        /// Field description.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },
    /// A named resource matched nothing.
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// Resource class, such as `image` or `flavor`.
        kind: String,
        /// Name that was looked up.
        name: String,
    },
    /// A named resource matched more than one candidate.
    #[error("{kind} '{name}' is ambiguous: {count} matches")]
    Ambiguous {
        /// Resource class.
        kind: String,
        /// Name that was looked up.
        name: String,
        /// Number of matches returned.
        count: usize,
    },
    /// A backend call failed.
    #[error("{step} failed for {resource}: {source}")]
    Api {
        /// Lifecycle step that issued the call.
        step: String,
        /// Resource identifier or name.
        resource: String,
        /// Underlying API error.
        #[source]
        source: ApiError,
    },
    /// The backend reported a terminal failure state.
    #[error("{action} failed: {resource} entered state {state}")]
    Failed {
        /// Action being awaited.
        action: String,
        /// Resource identifier.
        resource: String,
        /// Backend state observed.
        state: String,
    },
    /// A poll loop gave up before reaching a terminal state.
    #[error("timed out waiting to {action} {resource}; last observed {last_observed}")]
    Timeout {
        /// Action being awaited.
        action: String,
        /// Resource identifier.
        resource: String,
        /// Last value returned by the probe.
        last_observed: String,
    },
    /// The backend has no primitive for this operation.
    #[error("{operation} is not supported by the {backend} backend")]
    Unsupported {
        /// Lifecycle operation requested.
        operation: &'static str,
        /// Backend name.
        backend: &'static str,
    },
    /// Tearing down a side-resource or the instance failed.
    #[error("teardown of {resource} {id} failed: {source}")]
    Teardown {
        /// Resource class being removed.
        resource: String,
        /// Identifier of the resource still present.
        id: String,
        /// Underlying failure.
        #[source]
        source: Box<VmError>,
    },
    /// Neither a public nor a private address is available.
    #[error("no usable IP address for {name}")]
    NoUsableIp {
        /// VM name.
        name: String,
    },
    /// The remote-access collaborator failed.
    #[error("remote access to {target} failed: {message}")]
    Remote {
        /// Address or host being contacted.
        target: String,
        /// Failure description.
        message: String,
    },
}

impl VmError {
    /// Builds a [`VmError::MissingField`].
    #[must_use]
    pub fn missing(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Wraps an API failure with the step and resource involved.
    #[must_use]
    pub fn api(step: impl Into<String>, resource: impl Into<String>, source: ApiError) -> Self {
        Self::Api {
            step: step.into(),
            resource: resource.into(),
            source,
        }
    }

    /// Wraps a teardown failure so callers can see which resource remains.
    #[must_use]
    pub fn teardown(resource: impl Into<String>, id: impl Into<String>, source: Self) -> Self {
        Self::Teardown {
            resource: resource.into(),
            id: id.into(),
            source: Box::new(source),
        }
    }

    /// Classifies the error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotProvisioned { .. }
            | Self::AlreadyDestroyed { .. }
            | Self::AlreadyProvisioned { .. }
            | Self::InvalidState { .. }
            | Self::MissingField { .. }
            | Self::InvalidField { .. }
            | Self::NoUsableIp { .. } => ErrorKind::Precondition,
            Self::NotFound { .. } | Self::Ambiguous { .. } => ErrorKind::Resolution,
            Self::Api { .. } | Self::Remote { .. } => ErrorKind::Transient,
            Self::Failed { .. } => ErrorKind::Terminal,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Unsupported { .. } => ErrorKind::Unsupported,
            Self::Teardown { source, .. } => source.kind(),
        }
    }

    /// Returns `true` when retrying the same operation may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient | ErrorKind::Timeout)
    }
}

/// Treats a not-found answer from a teardown call as success.
pub(crate) fn tolerate_absent(
    result: Result<(), ApiError>,
    step: &str,
    id: &str,
) -> Result<(), VmError> {
    match result {
        Err(err) if err.is_not_found() => {
            warn!(step, id, "resource already gone");
            Ok(())
        }
        other => other.map_err(|err| VmError::api(step, id, err)),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn missing_image_reads_naturally() {
        assert_eq!(
            VmError::missing("image reference").to_string(),
            "image reference required"
        );
    }

    #[rstest]
    #[case(VmError::NotProvisioned { name: "vm".into() }, ErrorKind::Precondition)]
    #[case(
        VmError::NotFound { kind: "image".into(), name: "Ubuntu-20.04".into() },
        ErrorKind::Resolution
    )]
    #[case(
        VmError::api("create server", "vm", ApiError::Auth("expired".into())),
        ErrorKind::Transient
    )]
    #[case(
        VmError::Failed { action: "provision".into(), resource: "vm".into(), state: "error".into() },
        ErrorKind::Terminal
    )]
    #[case(
        VmError::Unsupported { operation: "suspend", backend: "gce" },
        ErrorKind::Unsupported
    )]
    fn classifies_errors(#[case] error: VmError, #[case] expected: ErrorKind) {
        assert_eq!(error.kind(), expected);
    }

    #[test]
    fn teardown_inherits_source_kind() {
        let err = VmError::teardown(
            "volume",
            "vol-1",
            VmError::Timeout {
                action: "delete".into(),
                resource: "vol-1".into(),
                last_observed: "deleting".into(),
            },
        );
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.is_retryable());
        assert!(err.to_string().contains("vol-1"));
    }
}
