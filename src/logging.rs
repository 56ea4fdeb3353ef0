//! Structured logging for the `vmdrive` binary.
//!
//! The library only emits `tracing` events; installing a subscriber is left
//! to the binary so embedding applications keep control of their output.

use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter directives.
pub const LOG_ENV: &str = "VMDRIVE_LOG";

/// Directive used when [`LOG_ENV`] is unset or invalid.
pub const DEFAULT_DIRECTIVE: &str = "info";

/// Builds the filter from [`LOG_ENV`], falling back to [`DEFAULT_DIRECTIVE`].
#[must_use]
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}

/// Installs a stderr `fmt` subscriber.
///
/// Stdout is reserved for the remote command's output. Calling this twice
/// leaves the first subscriber in place.
pub fn init() {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
