//! Translation of Nova and Cinder status tokens.

use crate::vm::VmState;

/// Volume statuses Cinder uses for failed transitions.
pub const VOLUME_ERROR_STATES: [&str; 4] =
    ["error", "error_deleting", "error_attaching", "error_detaching"];

/// Maps a Nova server status onto the canonical state.
#[must_use]
pub fn translate_server_state(status: &str) -> VmState {
    match status.trim().to_ascii_uppercase().as_str() {
        "ACTIVE" => VmState::Running,
        "BUILD" | "REBUILD" => VmState::Starting,
        "SHUTOFF" => VmState::Halted,
        "SUSPENDED" | "PAUSED" => VmState::Suspended,
        "REBOOT" | "HARD_REBOOT" | "RESIZE" | "VERIFY_RESIZE" | "MIGRATING" | "DELETED" => {
            VmState::Pending
        }
        "ERROR" => VmState::Error,
        _ => VmState::Unknown,
    }
}

/// Returns `true` when a Cinder volume status reports a failure.
#[must_use]
pub fn is_volume_error(status: &str) -> bool {
    VOLUME_ERROR_STATES.contains(&status)
}
