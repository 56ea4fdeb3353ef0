//! Azure power-state and deployment-state vocabulary.

use crate::vm::VmState;

/// Deployment provisioning state reported on success.
pub const DEPLOYMENT_SUCCEEDED: &str = "Succeeded";

/// Deployment provisioning states that end the deployment unsuccessfully.
pub const DEPLOYMENT_FAILED_STATES: [&str; 2] = ["Failed", "Canceled"];

/// Maps an instance-view display status onto the canonical vocabulary.
#[must_use]
pub fn translate_power_state(status: &str) -> VmState {
    match status {
        "VM starting" | "VM deploying" => VmState::Starting,
        "VM running" => VmState::Running,
        "VM stopped" | "VM deallocated" => VmState::Halted,
        "VM stopping" | "VM deallocating" | "VM deleting" | "VM suspending" => VmState::Pending,
        "Provisioning failed" => VmState::Error,
        _ => VmState::Unknown,
    }
}

/// Returns `true` for a deployment that will never reach `Succeeded`.
#[must_use]
pub fn is_failed_deployment(state: &str) -> bool {
    DEPLOYMENT_FAILED_STATES
        .iter()
        .any(|failed| failed.eq_ignore_ascii_case(state))
}
