//! Exoscale virtual machine and async job vocabulary.

use crate::vm::VmState;

/// States that count as gone once a destroy job finished.
pub const DESTROYED_STATES: [&str; 2] = ["Destroyed", "Expunging"];

/// Maps an Exoscale virtual machine state onto the canonical vocabulary.
#[must_use]
pub fn translate_vm_state(state: &str) -> VmState {
    match state {
        "Starting" => VmState::Starting,
        "Running" => VmState::Running,
        "Stopped" => VmState::Halted,
        "Stopping" | "Destroyed" | "Expunging" | "Migrating" => VmState::Pending,
        "Error" => VmState::Error,
        _ => VmState::Unknown,
    }
}

/// Returns `true` for a state reached after the VM was destroyed.
#[must_use]
pub fn is_destroyed(state: &str) -> bool {
    DESTROYED_STATES.contains(&state)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("Starting", VmState::Starting)]
    #[case("Running", VmState::Running)]
    #[case("Stopped", VmState::Halted)]
    #[case("Expunging", VmState::Pending)]
    #[case("Migrating", VmState::Pending)]
    #[case("Error", VmState::Error)]
    #[case("running", VmState::Unknown)]
    #[case("", VmState::Unknown)]
    fn translates_vm_states(#[case] state: &str, #[case] expected: VmState) {
        assert_eq!(translate_vm_state(state), expected);
    }

    #[test]
    fn destroyed_and_expunging_count_as_gone() {
        assert!(is_destroyed("Destroyed"));
        assert!(is_destroyed("Expunging"));
        assert!(!is_destroyed("Stopped"));
    }
}
