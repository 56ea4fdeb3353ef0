//! Compute Engine instance status vocabulary.

use crate::vm::VmState;

/// Operation status reported once an operation has finished.
pub const OPERATION_DONE: &str = "DONE";

/// Maps a Compute Engine instance status onto the canonical vocabulary.
#[must_use]
pub fn translate_instance_status(status: &str) -> VmState {
    match status {
        "PROVISIONING" | "STAGING" => VmState::Starting,
        "RUNNING" => VmState::Running,
        "STOPPING" | "SUSPENDING" | "REPAIRING" => VmState::Pending,
        "STOPPED" | "TERMINATED" => VmState::Halted,
        "SUSPENDED" => VmState::Suspended,
        _ => VmState::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("STAGING", VmState::Starting)]
    #[case("RUNNING", VmState::Running)]
    #[case("REPAIRING", VmState::Pending)]
    #[case("TERMINATED", VmState::Halted)]
    #[case("SUSPENDED", VmState::Suspended)]
    #[case("running", VmState::Unknown)]
    fn translates_instance_statuses(#[case] status: &str, #[case] expected: VmState) {
        assert_eq!(translate_instance_status(status), expected);
    }
}
