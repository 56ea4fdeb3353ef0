//! BDD scenarios for the VM lifecycle contract.

use rstest_bdd_macros::scenario;

use super::test_helpers::{LifecycleContext, lifecycle_context};

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Reject a spec without an image reference"
)]
fn scenario_missing_image(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Report an image name that matches nothing"
)]
fn scenario_unknown_image(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Expose a private-only address after provisioning"
)]
fn scenario_private_only_address(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Halt waits until the backend reports the VM stopped"
)]
fn scenario_halt_polls_until_stopped(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Destroying twice is harmless"
)]
fn scenario_destroy_twice(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Run a command and tear the server down"
)]
fn scenario_run_and_teardown(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}
