//! BDD step definitions for the VM lifecycle contract.

use std::net::IpAddr;

use rstest_bdd_macros::{given, then, when};
use tokio::time::Instant;
use vmdrive::exoscale::Nic;
use vmdrive::RunOrchestrator;

use super::test_helpers::{
    LifecycleContext, LifecycleTestError, POLL_INTERVAL, count_calls, exoscale_vm, openstack_spec,
    openstack_vm, paused_runtime,
};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Setup(#[from] LifecycleTestError),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn split_states(states: &str) -> Vec<&str> {
    states.split(',').map(str::trim).collect()
}

#[given("an OpenStack VM without an image reference")]
fn openstack_without_image(lifecycle_context: &LifecycleContext) {
    let vm = openstack_vm(lifecycle_context, openstack_spec(""));
    lifecycle_context.install(vm);
}

#[given("an OpenStack VM using image \"{image}\"")]
fn openstack_with_image(lifecycle_context: &LifecycleContext, image: String) {
    let vm = openstack_vm(lifecycle_context, openstack_spec(image.trim()));
    lifecycle_context.install(vm);
}

#[given("the remote command exits with \"{code}\"")]
fn remote_command_exits(lifecycle_context: &LifecycleContext, code: i32) {
    lifecycle_context.remote.push_output(code, "done\n");
}

#[given("an Exoscale VM whose backend reports states \"{states}\"")]
fn exoscale_with_states(lifecycle_context: &LifecycleContext, states: String) {
    lifecycle_context.exoscale.script_states(&split_states(&states));
    lifecycle_context.install(exoscale_vm(lifecycle_context));
}

#[given("the Exoscale VM only has the private address \"{address}\"")]
fn exoscale_private_only(lifecycle_context: &LifecycleContext, address: String) {
    lifecycle_context.exoscale.set_nics(vec![Nic {
        ip_address: Some(address.trim().to_owned()),
        ip6_address: None,
        is_default: false,
    }]);
}

#[given("a provisioned Exoscale VM")]
fn provisioned_exoscale(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    lifecycle_context.install(exoscale_vm(lifecycle_context));
    lifecycle_context
        .with_vm(|vm, runtime| runtime.block_on(vm.provision()))?
        .map_err(|err| StepError::Assertion(format!("provision failed: {err}")))
}

#[given("the Exoscale backend reports states \"{states}\"")]
fn exoscale_reports_states(lifecycle_context: &LifecycleContext, states: String) {
    lifecycle_context.exoscale.script_states(&split_states(&states));
}

#[when("I provision the VM")]
fn provision_vm(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let outcome = lifecycle_context.with_vm(|vm, runtime| runtime.block_on(vm.provision()))?;
    lifecycle_context.record(outcome);
    Ok(())
}

#[when("I query the VM addresses")]
fn query_addresses(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let ips = lifecycle_context
        .with_vm(|vm, runtime| runtime.block_on(vm.ips()))?
        .map_err(|err| StepError::Assertion(format!("address query failed: {err}")))?;
    lifecycle_context.state().ips = Some(ips);
    Ok(())
}

#[when("I halt the VM")]
fn halt_vm(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let before = count_calls(&lifecycle_context.exoscale.calls(), "get_virtual_machine");
    let (outcome, elapsed) = lifecycle_context.with_vm(|vm, runtime| {
        runtime.block_on(async {
            let started = Instant::now();
            let outcome = vm.halt().await;
            (outcome, started.elapsed())
        })
    })?;
    let after = count_calls(&lifecycle_context.exoscale.calls(), "get_virtual_machine");

    let mut state = lifecycle_context.state();
    state.outcome = Some(outcome);
    state.elapsed = Some(elapsed);
    state.probes = Some(after - before);
    Ok(())
}

#[when("I destroy the VM twice")]
fn destroy_twice(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let outcome = lifecycle_context.with_vm(|vm, runtime| {
        runtime.block_on(async {
            match vm.destroy().await {
                Ok(()) => vm.destroy().await,
                Err(err) => Err(err),
            }
        })
    })?;
    lifecycle_context.record(outcome);
    Ok(())
}

#[when("I run \"{command}\" on the VM")]
fn run_on_vm(lifecycle_context: &LifecycleContext, command: String) -> Result<(), StepError> {
    let vm = lifecycle_context.take_vm()?;
    let runtime = paused_runtime()?;
    let mut orchestrator = RunOrchestrator::new(vm);
    let result = runtime.block_on(orchestrator.execute(command.trim()));
    lifecycle_context.state().run = Some(result);
    Ok(())
}

#[then("the operation succeeds")]
fn operation_succeeds(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    match lifecycle_context.state().outcome.as_ref() {
        Some(Ok(())) => Ok(()),
        Some(Err(err)) => Err(StepError::Assertion(format!(
            "expected success, got failure: {err}"
        ))),
        None => Err(StepError::Assertion(String::from("no operation ran"))),
    }
}

#[then("the operation fails with a \"{kind}\" error mentioning \"{text}\"")]
fn operation_fails(
    lifecycle_context: &LifecycleContext,
    kind: String,
    text: String,
) -> Result<(), StepError> {
    let state = lifecycle_context.state();
    let Some(Err(err)) = state.outcome.as_ref() else {
        return Err(StepError::Assertion(String::from(
            "expected the operation to fail",
        )));
    };
    let actual = format!("{:?}", err.kind()).to_lowercase();
    if actual != kind.trim() {
        return Err(StepError::Assertion(format!(
            "expected a {kind} error, got {actual}: {err}"
        )));
    }
    if !err.to_string().contains(text.trim()) {
        return Err(StepError::Assertion(format!(
            "error '{err}' does not mention '{text}'"
        )));
    }
    Ok(())
}

#[then("the OpenStack backend received no calls")]
fn openstack_untouched(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let calls = lifecycle_context.openstack.calls();
    if calls.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("unexpected calls: {calls:?}")))
    }
}

#[then("no OpenStack server was created")]
fn no_openstack_server(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let log = lifecycle_context.openstack.log();
    if log.position("create_server").is_none() && !lifecycle_context.openstack.server_exists() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "a server was created: {:?}",
            log.calls()
        )))
    }
}

#[then("the public address is empty")]
fn public_address_empty(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    match lifecycle_context.state().ips {
        Some(ips) if ips.public.is_none() => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected no public address, got {other:?}"
        ))),
    }
}

#[then("the private address is \"{address}\"")]
fn private_address_is(
    lifecycle_context: &LifecycleContext,
    address: String,
) -> Result<(), StepError> {
    let expected: IpAddr = address
        .trim()
        .parse()
        .map_err(|err| StepError::Assertion(format!("bad address {address}: {err}")))?;
    match lifecycle_context.state().ips {
        Some(ips) if ips.private == Some(expected) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected private address {expected}, got {other:?}"
        ))),
    }
}

#[then("the state was polled \"{count}\" times")]
fn state_polled(lifecycle_context: &LifecycleContext, count: usize) -> Result<(), StepError> {
    match lifecycle_context.state().probes {
        Some(probes) if probes == count => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected {count} state polls, got {other:?}"
        ))),
    }
}

#[then("at least \"{intervals}\" poll intervals elapsed")]
fn intervals_elapsed(lifecycle_context: &LifecycleContext, intervals: u32) -> Result<(), StepError> {
    let minimum = POLL_INTERVAL * intervals;
    match lifecycle_context.state().elapsed {
        Some(elapsed) if elapsed >= minimum => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected at least {minimum:?} to elapse, got {other:?}"
        ))),
    }
}

#[then("the Exoscale backend deleted the VM once")]
fn exoscale_deleted_once(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let calls = lifecycle_context.exoscale.calls();
    let deletes = count_calls(&calls, "destroy_virtual_machine");
    if deletes == 1 && !lifecycle_context.exoscale.vm_exists() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected one delete and no VM, got {deletes} deletes: {calls:?}"
        )))
    }
}

#[then("the run reports exit code \"{code}\"")]
fn run_exit_code(lifecycle_context: &LifecycleContext, code: i32) -> Result<(), StepError> {
    match lifecycle_context.state().run.as_ref() {
        Some(Ok(output)) if output.exit_code == Some(code) => Ok(()),
        Some(Ok(output)) => Err(StepError::Assertion(format!(
            "expected exit code {code}, got {:?}",
            output.exit_code
        ))),
        Some(Err(err)) => Err(StepError::Assertion(format!("run failed: {err}"))),
        None => Err(StepError::Assertion(String::from("no run happened"))),
    }
}

#[then("the OpenStack server and floating IP are released")]
fn openstack_released(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let api = &lifecycle_context.openstack;
    if api.server_exists() || api.floating_ip_allocated() {
        return Err(StepError::Assertion(format!(
            "resources remain after the run: {:?}",
            api.calls()
        )));
    }
    Ok(())
}
