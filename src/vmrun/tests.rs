//! Unit tests for the `vmrun` adapter.

use std::net::{Ipv4Addr, SocketAddr};

use rstest::{fixture, rstest};
use tempfile::TempDir;
use tokio::time::Instant;

use super::*;
use crate::error::ErrorKind;
use crate::test_support::{RecordingRemote, ScriptedHypervisor};

const SOURCE_VMX: &str = "\
.encoding = \"UTF-8\"
displayName = \"ubuntu-base\"
ethernet0.present = \"TRUE\"
ethernet0.connectionType = \"hostonly\"
memsize = \"2048\"
";

struct Harness {
    _tmp: TempDir,
    root: Utf8PathBuf,
    hypervisor: ScriptedHypervisor,
    remote: RecordingRemote,
    vm: VmrunVm,
}

impl Harness {
    fn vmx(&self) -> String {
        self.root.join("clone/ubuntu.vmx").to_string()
    }

    fn destination(&self) -> Utf8PathBuf {
        self.root.join("clone")
    }
}

fn source_tree(tmp: &TempDir) -> Utf8PathBuf {
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("non UTF-8 temp dir {}", path.display()));
    let source = root.join("base");
    std::fs::create_dir_all(&source).unwrap_or_else(|err| panic!("mkdir: {err}"));
    std::fs::write(source.join("ubuntu.vmx"), SOURCE_VMX)
        .unwrap_or_else(|err| panic!("write vmx: {err}"));
    std::fs::write(source.join("ubuntu.vmdk"), "disk")
        .unwrap_or_else(|err| panic!("write disk: {err}"));
    root
}

fn harness_with(configure: impl FnOnce(&mut VmrunSpec)) -> Harness {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = source_tree(&tmp);
    let mut spec = VmrunSpec {
        name: String::from("ci-local"),
        source_vmx: root.join("base/ubuntu.vmx"),
        destination: root.join("clone"),
        nics: vec![NicConfig {
            index: 0,
            backing: Backing::Bridged,
            backing_device: String::from("en0"),
        }],
        gui: false,
        credentials: Credentials::with_key("ubuntu", "~/.ssh/id_ed25519"),
    };
    configure(&mut spec);
    let hypervisor = ScriptedHypervisor::new();
    let remote = RecordingRemote::new();
    let vm = VmrunVm::new(spec, Arc::new(hypervisor.clone()), Arc::new(remote.clone()))
        .with_timeouts(VmrunTimeouts {
            ip: PollPolicy::new(Duration::from_secs(2), Duration::from_secs(10)),
            ssh: Duration::from_secs(5),
        });
    Harness {
        _tmp: tmp,
        root,
        hypervisor,
        remote,
        vm,
    }
}

#[fixture]
fn harness() -> Harness {
    harness_with(|_| {})
}

async fn provisioned() -> Harness {
    let mut harness = harness_with(|_| {});
    harness
        .vm
        .provision()
        .await
        .unwrap_or_else(|err| panic!("provision: {err}"));
    harness
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn provision_clones_rewrites_nics_and_waits_for_an_address(mut harness: Harness) {
    harness.hypervisor.delay_guest_ip(2);
    let started = Instant::now();

    harness
        .vm
        .provision()
        .await
        .unwrap_or_else(|err| panic!("provision: {err}"));

    assert!(started.elapsed() >= Duration::from_secs(4));
    let vmx = harness.vmx();
    assert_eq!(harness.vm.instance_id(), Some(vmx.as_str()));
    assert!(harness.destination().join("ubuntu.vmdk").exists());

    let cloned = std::fs::read_to_string(&vmx).unwrap_or_else(|err| panic!("read vmx: {err}"));
    assert!(!cloned.contains("hostonly"));
    assert!(cloned.contains("ethernet0.connectiontype = \"bridged\""));
    assert!(cloned.contains("ethernet0.bsdname = \"en0\""));
    assert!(cloned.contains("memsize = \"2048\""));

    let calls = harness.hypervisor.calls();
    assert_eq!(calls.first(), Some(&format!("start {vmx} nogui")));
    assert_eq!(
        calls
            .iter()
            .filter(|call| call.starts_with("getGuestIPAddress"))
            .count(),
        3
    );

    let ips = harness
        .vm
        .ips()
        .await
        .unwrap_or_else(|err| panic!("ips: {err}"));
    assert_eq!(
        ips.to_array(),
        [Some(IpAddr::V4(Ipv4Addr::new(192, 168, 56, 101))), None]
    );
}

#[tokio::test(start_paused = true)]
async fn empty_nic_list_keeps_the_source_cards() {
    let mut harness = harness_with(|spec| spec.nics.clear());

    harness
        .vm
        .provision()
        .await
        .unwrap_or_else(|err| panic!("provision: {err}"));

    let cloned =
        std::fs::read_to_string(harness.vmx()).unwrap_or_else(|err| panic!("read vmx: {err}"));
    assert_eq!(cloned, SOURCE_VMX);
}

#[rstest]
#[tokio::test]
async fn existing_destination_is_rejected_before_copying(mut harness: Harness) {
    std::fs::create_dir_all(harness.destination()).unwrap_or_else(|err| panic!("mkdir: {err}"));

    let err = harness
        .vm
        .provision()
        .await
        .expect_err("provision should fail");

    assert!(matches!(&err, VmError::InvalidField { field, .. } if field == "destination directory"));
    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert!(harness.hypervisor.calls().is_empty());
    assert_eq!(harness.vm.instance_id(), None);
}

#[cfg(unix)]
#[rstest]
#[tokio::test]
async fn failed_copy_removes_the_partial_clone(mut harness: Harness) {
    let dangling = harness.root.join("base/ubuntu-s001.vmdk");
    std::os::unix::fs::symlink("missing-extent.vmdk", &dangling)
        .unwrap_or_else(|err| panic!("symlink: {err}"));

    let err = harness
        .vm
        .provision()
        .await
        .expect_err("provision should fail");

    assert!(err.to_string().contains("copy virtual machine"), "unexpected error: {err}");
    assert!(!harness.destination().exists());
    assert_eq!(harness.vm.instance_id(), None);
    assert!(harness.hypervisor.calls().is_empty());

    std::fs::remove_file(&dangling).unwrap_or_else(|err| panic!("remove symlink: {err}"));
    harness
        .vm
        .provision()
        .await
        .unwrap_or_else(|err| panic!("retry provision: {err}"));
    assert!(harness.destination().join("ubuntu.vmx").exists());
}

#[rstest]
#[case(|spec: &mut VmrunSpec| spec.source_vmx = Utf8PathBuf::new(), "source vmx required")]
#[case(|spec: &mut VmrunSpec| spec.destination = Utf8PathBuf::new(), "destination directory required")]
#[tokio::test]
async fn incomplete_specs_fail_before_any_call(
    #[case] configure: fn(&mut VmrunSpec),
    #[case] message: &str,
) {
    let mut harness = harness_with(configure);

    let err = harness
        .vm
        .provision()
        .await
        .expect_err("provision should fail");

    assert_eq!(err.to_string(), message);
    assert!(harness.hypervisor.calls().is_empty());
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn silent_guest_times_out_and_keeps_the_clone(mut harness: Harness) {
    harness.hypervisor.withhold_guest_ip();

    let err = harness
        .vm
        .provision()
        .await
        .expect_err("provision should time out");

    assert!(matches!(
        &err,
        VmError::Timeout { last_observed, .. } if last_observed == "absent"
    ));
    assert!(harness.vm.instance_id().is_some());

    harness
        .vm
        .destroy()
        .await
        .unwrap_or_else(|err| panic!("destroy: {err}"));
    assert!(!harness.destination().exists());
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn failed_start_surfaces_vmrun_output(mut harness: Harness) {
    harness.hypervisor.script(
        "start",
        CommandOutput {
            code: Some(255),
            stdout: String::from("Error: Cannot open VM: ubuntu.vmx, unknown file suffix"),
            stderr: String::new(),
        },
    );

    let err = harness
        .vm
        .provision()
        .await
        .expect_err("provision should fail");

    assert_eq!(err.kind(), ErrorKind::Transient);
    assert!(err.to_string().contains("Cannot open VM"));
}

#[tokio::test(start_paused = true)]
async fn suspend_and_resume_follow_the_suspend_image() {
    let harness = provisioned().await;

    harness
        .vm
        .suspend()
        .await
        .unwrap_or_else(|err| panic!("suspend: {err}"));
    let suspended = harness
        .vm
        .state()
        .await
        .unwrap_or_else(|err| panic!("state: {err}"));
    assert_eq!(suspended, VmState::Suspended);

    harness
        .vm
        .resume()
        .await
        .unwrap_or_else(|err| panic!("resume: {err}"));
    let running = harness
        .vm
        .state()
        .await
        .unwrap_or_else(|err| panic!("state: {err}"));
    assert_eq!(running, VmState::Running);
}

#[tokio::test(start_paused = true)]
async fn halt_issues_a_soft_stop() {
    let harness = provisioned().await;

    harness
        .vm
        .halt()
        .await
        .unwrap_or_else(|err| panic!("halt: {err}"));

    assert!(
        harness
            .hypervisor
            .calls()
            .contains(&format!("stop {} soft", harness.vmx()))
    );
    let halted = harness
        .vm
        .state()
        .await
        .unwrap_or_else(|err| panic!("state: {err}"));
    assert_eq!(halted, VmState::Halted);
}

#[tokio::test(start_paused = true)]
async fn list_errors_on_stderr_are_reported() {
    let harness = provisioned().await;
    harness.hypervisor.script(
        "list",
        CommandOutput {
            code: Some(0),
            stdout: String::new(),
            stderr: String::from("Error: vmrun was unable to start"),
        },
    );

    let err = harness.vm.state().await.expect_err("state should fail");

    assert!(err.to_string().contains("unable to start"));
}

#[tokio::test(start_paused = true)]
async fn destroy_stops_hard_and_removes_the_clone() {
    let mut harness = provisioned().await;

    harness
        .vm
        .destroy()
        .await
        .unwrap_or_else(|err| panic!("destroy: {err}"));

    assert!(
        harness
            .hypervisor
            .calls()
            .contains(&format!("stop {} hard", harness.vmx()))
    );
    assert!(!harness.destination().exists());
    assert!(harness.hypervisor.running().is_empty());

    let calls = harness.hypervisor.log().len();
    harness
        .vm
        .destroy()
        .await
        .unwrap_or_else(|err| panic!("second destroy: {err}"));
    assert_eq!(harness.hypervisor.log().len(), calls);
}

#[tokio::test(start_paused = true)]
async fn destroy_ignores_stop_failures_on_a_halted_vm() {
    let mut harness = provisioned().await;
    harness
        .vm
        .halt()
        .await
        .unwrap_or_else(|err| panic!("halt: {err}"));

    harness
        .vm
        .destroy()
        .await
        .unwrap_or_else(|err| panic!("destroy: {err}"));

    assert!(!harness.destination().exists());
}

#[tokio::test(start_paused = true)]
async fn destroy_keeps_a_running_vm_whose_stop_failed() {
    let mut harness = provisioned().await;
    harness.hypervisor.script(
        "stop",
        CommandOutput {
            code: Some(255),
            stdout: String::from("Error: The operation was canceled"),
            stderr: String::new(),
        },
    );

    let err = harness
        .vm
        .destroy()
        .await
        .expect_err("destroy should fail");

    assert!(matches!(&err, VmError::Teardown { id, .. } if *id == harness.vmx()));
    assert!(harness.destination().exists());

    harness
        .vm
        .destroy()
        .await
        .unwrap_or_else(|err| panic!("retry destroy: {err}"));
    assert!(!harness.destination().exists());
}

#[tokio::test(start_paused = true)]
async fn ssh_connects_to_the_guest_address() {
    let harness = provisioned().await;

    harness
        .vm
        .ssh(SshOptions::default())
        .await
        .unwrap_or_else(|err| panic!("ssh: {err}"));

    let guest = IpAddr::V4(Ipv4Addr::new(192, 168, 56, 101));
    assert_eq!(harness.remote.connections(), vec![SocketAddr::new(guest, 22)]);
}

#[rstest]
#[tokio::test]
async fn unprovisioned_vm_makes_no_hypervisor_calls(harness: Harness) {
    assert!(matches!(
        harness.vm.start().await,
        Err(VmError::NotProvisioned { .. })
    ));
    assert!(matches!(
        harness.vm.suspend().await,
        Err(VmError::NotProvisioned { .. })
    ));
    assert!(matches!(
        harness.vm.state().await,
        Err(VmError::NotProvisioned { .. })
    ));
    assert!(harness.hypervisor.calls().is_empty());
}
