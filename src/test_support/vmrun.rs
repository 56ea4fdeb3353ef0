//! Scripted `vmrun` double.
//!
//! Power operations update an in-memory set of running VMX paths, which the
//! `list` verb reports back. `suspend` writes a suspend image next to the VMX
//! and `start` removes it again, mirroring what the hypervisor leaves on disk.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};

use camino::{Utf8Path, Utf8PathBuf};

use super::{CallLog, lock, ready};
use crate::error::{ApiError, ApiFuture};
use crate::vmrun::{CommandOutput, HypervisorRunner, SUSPEND_IMAGE_EXTENSION};

const DEFAULT_GUEST_IP: &str = "192.168.56.101";

#[derive(Debug)]
struct State {
    running: BTreeSet<String>,
    scripted: HashMap<String, VecDeque<CommandOutput>>,
    guest_ip: Option<String>,
    ip_misses: usize,
}

/// In-memory hypervisor answering `vmrun` verbs.
#[derive(Clone, Debug)]
pub struct ScriptedHypervisor {
    state: Arc<Mutex<State>>,
    log: CallLog,
}

impl Default for ScriptedHypervisor {
    fn default() -> Self {
        Self::new()
    }
}

fn failure(code: i32, stdout: &str) -> CommandOutput {
    CommandOutput {
        code: Some(code),
        stdout: stdout.to_owned(),
        stderr: String::new(),
    }
}

fn suspend_image(vmx: &str) -> Utf8PathBuf {
    Utf8Path::new(vmx).with_extension(SUSPEND_IMAGE_EXTENSION)
}

fn io_error(operation: &str, path: &Utf8Path, err: &io::Error) -> ApiError {
    ApiError::Io {
        operation: operation.to_owned(),
        path: path.to_string(),
        message: err.to_string(),
    }
}

impl ScriptedHypervisor {
    /// Creates a hypervisor whose guests report `192.168.56.101` as soon as
    /// they run.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                running: BTreeSet::new(),
                scripted: HashMap::new(),
                guest_ip: Some(DEFAULT_GUEST_IP.to_owned()),
                ip_misses: 0,
            })),
            log: CallLog::default(),
        }
    }

    /// Returns `output` for the next invocation of `verb` instead of
    /// simulating it.
    pub fn script(&self, verb: &str, output: CommandOutput) {
        lock(&self.state)
            .scripted
            .entry(verb.to_owned())
            .or_default()
            .push_back(output);
    }

    /// Makes the next `misses` guest IP queries fail as if tools were not
    /// running yet.
    pub fn delay_guest_ip(&self, misses: usize) {
        lock(&self.state).ip_misses = misses;
    }

    /// Makes guests never report an address.
    pub fn withhold_guest_ip(&self) {
        lock(&self.state).guest_ip = None;
    }

    /// Marks `vmx` as running without a `start` call.
    pub fn mark_running(&self, vmx: &str) {
        lock(&self.state).running.insert(vmx.to_owned());
    }

    /// Invocations so far, arguments joined by spaces.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.log.calls()
    }

    /// Shared call log.
    #[must_use]
    pub fn log(&self) -> CallLog {
        self.log.clone()
    }

    /// VMX paths currently running.
    #[must_use]
    pub fn running(&self) -> Vec<String> {
        lock(&self.state).running.iter().cloned().collect()
    }

    fn simulate(&self, args: &[String]) -> Result<CommandOutput, ApiError> {
        let mut state = lock(&self.state);
        let verb = args.first().map_or("", String::as_str);
        if let Some(output) = state
            .scripted
            .get_mut(verb)
            .and_then(VecDeque::pop_front)
        {
            return Ok(output);
        }
        let vmx = args.get(1).map_or("", String::as_str);
        match verb {
            "list" => {
                let mut listing = format!("Total running VMs: {}\n", state.running.len());
                for path in &state.running {
                    listing.push_str(path);
                    listing.push('\n');
                }
                Ok(CommandOutput::success(listing))
            }
            "start" => {
                let image = suspend_image(vmx);
                if image.exists() {
                    std::fs::remove_file(&image)
                        .map_err(|err| io_error("remove", &image, &err))?;
                }
                state.running.insert(vmx.to_owned());
                Ok(CommandOutput::success(""))
            }
            "stop" => {
                if state.running.remove(vmx) {
                    Ok(CommandOutput::success(""))
                } else {
                    Ok(failure(
                        255,
                        "Error: The virtual machine is not powered on",
                    ))
                }
            }
            "suspend" => {
                if !state.running.remove(vmx) {
                    return Ok(failure(
                        255,
                        "Error: The virtual machine is not powered on",
                    ));
                }
                let image = suspend_image(vmx);
                std::fs::write(&image, "")
                    .map_err(|err| io_error("write", &image, &err))?;
                Ok(CommandOutput::success(""))
            }
            "getGuestIPAddress" => {
                if state.ip_misses > 0 {
                    state.ip_misses -= 1;
                    return Ok(failure(255, "Error: Unable to get the IP address"));
                }
                match (&state.guest_ip, state.running.contains(vmx)) {
                    (Some(ip), true) => Ok(CommandOutput::success(format!("{ip}\n"))),
                    _ => Ok(failure(255, "Error: Unable to get the IP address")),
                }
            }
            _ => Ok(failure(255, "Error: Unrecognized command")),
        }
    }
}

impl HypervisorRunner for ScriptedHypervisor {
    fn run<'a>(&'a self, args: &'a [String]) -> ApiFuture<'a, CommandOutput> {
        self.log.record(args.join(" "));
        ready(self.simulate(args))
    }
}
