//! VMX network card rewriting.

use std::fmt;

/// Network backing of a virtual NIC.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Backing {
    /// Host-private NAT network; the guest is reachable from the host only.
    #[default]
    Nat,
    /// Bridged onto a host interface; reachable from other hosts too.
    Bridged,
}

impl Backing {
    /// VMX `connectiontype` token.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Nat => "nat",
            Self::Bridged => "bridged",
        }
    }
}

impl fmt::Display for Backing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One network card written into the cloned VMX.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NicConfig {
    /// `ethernetN` index.
    pub index: u32,
    /// Backing type.
    pub backing: Backing,
    /// Host interface, such as `en0`.
    pub backing_device: String,
}

/// Drops every `ethernet*` line from `vmx` and appends one block per NIC.
#[must_use]
pub fn rewrite_nics(vmx: &str, nics: &[NicConfig]) -> String {
    let mut rewritten: String = vmx
        .lines()
        .filter(|line| !line.trim_start().starts_with("ethernet"))
        .fold(String::with_capacity(vmx.len()), |mut acc, line| {
            acc.push_str(line);
            acc.push('\n');
            acc
        });
    for nic in nics {
        let index = nic.index;
        rewritten.push_str(&format!(
            "ethernet{index}.addresstype = \"generated\"\n\
             ethernet{index}.bsdname = \"{}\"\n\
             ethernet{index}.connectiontype = \"{}\"\n\
             ethernet{index}.displayname = \"Ethernet\"\n\
             ethernet{index}.present = \"TRUE\"\n\
             ethernet{index}.virtualdev = \"vmxnet3\"\n",
            nic.backing_device, nic.backing,
        ));
    }
    rewritten
}
