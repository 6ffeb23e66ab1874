//! Host probes feeding the hardware fingerprint
//!
//! Every probe is best effort: a command that is missing, fails or prints
//! nothing useful simply contributes no identifier. Only the caller in
//! `fingerprint` decides whether the collected set is good enough.

mod linux;
mod macos;
mod windows;

use std::fs;
use std::path::Path;
use std::process::Command;

pub use linux::LinuxProbe;
pub use macos::MacProbe;
pub use windows::WindowsProbe;

/// Capability interface over the platform-specific identification sources.
pub trait HardwareProbe {
    /// Whether the host looks like a virtual machine.
    fn detect_virtual_machine(&self) -> bool;

    /// MAC address of the interface carrying the default route, or of the
    /// lexicographically smallest interface when the route is unknown.
    fn active_interface_mac(&self) -> Option<String>;

    /// Stable identifiers other than the MAC and the CPU: board/product
    /// serials, SMBIOS/DMI UUIDs, machine GUIDs, disk serials.
    fn platform_identifiers(&self, virtual_machine: bool) -> Vec<String>;

    /// CPU identifier. Never consulted on virtual machines.
    fn cpu_identifier(&self) -> Option<String>;
}

/// Probe for platforms without any identification source.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProbe;

impl HardwareProbe for NullProbe {
    fn detect_virtual_machine(&self) -> bool {
        false
    }

    fn active_interface_mac(&self) -> Option<String> {
        None
    }

    fn platform_identifiers(&self, _virtual_machine: bool) -> Vec<String> {
        Vec::new()
    }

    fn cpu_identifier(&self) -> Option<String> {
        None
    }
}

/// The probe for the platform this binary was built for.
#[cfg(target_os = "linux")]
pub type SystemProbe = LinuxProbe;
#[cfg(target_os = "macos")]
pub type SystemProbe = MacProbe;
#[cfg(target_os = "windows")]
pub type SystemProbe = WindowsProbe;
#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
pub type SystemProbe = NullProbe;

/// Known vendor/model fragments of hypervisors, matched case-insensitively.
const VM_SIGNATURES: &[&str] = &[
    "vmware",
    "virtualbox",
    "innotek",
    "kvm",
    "qemu",
    "xen",
    "hyper-v",
    "virtual machine",
    "parallels",
    "bochs",
    "amazon ec2",
    "google compute engine",
    "openstack",
];

pub(crate) fn looks_virtual(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    VM_SIGNATURES.iter().any(|sig| lower.contains(sig))
}

/// Run a command and return its trimmed stdout if it succeeded and printed something.
pub(crate) fn run_command(program: &str, args: &[&str]) -> Option<String> {
    let output = match Command::new(program).args(args).output() {
        Ok(output) => output,
        Err(e) => {
            tracing::debug!(program, error = %e, "probe command unavailable");
            return None;
        }
    };
    if !output.status.success() {
        tracing::debug!(program, status = %output.status, "probe command failed");
        return None;
    }
    non_empty(String::from_utf8_lossy(&output.stdout).trim())
}

/// Read a small pseudo-file and return its trimmed content if non-empty.
pub(crate) fn read_trimmed(path: impl AsRef<Path>) -> Option<String> {
    let path = path.as_ref();
    match fs::read_to_string(path) {
        Ok(content) => non_empty(content.trim()),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "probe file unreadable");
            None
        }
    }
}

pub(crate) fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Normalize a MAC to lowercase, colon separated. Rejects the all-zero
/// address and anything that is not six hex octets.
pub(crate) fn normalize_mac(raw: &str) -> Option<String> {
    let octets: Vec<&str> = raw.trim().split([':', '-']).collect();
    if octets.len() != 6
        || octets
            .iter()
            .any(|o| o.len() != 2 || !o.chars().all(|c| c.is_ascii_hexdigit()))
    {
        return None;
    }
    let mac = octets.join(":").to_ascii_lowercase();
    if mac == "00:00:00:00:00:00" {
        None
    } else {
        Some(mac)
    }
}

/// Pick one value deterministically when a probe reports several.
pub(crate) fn smallest<I>(values: I) -> Option<String>
where
    I: IntoIterator<Item = String>,
{
    values.into_iter().filter(|v| !v.is_empty()).min()
}

/// Values of a `wmic`-style table: header line first, one value per line after.
pub(crate) fn table_values(output: &str) -> Vec<String> {
    output
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
