use super::{
    HardwareProbe, looks_virtual, non_empty, normalize_mac, read_trimmed, run_command, smallest,
};
use std::fs;
use std::path::PathBuf;

/// Reads `/proc`, `/sys` and `/etc`, plus `systemd-detect-virt` and `lsblk`
/// when external commands are enabled.
#[derive(Debug, Clone)]
pub struct LinuxProbe {
    root: PathBuf,
    commands: bool,
}

impl LinuxProbe {
    pub fn new() -> Self {
        Self {
            root: PathBuf::from("/"),
            commands: true,
        }
    }

    /// Probe a filesystem tree mounted somewhere other than `/`, without
    /// running any external command.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            commands: false,
        }
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    fn dmi(&self, name: &str) -> Option<String> {
        read_trimmed(self.path("sys/class/dmi/id").join(name))
            .filter(|value| !is_placeholder_serial(value))
    }

    fn interface_mac(&self, iface: &str) -> Option<String> {
        read_trimmed(self.path("sys/class/net").join(iface).join("address"))
            .and_then(|raw| normalize_mac(&raw))
    }

    fn smallest_interface_mac(&self) -> Option<String> {
        let entries = match fs::read_dir(self.path("sys/class/net")) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(error = %e, "cannot list network interfaces");
                return None;
            }
        };
        smallest(
            entries
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| entry.file_name().into_string().ok())
                .filter(|name| name != "lo")
                .filter_map(|name| self.interface_mac(&name)),
        )
    }

    fn disk_serial(&self) -> Option<String> {
        if !self.commands {
            return None;
        }
        let out = run_command("lsblk", &["--nodeps", "--noheadings", "-o", "SERIAL"])?;
        smallest(out.lines().map(|line| line.trim().to_string()))
    }
}

impl Default for LinuxProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareProbe for LinuxProbe {
    fn detect_virtual_machine(&self) -> bool {
        if self.commands {
            // Prints "none" and exits non-zero on bare metal.
            if let Some(kind) = run_command("systemd-detect-virt", &[]) {
                if kind != "none" {
                    return true;
                }
            }
        }

        let vendor_model = [
            self.dmi("sys_vendor"),
            self.dmi("product_name"),
            self.dmi("board_vendor"),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");
        if looks_virtual(&vendor_model) {
            return true;
        }

        read_trimmed(self.path("proc/cpuinfo"))
            .map(|cpuinfo| cpu_has_hypervisor_flag(&cpuinfo))
            .unwrap_or(false)
    }

    fn active_interface_mac(&self) -> Option<String> {
        let routed = read_trimmed(self.path("proc/net/route"))
            .and_then(|table| default_route_interface(&table))
            .and_then(|iface| self.interface_mac(&iface));
        routed.or_else(|| self.smallest_interface_mac())
    }

    fn platform_identifiers(&self, virtual_machine: bool) -> Vec<String> {
        let mut ids = Vec::new();
        if let Some(uuid) = self.dmi("product_uuid") {
            ids.push(format!("dmi-uuid={}", uuid.to_ascii_lowercase()));
        }
        if let Some(machine_id) = read_trimmed(self.path("etc/machine-id")) {
            ids.push(format!("machine-id={}", machine_id));
        }
        if virtual_machine {
            // Serials of emulated boards and disks are commonly cloned or spoofed.
            return ids;
        }
        if let Some(serial) = self.dmi("board_serial") {
            ids.push(format!("board-serial={}", serial));
        }
        if let Some(serial) = self.dmi("product_serial") {
            ids.push(format!("product-serial={}", serial));
        }
        if let Some(serial) = self.disk_serial() {
            ids.push(format!("disk-serial={}", serial));
        }
        ids
    }

    fn cpu_identifier(&self) -> Option<String> {
        read_trimmed(self.path("proc/cpuinfo")).and_then(|cpuinfo| cpu_serial(&cpuinfo))
    }
}

/// Interface of the default route with the lowest metric in a
/// `/proc/net/route` table.
fn default_route_interface(table: &str) -> Option<String> {
    table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 8 || cols[1] != "00000000" || cols[7] != "00000000" {
                return None;
            }
            let metric = cols[6].parse::<u32>().unwrap_or(u32::MAX);
            Some((metric, cols[0].to_string()))
        })
        .min()
        .map(|(_, iface)| iface)
}

/// The `Serial` line some ARM boards expose in `/proc/cpuinfo`.
fn cpu_serial(cpuinfo: &str) -> Option<String> {
    cpuinfo.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if key.trim() == "Serial" {
            non_empty(value.trim()).filter(|v| v.chars().any(|c| c != '0'))
        } else {
            None
        }
    })
}

fn cpu_has_hypervisor_flag(cpuinfo: &str) -> bool {
    cpuinfo.lines().any(|line| {
        line.split_once(':').is_some_and(|(key, value)| {
            key.trim() == "flags" && value.split_whitespace().any(|flag| flag == "hypervisor")
        })
    })
}

/// Firmware vendors fill unset serials with filler text.
fn is_placeholder_serial(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    lower.contains("to be filled")
        || lower == "default string"
        || lower == "not specified"
        || lower == "none"
        || value.chars().all(|c| c == '0' || c == '-' || c == ' ')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    const ROUTE_TABLE: &str = "Iface\tDestination\tGateway \tFlags\tRefCnt\tUse\tMetric\tMask\t\tMTU\tWindow\tIRTT\n\
        wlan0\t00000000\t0101A8C0\t0003\t0\t0\t600\t00000000\t0\t0\t0\n\
        eth0\t00000000\t0101A8C0\t0003\t0\t0\t100\t00000000\t0\t0\t0\n\
        eth0\t0001A8C0\t00000000\t0001\t0\t0\t100\t00FFFFFF\t0\t0\t0\n";

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_default_route_lowest_metric() {
        assert_eq!(default_route_interface(ROUTE_TABLE).as_deref(), Some("eth0"));
    }

    #[test]
    fn test_no_default_route() {
        let table = "Iface\tDestination\tGateway\tFlags\tRefCnt\tUse\tMetric\tMask\n\
            eth0\t0001A8C0\t00000000\t0001\t0\t0\t100\t00FFFFFF\n";
        assert_eq!(default_route_interface(table), None);
    }

    #[test]
    fn test_cpu_serial() {
        let cpuinfo = "processor\t: 0\nHardware\t: BCM2835\nSerial\t\t: 10000000abcdef01\n";
        assert_eq!(cpu_serial(cpuinfo).as_deref(), Some("10000000abcdef01"));
        assert_eq!(cpu_serial("Serial\t: 0000000000000000\n"), None);
        assert_eq!(cpu_serial("processor\t: 0\n"), None);
    }

    #[test]
    fn test_hypervisor_flag() {
        assert!(cpu_has_hypervisor_flag("flags\t\t: fpu vme hypervisor lahf_lm\n"));
        assert!(!cpu_has_hypervisor_flag("flags\t\t: fpu vme lahf_lm\n"));
    }

    #[test]
    fn test_placeholder_serials_rejected() {
        assert!(is_placeholder_serial("To Be Filled By O.E.M."));
        assert!(is_placeholder_serial("0000-0000"));
        assert!(!is_placeholder_serial("PF2ABCDE"));
    }

    #[test]
    fn test_routed_interface_mac() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "proc/net/route", ROUTE_TABLE);
        write(dir.path(), "sys/class/net/eth0/address", "AA:BB:CC:DD:EE:01\n");
        write(dir.path(), "sys/class/net/wlan0/address", "00:11:22:33:44:55\n");

        let probe = LinuxProbe::with_root(dir.path());
        assert_eq!(
            probe.active_interface_mac().as_deref(),
            Some("aa:bb:cc:dd:ee:01")
        );
    }

    #[test]
    fn test_fallback_to_smallest_mac() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "sys/class/net/lo/address", "00:00:00:00:00:00\n");
        write(dir.path(), "sys/class/net/eth1/address", "bb:00:00:00:00:02\n");
        write(dir.path(), "sys/class/net/eth0/address", "aa:00:00:00:00:09\n");

        let probe = LinuxProbe::with_root(dir.path());
        assert_eq!(
            probe.active_interface_mac().as_deref(),
            Some("aa:00:00:00:00:09")
        );
    }

    #[test]
    fn test_vm_skips_serials() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "sys/class/dmi/id/sys_vendor", "QEMU\n");
        write(dir.path(), "sys/class/dmi/id/product_uuid", "ABCD-1234\n");
        write(dir.path(), "sys/class/dmi/id/board_serial", "BOARD-1\n");
        write(dir.path(), "etc/machine-id", "0123456789abcdef\n");

        let probe = LinuxProbe::with_root(dir.path());
        assert!(probe.detect_virtual_machine());
        assert_eq!(
            probe.platform_identifiers(true),
            vec!["dmi-uuid=abcd-1234", "machine-id=0123456789abcdef"]
        );
        assert_eq!(
            probe.platform_identifiers(false),
            vec![
                "dmi-uuid=abcd-1234",
                "machine-id=0123456789abcdef",
                "board-serial=BOARD-1"
            ]
        );
    }

    #[test]
    fn test_empty_root_finds_nothing() {
        let dir = TempDir::new().unwrap();
        let probe = LinuxProbe::with_root(dir.path());
        assert!(!probe.detect_virtual_machine());
        assert!(probe.active_interface_mac().is_none());
        assert!(probe.platform_identifiers(false).is_empty());
        assert!(probe.cpu_identifier().is_none());
    }
}
