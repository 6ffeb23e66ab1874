use super::{HardwareProbe, looks_virtual, normalize_mac, run_command, smallest};

/// Asks `sysctl`, `route`, `ifconfig` and `ioreg`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MacProbe;

impl MacProbe {
    pub fn new() -> Self {
        Self
    }
}

impl HardwareProbe for MacProbe {
    fn detect_virtual_machine(&self) -> bool {
        if run_command("sysctl", &["-n", "kern.hv_vmm_present"]).as_deref() == Some("1") {
            return true;
        }
        run_command("sysctl", &["-n", "hw.model"])
            .map(|model| looks_virtual(&model))
            .unwrap_or(false)
    }

    fn active_interface_mac(&self) -> Option<String> {
        let routed = run_command("route", &["-n", "get", "default"])
            .and_then(|out| route_interface(&out))
            .and_then(|iface| run_command("ifconfig", &[iface.as_str()]))
            .and_then(|out| ether_addresses(&out).into_iter().next());
        routed.or_else(|| {
            run_command("ifconfig", &[]).and_then(|out| smallest(ether_addresses(&out)))
        })
    }

    fn platform_identifiers(&self, virtual_machine: bool) -> Vec<String> {
        let Some(out) = run_command("ioreg", &["-rd1", "-c", "IOPlatformExpertDevice"]) else {
            return Vec::new();
        };
        let mut ids = Vec::new();
        if let Some(uuid) = ioreg_value(&out, "IOPlatformUUID") {
            ids.push(format!("platform-uuid={}", uuid.to_ascii_lowercase()));
        }
        if !virtual_machine {
            if let Some(serial) = ioreg_value(&out, "IOPlatformSerialNumber") {
                ids.push(format!("platform-serial={}", serial));
            }
        }
        ids
    }

    fn cpu_identifier(&self) -> Option<String> {
        None
    }
}

/// `interface: en0` line of `route -n get default`.
fn route_interface(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        (key.trim() == "interface").then(|| value.trim().to_string())
    })
}

fn ether_addresses(ifconfig: &str) -> Vec<String> {
    ifconfig
        .lines()
        .filter_map(|line| {
            let mut words = line.split_whitespace();
            match words.next() {
                Some("ether") => words.next().and_then(normalize_mac),
                _ => None,
            }
        })
        .collect()
}

/// Value of a `"Key" = "value"` line in `ioreg` output.
fn ioreg_value(output: &str, key: &str) -> Option<String> {
    let needle = format!("\"{}\"", key);
    output.lines().find_map(|line| {
        let (lhs, rhs) = line.split_once('=')?;
        if lhs.trim() != needle {
            return None;
        }
        let value = rhs.trim().trim_matches('"');
        (!value.is_empty()).then(|| value.to_string())
    })
}
