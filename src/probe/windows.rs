use super::{HardwareProbe, looks_virtual, normalize_mac, run_command, smallest, table_values};

/// Asks `wmic`, `reg`, PowerShell and `getmac`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsProbe;

const ACTIVE_MAC_SCRIPT: &str = "$r = Get-NetRoute -DestinationPrefix '0.0.0.0/0' | \
    Sort-Object RouteMetric | Select-Object -First 1; \
    (Get-NetAdapter -InterfaceIndex $r.InterfaceIndex).MacAddress";

impl WindowsProbe {
    pub fn new() -> Self {
        Self
    }

    fn wmic_first(&self, class: &str, property: &str) -> Option<String> {
        run_command("wmic", &[class, "get", property])
            .and_then(|out| table_values(&out).into_iter().next())
    }
}

impl HardwareProbe for WindowsProbe {
    fn detect_virtual_machine(&self) -> bool {
        run_command("wmic", &["computersystem", "get", "Manufacturer,Model"])
            .map(|out| looks_virtual(&out))
            .unwrap_or(false)
    }

    fn active_interface_mac(&self) -> Option<String> {
        let routed = run_command(
            "powershell",
            &["-NoProfile", "-NonInteractive", "-Command", ACTIVE_MAC_SCRIPT],
        )
        .and_then(|out| normalize_mac(&out));
        routed.or_else(|| {
            run_command("getmac", &["/fo", "csv", "/nh"])
                .and_then(|out| smallest(getmac_addresses(&out)))
        })
    }

    fn platform_identifiers(&self, virtual_machine: bool) -> Vec<String> {
        let mut ids = Vec::new();
        if let Some(guid) = run_command(
            "reg",
            &[
                "query",
                r"HKLM\SOFTWARE\Microsoft\Cryptography",
                "/v",
                "MachineGuid",
            ],
        )
        .and_then(|out| machine_guid(&out))
        {
            ids.push(format!("machine-guid={}", guid.to_ascii_lowercase()));
        }
        if let Some(uuid) = self.wmic_first("csproduct", "UUID") {
            ids.push(format!("smbios-uuid={}", uuid.to_ascii_lowercase()));
        }
        if virtual_machine {
            return ids;
        }
        if let Some(serial) = self.wmic_first("baseboard", "SerialNumber") {
            ids.push(format!("board-serial={}", serial));
        }
        if let Some(product) = self.wmic_first("baseboard", "Product") {
            ids.push(format!("board-product={}", product));
        }
        if let Some(serial) = run_command("wmic", &["diskdrive", "get", "SerialNumber"])
            .and_then(|out| smallest(table_values(&out)))
        {
            ids.push(format!("disk-serial={}", serial));
        }
        ids
    }

    fn cpu_identifier(&self) -> Option<String> {
        self.wmic_first("cpu", "ProcessorId")
    }
}

/// First column of `getmac /fo csv /nh` lines.
fn getmac_addresses(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split(',').next())
        .filter_map(|field| normalize_mac(field.trim().trim_matches('"')))
        .collect()
}

/// Last token of the `MachineGuid    REG_SZ    <guid>` line.
fn machine_guid(output: &str) -> Option<String> {
    output
        .lines()
        .find(|line| line.trim_start().starts_with("MachineGuid"))
        .and_then(|line| line.split_whitespace().last())
        .map(str::to_string)
}
