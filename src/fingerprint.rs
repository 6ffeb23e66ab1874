//! Machine identification
//!
//! Identifiers gathered by a [`HardwareProbe`] are deduplicated, sorted,
//! joined and hashed with SHA-256; the first 8 bytes of the digest, read as
//! a little-endian integer, are the machine identifier. Sorting makes the
//! result independent of the order the probes ran in.

use crate::error::{ErrorCategory, ErrorKind, Result, SconfigError};
use crate::probe::{HardwareProbe, SystemProbe};
use sha2::{Digest, Sha256};

const IDENTIFIER_SEPARATOR: &str = "|";

/// Trait for obtaining the 64-bit machine identifier from various sources
pub trait HardwareIdSource {
    fn hardware_id(&mut self) -> Result<u64>;
}

/// Returns a fixed identifier (for testing and migrating files between machines)
pub struct FixedHardwareId {
    id: u64,
}

impl FixedHardwareId {
    pub fn new(id: u64) -> Self {
        Self { id }
    }
}

impl HardwareIdSource for FixedHardwareId {
    fn hardware_id(&mut self) -> Result<u64> {
        Ok(self.id)
    }
}

/// Delegates to a caller-supplied function
pub struct FnHardwareId<F> {
    f: F,
}

impl<F> FnHardwareId<F>
where
    F: FnMut() -> Result<u64>,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> HardwareIdSource for FnHardwareId<F>
where
    F: FnMut() -> Result<u64>,
{
    fn hardware_id(&mut self) -> Result<u64> {
        (self.f)()
    }
}

/// Fingerprints the host through a [`HardwareProbe`]
pub struct ProbeHardwareId<P> {
    probe: P,
}

impl<P: HardwareProbe> ProbeHardwareId<P> {
    pub fn new(probe: P) -> Self {
        Self { probe }
    }
}

impl ProbeHardwareId<SystemProbe> {
    /// Fingerprint the machine this process runs on.
    pub fn system() -> Self {
        Self::new(SystemProbe::default())
    }
}

impl<P: HardwareProbe> HardwareIdSource for ProbeHardwareId<P> {
    fn hardware_id(&mut self) -> Result<u64> {
        fold_identifiers(collect_identifiers(&self.probe))
    }
}

/// Gather every identifier the probe can provide. CPU identifiers are
/// skipped on virtual machines.
pub fn collect_identifiers(probe: &dyn HardwareProbe) -> Vec<String> {
    let virtual_machine = probe.detect_virtual_machine();
    tracing::debug!(virtual_machine, "probing hardware identifiers");

    let mut ids = Vec::new();
    if let Some(mac) = probe.active_interface_mac() {
        ids.push(format!("mac={}", mac));
    }
    ids.extend(probe.platform_identifiers(virtual_machine));
    if !virtual_machine {
        if let Some(cpu) = probe.cpu_identifier() {
            ids.push(format!("cpu={}", cpu));
        }
    }
    ids
}

/// Fold identifiers into the 64-bit machine identifier.
pub fn fold_identifiers(mut ids: Vec<String>) -> Result<u64> {
    ids.retain(|id| !id.is_empty());
    ids.sort();
    ids.dedup();

    if ids.is_empty() {
        return Err(SconfigError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::HardwareIdentificationFailed,
            "no hardware identifiers found; cannot derive the encryption key",
        ));
    }
    tracing::debug!(count = ids.len(), "folding hardware identifiers");

    let digest = Sha256::digest(ids.join(IDENTIFIER_SEPARATOR).as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    Ok(u64::from_le_bytes(head))
}

/// Identifier of the machine this process runs on.
pub fn machine_id() -> Result<u64> {
    ProbeHardwareId::system().hardware_id()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::NullProbe;

    struct FakeProbe {
        virtual_machine: bool,
        mac: Option<&'static str>,
        platform: Vec<&'static str>,
        cpu: Option<&'static str>,
    }

    impl HardwareProbe for FakeProbe {
        fn detect_virtual_machine(&self) -> bool {
            self.virtual_machine
        }

        fn active_interface_mac(&self) -> Option<String> {
            self.mac.map(str::to_string)
        }

        fn platform_identifiers(&self, _virtual_machine: bool) -> Vec<String> {
            self.platform.iter().map(|s| s.to_string()).collect()
        }

        fn cpu_identifier(&self) -> Option<String> {
            self.cpu.map(str::to_string)
        }
    }

    fn physical() -> FakeProbe {
        FakeProbe {
            virtual_machine: false,
            mac: Some("aa:bb:cc:dd:ee:ff"),
            platform: vec!["dmi-uuid=1234", "board-serial=XYZ"],
            cpu: Some("BFEBFBFF000906EA"),
        }
    }

    #[test]
    fn test_order_independent() {
        let a = vec!["b".to_string(), "a".to_string(), "c".to_string()];
        let b = vec!["c".to_string(), "b".to_string(), "a".to_string()];
        assert_eq!(fold_identifiers(a).unwrap(), fold_identifiers(b).unwrap());
    }

    #[test]
    fn test_duplicates_ignored() {
        let a = vec!["a".to_string(), "b".to_string()];
        let b = vec!["a".to_string(), "b".to_string(), "a".to_string()];
        assert_eq!(fold_identifiers(a).unwrap(), fold_identifiers(b).unwrap());
    }

    #[test]
    fn test_fixed_byte_order() {
        let digest = Sha256::digest(b"a|b");
        let expected = u64::from_le_bytes(digest[..8].try_into().unwrap());
        let ids = vec!["b".to_string(), "a".to_string()];
        assert_eq!(fold_identifiers(ids).unwrap(), expected);
    }

    #[test]
    fn test_different_sets_differ() {
        let a = vec!["mac=aa:bb:cc:dd:ee:ff".to_string()];
        let b = vec!["mac=aa:bb:cc:dd:ee:fe".to_string()];
        assert_ne!(fold_identifiers(a).unwrap(), fold_identifiers(b).unwrap());
    }

    #[test]
    fn test_no_identifiers() {
        let err = fold_identifiers(vec![String::new()]).expect_err("expected failure");
        assert_eq!(err.kind, Some(ErrorKind::HardwareIdentificationFailed));

        let err = ProbeHardwareId::new(NullProbe)
            .hardware_id()
            .expect_err("expected failure");
        assert_eq!(err.kind, Some(ErrorKind::HardwareIdentificationFailed));
    }

    #[test]
    fn test_collect_physical() {
        let ids = collect_identifiers(&physical());
        assert_eq!(
            ids,
            vec![
                "mac=aa:bb:cc:dd:ee:ff",
                "dmi-uuid=1234",
                "board-serial=XYZ",
                "cpu=BFEBFBFF000906EA"
            ]
        );
    }

    #[test]
    fn test_vm_skips_cpu() {
        let probe = FakeProbe {
            virtual_machine: true,
            ..physical()
        };
        let ids = collect_identifiers(&probe);
        assert!(ids.iter().all(|id| !id.starts_with("cpu=")));
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_probe_source_is_stable() {
        let mut first = ProbeHardwareId::new(physical());
        let mut second = ProbeHardwareId::new(physical());
        assert_eq!(first.hardware_id().unwrap(), second.hardware_id().unwrap());
    }

    #[test]
    fn test_fixed_and_fn_sources() {
        assert_eq!(FixedHardwareId::new(12345).hardware_id().unwrap(), 12345);

        let mut calls = 0;
        let mut source = FnHardwareId::new(|| {
            calls += 1;
            Ok(99)
        });
        assert_eq!(source.hardware_id().unwrap(), 99);
        assert_eq!(source.hardware_id().unwrap(), 99);
        drop(source);
        assert_eq!(calls, 2);
    }
}
