//! Expansion of a 64-bit machine identifier into a 256-bit key
//!
//! The identifier seeds a ChaCha20 stream and the first 32 bytes of that
//! stream become the key. The stream is fully deterministic: the same
//! machine always yields the same key, which is the whole point. It must
//! never be swapped for an OS-random source.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::fmt;
use zeroize::Zeroizing;

/// Length of derived key in bytes
pub const KEY_LEN: usize = 32;

/// Symmetric key bound to one machine. Wiped from memory on drop and never
/// written anywhere.
pub struct EncryptionKey {
    bytes: Zeroizing<[u8; KEY_LEN]>,
}

impl EncryptionKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

/// Derive the key for `hardware_id`.
pub fn derive_key(hardware_id: u64) -> EncryptionKey {
    let mut rng = ChaCha20Rng::seed_from_u64(hardware_id);
    let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
    rng.fill_bytes(bytes.as_mut());
    EncryptionKey { bytes }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_key() {
        assert_eq!(derive_key(42).as_bytes(), derive_key(42).as_bytes());
    }

    #[test]
    fn test_different_seed_different_key() {
        assert_ne!(derive_key(42).as_bytes(), derive_key(43).as_bytes());
    }

    #[test]
    fn test_key_is_not_trivial() {
        let key = derive_key(0);
        assert!(key.as_bytes().iter().any(|&b| b != 0));
    }

    #[test]
    fn test_debug_does_not_leak() {
        let key = derive_key(7);
        assert_eq!(format!("{:?}", key), "EncryptionKey(..)");
    }
}
