//! The explicit vault state shared by every load call

use crate::error::Result;
use crate::fingerprint::{HardwareIdSource, ProbeHardwareId};
use crate::keyderive::{EncryptionKey, derive_key};
use crate::placeholder::{Locale, Placeholders};
use crate::secretcrypt::SecretCodec;
use std::sync::OnceLock;

/// Derived key plus marker table. Build one at startup and hand it to every
/// loader; the key is computed exactly once, when the context is built.
#[derive(Debug)]
pub struct VaultContext {
    key: EncryptionKey,
    placeholders: Placeholders,
}

static SHARED: OnceLock<VaultContext> = OnceLock::new();

impl VaultContext {
    /// Fingerprint this machine and derive the key from it.
    pub fn from_system(locale: Locale) -> Result<Self> {
        Self::from_source(&mut ProbeHardwareId::system(), locale)
    }

    /// Derive the key from any identifier source.
    pub fn from_source(source: &mut dyn HardwareIdSource, locale: Locale) -> Result<Self> {
        let hardware_id = source.hardware_id()?;
        Ok(Self::from_hardware_id(hardware_id, locale))
    }

    pub fn from_hardware_id(hardware_id: u64, locale: Locale) -> Self {
        Self {
            key: derive_key(hardware_id),
            placeholders: Placeholders::new(locale),
        }
    }

    /// Process-wide context for this machine, using the environment locale.
    ///
    /// The first successful call wins; later calls return the same context
    /// without probing the hardware again. A failed probe is not memoized.
    pub fn shared() -> Result<&'static VaultContext> {
        if let Some(ctx) = SHARED.get() {
            return Ok(ctx);
        }
        let ctx = Self::from_system(Locale::from_env())?;
        Ok(SHARED.get_or_init(|| ctx))
    }

    pub fn codec(&self) -> SecretCodec<'_> {
        SecretCodec::new(&self.key)
    }

    pub fn placeholders(&self) -> &Placeholders {
        &self.placeholders
    }

    /// Seal a single value with this machine's key.
    pub fn seal(&self, plaintext: &str) -> Result<String> {
        self.codec().seal(plaintext)
    }

    /// Open a single value sealed with this machine's key.
    pub fn open(&self, sealed: &str) -> Result<String> {
        self.codec().open(sealed)
    }
}
