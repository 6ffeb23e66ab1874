//! Sealing and opening of secrets with AES-256-GCM
//!
//! A sealed value is the standard-alphabet base64 encoding of:
//! - nonce: 12 bytes (fresh and random for every seal)
//! - ciphertext: same length as the plaintext
//! - tag: 16 bytes (GCM authentication tag)
//!
//! The nonce and tag sizes are fixed, so the layout is self-describing.

use crate::error::{ErrorCategory, ErrorKind, Result, SconfigError};
use crate::keyderive::EncryptionKey;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64_STANDARD};
use rand::RngCore;
use rand::rngs::OsRng;

/// Length of nonce in bytes
pub const NONCE_LEN: usize = 12;

/// Length of the GCM authentication tag in bytes
pub const TAG_LEN: usize = 16;

/// Seals and opens secrets under one derived key.
pub struct SecretCodec<'k> {
    key: &'k EncryptionKey,
}

impl<'k> SecretCodec<'k> {
    pub fn new(key: &'k EncryptionKey) -> Self {
        Self { key }
    }

    /// Seal `plaintext` under a random nonce.
    ///
    /// Two seals of the same plaintext never produce the same output.
    pub fn seal(&self, plaintext: &str) -> Result<String> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        self.seal_with_nonce(plaintext, &nonce)
    }

    /// Seal `plaintext` under a caller-provided nonce.
    ///
    /// This function is ONLY for testing purposes to generate deterministic output.
    /// NEVER reuse a nonce in production - always use `seal()`.
    pub fn seal_with_nonce(&self, plaintext: &str, nonce: &[u8; NONCE_LEN]) -> Result<String> {
        let cipher = self.cipher();
        let sealed = cipher
            .encrypt(Nonce::from_slice(nonce), plaintext.as_bytes())
            .map_err(|_| {
                SconfigError::with_kind(
                    ErrorCategory::Internal,
                    ErrorKind::EncryptionFailed,
                    "encryption failed",
                )
            })?;

        let mut output = Vec::with_capacity(NONCE_LEN + sealed.len());
        output.extend_from_slice(nonce);
        output.extend_from_slice(&sealed);

        Ok(BASE64_STANDARD.encode(output))
    }

    /// Open a value produced by `seal` on this machine.
    pub fn open(&self, sealed: &str) -> Result<String> {
        let data = BASE64_STANDARD.decode(sealed.trim()).map_err(|e| {
            SconfigError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::DecryptionFailed,
                format!("base64 decoding of sealed value failed: {}", e),
                e,
            )
        })?;

        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(SconfigError::with_kind(
                ErrorCategory::User,
                ErrorKind::DecryptionFailed,
                "sealed value likely truncated; shorter than nonce and tag",
            ));
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);

        let plaintext = self
            .cipher()
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| {
                SconfigError::with_kind(
                    ErrorCategory::User,
                    ErrorKind::DecryptionFailed,
                    "corrupt or tampered-with sealed value, or it was sealed on another machine",
                )
            })?;

        String::from_utf8(plaintext).map_err(|e| {
            SconfigError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::DecryptionFailed,
                "decrypted secret is not valid UTF-8",
                e,
            )
        })
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.key.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyderive::derive_key;

    fn key() -> EncryptionKey {
        derive_key(12345)
    }

    #[test]
    fn test_small_plaintext() {
        let key = key();
        let codec = SecretCodec::new(&key);

        let sealed = codec.seal("hello").unwrap();
        assert_eq!(codec.open(&sealed).unwrap(), "hello");
    }

    #[test]
    fn test_unicode_plaintext() {
        let key = key();
        let codec = SecretCodec::new(&key);

        let sealed = codec.seal("pässwörd ✓").unwrap();
        assert_eq!(codec.open(&sealed).unwrap(), "pässwörd ✓");
    }

    #[test]
    fn test_random_nonce_different_output() {
        let key = key();
        let codec = SecretCodec::new(&key);

        let s1 = codec.seal("s3cret").unwrap();
        let s2 = codec.seal("s3cret").unwrap();

        assert_ne!(s1, s2);
        assert_eq!(codec.open(&s1).unwrap(), "s3cret");
        assert_eq!(codec.open(&s2).unwrap(), "s3cret");
    }

    #[test]
    fn test_deterministic_seal() {
        let key = key();
        let codec = SecretCodec::new(&key);
        let nonce = [7u8; NONCE_LEN];

        let s1 = codec.seal_with_nonce("same", &nonce).unwrap();
        let s2 = codec.seal_with_nonce("same", &nonce).unwrap();
        assert_eq!(s1, s2);
    }

    #[test]
    fn test_layout() {
        let key = key();
        let codec = SecretCodec::new(&key);
        let nonce = [0x24u8; NONCE_LEN];

        let sealed = codec.seal_with_nonce("abcd", &nonce).unwrap();
        let raw = BASE64_STANDARD.decode(&sealed).unwrap();

        assert_eq!(raw.len(), NONCE_LEN + 4 + TAG_LEN);
        assert_eq!(&raw[..NONCE_LEN], &nonce);
    }

    #[test]
    fn test_wrong_key() {
        let key_a = derive_key(1);
        let key_b = derive_key(2);

        let sealed = SecretCodec::new(&key_a).seal("secret data").unwrap();
        let err = SecretCodec::new(&key_b)
            .open(&sealed)
            .expect_err("expected authentication failure");

        assert_eq!(err.kind, Some(ErrorKind::DecryptionFailed));
        assert!(err.to_string().contains("sealed on another machine"));
    }

    #[test]
    fn test_bad_base64() {
        let key = key();
        let err = SecretCodec::new(&key)
            .open("not$$base64")
            .expect_err("expected base64 error");
        assert_eq!(err.kind, Some(ErrorKind::DecryptionFailed));
    }

    #[test]
    fn test_truncated() {
        let key = key();
        let short = BASE64_STANDARD.encode([0u8; NONCE_LEN + TAG_LEN - 1]);
        let err = SecretCodec::new(&key)
            .open(&short)
            .expect_err("expected truncation error");

        assert_eq!(err.kind, Some(ErrorKind::DecryptionFailed));
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn test_tampered_ciphertext() {
        let key = key();
        let codec = SecretCodec::new(&key);

        let sealed = codec.seal("hello").unwrap();
        let mut raw = BASE64_STANDARD.decode(&sealed).unwrap();
        raw[NONCE_LEN] ^= 0x01;
        let tampered = BASE64_STANDARD.encode(raw);

        let err = codec.open(&tampered).expect_err("expected tamper detection");
        assert_eq!(err.kind, Some(ErrorKind::DecryptionFailed));
    }

    #[test]
    fn test_empty_plaintext_is_openable() {
        let key = key();
        let codec = SecretCodec::new(&key);

        let sealed = codec.seal("").unwrap();
        assert_eq!(codec.open(&sealed).unwrap(), "");
    }
}
