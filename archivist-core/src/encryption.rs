//! AES-256-GCM archive encryption
//!
//! Archives are sealed into a single self-describing blob:
//! `[nonce: 12 bytes][tag: 16 bytes][ciphertext]`. Each call draws a fresh
//! nonce from the OS RNG; callers never supply one.

use std::fmt;

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::{
    aead::{AeadInPlace, KeyInit, OsRng},
    Aes256Gcm, Nonce, Tag,
};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{ArchivistError, Result};

/// Size of the AES-GCM nonce in bytes (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Size of the AES-GCM authentication tag in bytes
pub const TAG_SIZE: usize = 16;

/// Size of an AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Bytes of framing added to every sealed archive
pub const HEADER_SIZE: usize = NONCE_SIZE + TAG_SIZE;

/// Process-wide archive key, loaded once from configuration
///
/// The key bytes are wiped on drop and never appear in `Debug` output.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    /// Wrap raw key bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse a key from 64 hex characters
    pub fn from_hex(encoded: &str) -> Result<Self> {
        let mut decoded = hex::decode(encoded.trim())
            .map_err(|e| ArchivistError::config(format!("Invalid encryption key encoding: {e}")))?;

        if decoded.len() != KEY_SIZE {
            let len = decoded.len();
            decoded.zeroize();
            return Err(ArchivistError::config(format!(
                "Invalid encryption key length: expected {KEY_SIZE} bytes, got {len}"
            )));
        }

        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self(bytes))
    }

    /// Generate a random key (useful for tests and key provisioning tools)
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

impl TryFrom<String> for EncryptionKey {
    type Error = ArchivistError;

    fn try_from(value: String) -> Result<Self> {
        Self::from_hex(&value)
    }
}

impl<'de> serde::Deserialize<'de> for EncryptionKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        Self::from_hex(&encoded).map_err(serde::de::Error::custom)
    }
}

fn cipher(key: &EncryptionKey) -> Result<Aes256Gcm> {
    Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| ArchivistError::Encryption(format!("Failed to create cipher: {e}")))
}

/// Encrypt plaintext into a packed `nonce || tag || ciphertext` blob
pub fn encrypt(plaintext: &[u8], key: &EncryptionKey) -> Result<Vec<u8>> {
    let cipher = cipher(key)?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(nonce, &[], &mut buffer)
        .map_err(|e| ArchivistError::Encryption(format!("Encryption failed: {e}")))?;

    let mut packed = Vec::with_capacity(HEADER_SIZE + buffer.len());
    packed.extend_from_slice(&nonce_bytes);
    packed.extend_from_slice(tag.as_slice());
    packed.extend_from_slice(&buffer);
    Ok(packed)
}

/// Decrypt a packed blob produced by [`encrypt`]
///
/// Fails closed with `ArchivistError::Authentication` for short input, a
/// wrong key, or any modified byte. No plaintext is returned on failure.
pub fn decrypt(packed: &[u8], key: &EncryptionKey) -> Result<Vec<u8>> {
    if packed.len() < HEADER_SIZE {
        return Err(ArchivistError::Authentication);
    }

    let cipher = cipher(key)?;
    let (nonce_bytes, rest) = packed.split_at(NONCE_SIZE);
    let (tag_bytes, ciphertext) = rest.split_at(TAG_SIZE);

    let mut buffer = ciphertext.to_vec();
    match cipher.decrypt_in_place_detached(
        Nonce::from_slice(nonce_bytes),
        &[],
        &mut buffer,
        Tag::from_slice(tag_bytes),
    ) {
        Ok(()) => Ok(buffer),
        Err(_) => {
            buffer.zeroize();
            Err(ArchivistError::Authentication)
        }
    }
}
