//! Master key handling and per-operation key derivation.
//!
//! ```text
//! master   = Argon2id(passphrase, installation_salt)        (once, at startup)
//! derived  = HKDF-SHA256(ikm = master, salt = envelope salt,
//!                        info = "telemed-v{version}")        (every operation)
//! ```
//!
//! Bumping the version changes every derived key even for an identical salt,
//! and a leaked derived key reveals nothing about the master or other versions.

use aes_gcm::aead::{rand_core::RngCore, OsRng};
use argon2::Argon2;
use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;
use vault_common::KeyVersion;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Byte length of master and derived keys (256 bits).
pub const KEY_LEN: usize = 32;

/// Byte length of the random per-envelope salt.
pub const SALT_LEN: usize = 64;

/// Minimum accepted length of the per-installation salt.
pub const MIN_INSTALLATION_SALT_LEN: usize = 16;

/// Domain-separation prefix of the HKDF info string.
const INFO_PREFIX: &str = "telemed-v";

/// Errors produced while building or using key material.
#[derive(Debug, Error)]
pub enum KdfError {
    /// Version 0 never identifies derivation parameters.
    #[error("key version {0} is not a derivation version")]
    InvalidVersion(KeyVersion),

    #[error("master passphrase must not be empty")]
    EmptyPassphrase,

    #[error("installation salt too short: expected at least {MIN_INSTALLATION_SALT_LEN} bytes, got {0}")]
    SaltTooShort(usize),

    /// Argon2 rejected its parameters.
    #[error("master key stretching failed: {0}")]
    Stretch(String),

    #[error("hkdf expand failed")]
    Expand,
}

/// Process-wide master key. Owned by the key registry.
///
/// Not `Clone`; overwritten with zeroes on drop; never printed.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    bytes: [u8; KEY_LEN],
}

impl MasterKey {
    /// Wrap raw key material obtained from a KMS, HSM, or test fixture.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Stretch a configured passphrase into a master key with Argon2id.
    ///
    /// # Errors
    ///
    /// Returns [`KdfError::EmptyPassphrase`] for a blank passphrase and
    /// [`KdfError::SaltTooShort`] if `installation_salt` is shorter than
    /// [`MIN_INSTALLATION_SALT_LEN`].
    pub fn from_passphrase(passphrase: &str, installation_salt: &[u8]) -> Result<Self, KdfError> {
        if passphrase.trim().is_empty() {
            return Err(KdfError::EmptyPassphrase);
        }
        if installation_salt.len() < MIN_INSTALLATION_SALT_LEN {
            return Err(KdfError::SaltTooShort(installation_salt.len()));
        }
        let mut bytes = [0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(passphrase.as_bytes(), installation_salt, &mut bytes)
            .map_err(|e| KdfError::Stretch(e.to_string()))?;
        Ok(Self { bytes })
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey([REDACTED])")
    }
}

/// A 256-bit key scoped to a single seal or open call.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    bytes: [u8; KEY_LEN],
}

impl DerivedKey {
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DerivedKey([REDACTED])")
    }
}

/// Derive the key for one envelope.
///
/// Pure function of its inputs: the same master, salt, and version always
/// produce the same key.
///
/// # Errors
///
/// Returns [`KdfError::InvalidVersion`] for version 0.
pub fn derive(
    master: &MasterKey,
    salt: &[u8; SALT_LEN],
    version: KeyVersion,
) -> Result<DerivedKey, KdfError> {
    if version.get() == 0 {
        return Err(KdfError::InvalidVersion(version));
    }
    let info = format!("{INFO_PREFIX}{}", version.get());
    let hk = Hkdf::<Sha256>::new(Some(salt.as_slice()), &master.bytes);
    let mut key = DerivedKey {
        bytes: [0u8; KEY_LEN],
    };
    hk.expand(info.as_bytes(), &mut key.bytes)
        .map_err(|_| KdfError::Expand)?;
    Ok(key)
}

/// Generate a fresh random envelope salt from the OS CSPRNG.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}
