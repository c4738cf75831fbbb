//! AES-256-GCM sealing and opening of individual field values.
//!
//! **Nonce size:** 16 bytes rather than the usual 12. Stored envelopes were
//! written with a 128-bit IV, so the GCM instance is parameterised on `U16`;
//! the longer nonce is hashed into the initial counter block per NIST SP 800-38D.
//!
//! **Never reuse a nonce with the same key.** Each envelope gets a fresh salt
//! (and so a fresh derived key) plus a fresh random nonce.

use aes_gcm::{
    aead::{
        consts::U16, generic_array::GenericArray, rand_core::RngCore, AeadInPlace, KeyInit,
        OsRng,
    },
    aes::Aes256,
    AesGcm,
};
use thiserror::Error;
use zeroize::Zeroizing;

use super::kdf::DerivedKey;

/// Byte length of the GCM nonce (128 bits).
pub const NONCE_LEN: usize = 16;

/// Byte length of the GCM authentication tag (128 bits).
pub const TAG_LEN: usize = 16;

/// Identifier recorded in audit records.
pub const ALGORITHM: &str = "aes-256-gcm";

type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// Output of [`seal`]: the raw components later packed into an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub nonce: [u8; NONCE_LEN],
    pub tag: [u8; TAG_LEN],
    pub ciphertext: Vec<u8>,
}

/// Errors produced by the cipher layer.
#[derive(Debug, Error)]
pub enum CipherError {
    /// The key could not be loaded into the cipher.
    #[error("invalid key length")]
    InvalidKeyLength,

    /// Empty values are never sealed.
    #[error("plaintext must not be empty")]
    EmptyPlaintext,

    /// AES-GCM encryption failed.
    #[error("aead seal failed")]
    SealFailure,

    /// The tag did not verify: wrong key or tampered data.
    #[error("aead authentication failed")]
    AuthenticationFailure,
}

/// Encrypt `plaintext` under `key` with a fresh random nonce.
///
/// # Errors
///
/// Returns [`CipherError::EmptyPlaintext`] for empty input and
/// [`CipherError::SealFailure`] on an internal AEAD error.
pub fn seal(plaintext: &[u8], key: &DerivedKey) -> Result<Sealed, CipherError> {
    if plaintext.is_empty() {
        return Err(CipherError::EmptyPlaintext);
    }
    let cipher = build_cipher(key)?;

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    // Plaintext is copied into a zeroising buffer and encrypted in place.
    let mut buffer = Zeroizing::new(plaintext.to_vec());
    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(&nonce), b"", &mut *buffer)
        .map_err(|_| CipherError::SealFailure)?;

    let mut tag_bytes = [0u8; TAG_LEN];
    tag_bytes.copy_from_slice(&tag);

    Ok(Sealed {
        nonce,
        tag: tag_bytes,
        ciphertext: std::mem::take(&mut *buffer),
    })
}

/// Decrypt and authenticate a sealed value.
///
/// The tag is checked before any plaintext is handed back; on failure the
/// working buffer is zeroed and dropped.
///
/// # Errors
///
/// Returns [`CipherError::AuthenticationFailure`] if the tag does not verify.
pub fn open(
    nonce: &[u8; NONCE_LEN],
    tag: &[u8; TAG_LEN],
    ciphertext: &[u8],
    key: &DerivedKey,
) -> Result<Zeroizing<Vec<u8>>, CipherError> {
    let cipher = build_cipher(key)?;
    let mut buffer = Zeroizing::new(ciphertext.to_vec());
    cipher
        .decrypt_in_place_detached(
            GenericArray::from_slice(nonce),
            b"",
            &mut *buffer,
            GenericArray::from_slice(tag),
        )
        .map_err(|_| CipherError::AuthenticationFailure)?;
    Ok(buffer)
}

fn build_cipher(key: &DerivedKey) -> Result<Aes256Gcm16, CipherError> {
    Aes256Gcm16::new_from_slice(key.as_bytes()).map_err(|_| CipherError::InvalidKeyLength)
}
