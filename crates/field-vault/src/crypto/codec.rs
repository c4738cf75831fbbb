//! Packing and unpacking of the envelope byte layout.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;

use super::cipher::{Sealed, NONCE_LEN, TAG_LEN};
use super::kdf::SALT_LEN;

/// Length of the fixed-size prefix preceding the ciphertext.
pub const HEADER_LEN: usize = SALT_LEN + NONCE_LEN + TAG_LEN;

/// Errors produced by the codec. Always a storage or transport problem,
/// never a cryptographic verdict.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("envelope is not valid base64")]
    InvalidEncoding,

    /// The decoded envelope is too short to hold a header and ciphertext.
    #[error("envelope too short: expected more than {HEADER_LEN} bytes, got {0}")]
    InvalidLength(usize),
}

/// The raw components of one envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeParts {
    pub salt: [u8; SALT_LEN],
    pub nonce: [u8; NONCE_LEN],
    pub tag: [u8; TAG_LEN],
    pub ciphertext: Vec<u8>,
}

impl EnvelopeParts {
    /// Combine a fresh salt with the output of a seal.
    pub fn new(salt: [u8; SALT_LEN], sealed: Sealed) -> Self {
        Self {
            salt,
            nonce: sealed.nonce,
            tag: sealed.tag,
            ciphertext: sealed.ciphertext,
        }
    }
}

/// Encode parts as `base64(salt ‖ nonce ‖ tag ‖ ciphertext)`.
pub fn pack(parts: &EnvelopeParts) -> String {
    let mut combined = Vec::with_capacity(HEADER_LEN + parts.ciphertext.len());
    combined.extend_from_slice(&parts.salt);
    combined.extend_from_slice(&parts.nonce);
    combined.extend_from_slice(&parts.tag);
    combined.extend_from_slice(&parts.ciphertext);
    STANDARD.encode(combined)
}

/// Decode a packed envelope back into its parts.
///
/// # Errors
///
/// Returns [`CodecError::InvalidEncoding`] for non-base64 input and
/// [`CodecError::InvalidLength`] when no ciphertext follows the header.
pub fn unpack(encoded: &str) -> Result<EnvelopeParts, CodecError> {
    let combined = STANDARD
        .decode(encoded.trim())
        .map_err(|_| CodecError::InvalidEncoding)?;
    if combined.len() <= HEADER_LEN {
        return Err(CodecError::InvalidLength(combined.len()));
    }

    let (salt_bytes, rest) = combined.split_at(SALT_LEN);
    let (nonce_bytes, rest) = rest.split_at(NONCE_LEN);
    let (tag_bytes, ciphertext) = rest.split_at(TAG_LEN);

    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(salt_bytes);
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(nonce_bytes);
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(tag_bytes);

    Ok(EnvelopeParts {
        salt,
        nonce,
        tag,
        ciphertext: ciphertext.to_vec(),
    })
}
