//! Caller-facing error taxonomy for field encryption.

use std::fmt;

use thiserror::Error;

/// Failure classes surfaced to callers of the field facade.
///
/// None of these are transient: retrying with the same inputs yields the
/// same result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Nothing to encrypt. The facade handles this as a no-op sentinel.
    EmptyInput,
    /// The envelope cannot be decoded to the expected byte layout.
    MalformedEnvelope,
    /// The AEAD tag did not verify: tampering or wrong key/version.
    AuthenticationFailure,
    /// The AEAD tag verified but the plaintext checksum did not match.
    IntegrityMismatch,
    /// No key could be derived for the requested version.
    KeyDerivationFailure,
    /// The AEAD seal itself failed.
    EncryptionFailure,
    /// The audit sink failed. Absorbed at the audit boundary.
    SinkFailure,
}

impl ErrorKind {
    /// Short machine-readable code, safe for logs and audit records.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::EmptyInput => "empty_input",
            ErrorKind::MalformedEnvelope => "malformed_envelope",
            ErrorKind::AuthenticationFailure => "authentication_failure",
            ErrorKind::IntegrityMismatch => "integrity_mismatch",
            ErrorKind::KeyDerivationFailure => "key_derivation_failure",
            ErrorKind::EncryptionFailure => "encryption_failure",
            ErrorKind::SinkFailure => "sink_failure",
        }
    }

    /// Cryptographic failures are never retried with the same inputs.
    pub fn is_retryable(self) -> bool {
        false
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Facade operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Encrypt,
    Decrypt,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Encrypt => f.write_str("encrypt"),
            Operation::Decrypt => f.write_str("decrypt"),
        }
    }
}

/// Error returned by `encrypt_field` / `decrypt_field`.
///
/// Carries the failure kind and the entity context for audit correlation.
/// Never carries plaintext or key material.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} failed for {resource_type}/{resource_id}: {kind}")]
pub struct FieldCryptoError {
    /// Failure class.
    pub kind: ErrorKind,
    /// Operation that failed.
    pub operation: Operation,
    /// `"{entity_type}.{field_name}"`.
    pub resource_type: String,
    /// Entity identifier.
    pub resource_id: String,
}

impl FieldCryptoError {
    /// Construct a [`FieldCryptoError`] for the given entity.
    pub fn new(
        kind: ErrorKind,
        operation: Operation,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            operation,
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
        }
    }
}
