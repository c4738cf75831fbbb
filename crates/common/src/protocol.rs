//! Persisted envelope and audit record types.
//!
//! These types are serialised as JSON by whatever storage layer or audit
//! backend the host application wires in. Field names follow the camelCase
//! layout already present in stored records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Key version
// ---------------------------------------------------------------------------

/// Identifies the derivation parameters that produced an envelope's key.
///
/// Versions start at 1 and only ever increase. Zero is representable so that
/// corrupt stored records can be deserialised and rejected by the key layer
/// rather than by the JSON decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyVersion(u32);

impl KeyVersion {
    /// The version every fresh registry starts at.
    pub const INITIAL: KeyVersion = KeyVersion(1);

    /// Wrap a raw version number.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw version number.
    pub const fn get(self) -> u32 {
        self.0
    }

    /// The version that follows this one, or `None` on overflow.
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

impl From<u32> for KeyVersion {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Display for KeyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Stored envelope
// ---------------------------------------------------------------------------

/// The durable unit written for every encrypted field.
///
/// The three fields must always be persisted and read back together.
/// `encrypted_value` is `base64(salt ‖ nonce ‖ tag ‖ ciphertext)` and
/// `checksum` is the hex SHA-256 of the plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEnvelope {
    /// Packed envelope bytes, base64-encoded. Empty for the empty sentinel.
    pub encrypted_value: String,
    /// Key version used to derive the sealing key.
    pub key_version: KeyVersion,
    /// Lower-case hex SHA-256 of the plaintext. Empty for the empty sentinel.
    pub checksum: String,
}

impl StoredEnvelope {
    /// The sentinel stored for empty or blank values. Nothing is encrypted.
    pub fn empty() -> Self {
        Self {
            encrypted_value: String::new(),
            key_version: KeyVersion::INITIAL,
            checksum: String::new(),
        }
    }

    /// Returns `true` if this is the empty-value sentinel.
    pub fn is_empty(&self) -> bool {
        self.encrypted_value.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Audit records
// ---------------------------------------------------------------------------

/// Audited operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    DataEncrypt,
    DataDecrypt,
    KeyRotation,
}

impl AuditAction {
    /// Wire name, e.g. `"DATA_ENCRYPT"`.
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::DataEncrypt => "DATA_ENCRYPT",
            AuditAction::DataDecrypt => "DATA_DECRYPT",
            AuditAction::KeyRotation => "KEY_ROTATION",
        }
    }
}

/// Risk classification attached to each audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// One audit entry per encrypt, decrypt, or key rotation.
///
/// Never contains plaintext, key material, salts, or checksums.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    /// Unique record identifier.
    pub id: Uuid,
    /// Operation kind.
    pub action: AuditAction,
    /// `"{entity_type}.{field_name}"` for field operations,
    /// `"encryption_keys"` for rotation.
    pub resource_type: String,
    /// Entity identifier, absent for rotation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Key version the operation used (the new version for rotations).
    pub key_version: KeyVersion,
    /// Version that was current before a rotation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_key_version: Option<KeyVersion>,
    /// Cipher identifier.
    pub algorithm: String,
    /// Machine-readable error code on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Risk classification.
    pub risk_level: RiskLevel,
    /// When the operation finished.
    pub timestamp: DateTime<Utc>,
}
