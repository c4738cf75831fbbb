//! Common types, persisted formats, and errors shared across `field-vault` crates.

pub mod error;
pub mod protocol;

pub use error::{ErrorKind, FieldCryptoError, Operation};
pub use protocol::{AuditAction, AuditRecord, KeyVersion, RiskLevel, StoredEnvelope};
