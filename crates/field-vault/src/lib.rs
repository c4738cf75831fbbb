//! `field-vault`: authenticated encryption of sensitive medical record fields.
//!
//! Components, leaf first:
//! 1. [`crypto::kdf`]: master key stretching and per-envelope HKDF derivation.
//! 2. [`crypto::codec`]: the `salt ‖ nonce ‖ tag ‖ ciphertext` envelope layout.
//! 3. [`crypto::cipher`]: AES-256-GCM seal/open.
//! 4. [`crypto::integrity`]: SHA-256 plaintext checksum.
//! 5. [`keys`]: key versions, rotation, retention, staleness policy.
//! 6. [`audit`]: non-blocking audit queue and sinks.
//! 7. [`vault`]: the [`FieldVault`] facade used by application code.

pub mod audit;
pub mod config;
pub mod crypto;
pub mod keys;
pub mod telemetry;
pub mod vault;

pub use audit::{spawn_audit_worker, AuditDispatcher, AuditSink, SinkError, TracingAuditSink};
pub use config::Config;
pub use crypto::MasterKey;
pub use keys::{rotation_task, KeyError, KeyRegistry, StalenessPolicy};
pub use vault::{FieldVault, VaultTasks};
pub use vault_common::{
    AuditAction, AuditRecord, ErrorKind, FieldCryptoError, KeyVersion, Operation, RiskLevel,
    StoredEnvelope,
};
