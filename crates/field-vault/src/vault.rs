//! [`FieldVault`]: the public encrypt/decrypt surface for sensitive fields.
//!
//! Per operation:
//!
//! ```text
//! Requested → KeyDerived → Sealed | Opened → Audited → Returned
//!                 └─────────────┴──────────────→ Audited → Failed(kind)
//! ```
//!
//! Exactly one audit record is enqueued per non-empty call, whatever the
//! outcome. Empty and blank values short-circuit to
//! [`StoredEnvelope::empty`] with no cryptography and no audit record.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use vault_common::{
    AuditAction, ErrorKind, FieldCryptoError, KeyVersion, Operation, StoredEnvelope,
};
use zeroize::Zeroizing;

use crate::audit::{self, spawn_audit_worker, AuditDispatcher, TracingAuditSink};
use crate::config::Config;
use crate::crypto::{
    cipher::{self, CipherError},
    codec::{self, EnvelopeParts},
    integrity,
    kdf::{self, MasterKey},
};
use crate::keys::{rotation_task, KeyError, KeyRegistry};

/// Background tasks started by [`FieldVault::from_config`].
#[derive(Debug)]
pub struct VaultTasks {
    /// Drains the audit queue. Finishes once every vault clone is dropped.
    pub audit: JoinHandle<()>,
    /// Scheduled rotation. Holds a vault clone, so abort it before awaiting
    /// `audit` on shutdown.
    pub rotation: Option<JoinHandle<()>>,
}

impl VaultTasks {
    /// Stop scheduled rotation and wait for queued audit records to drain.
    ///
    /// Every other vault clone must already be dropped.
    pub async fn shutdown(self) {
        if let Some(rotation) = self.rotation {
            rotation.abort();
            let _ = rotation.await;
        }
        if let Err(e) = self.audit.await {
            error!(error = %e, "audit worker terminated abnormally");
        }
    }
}

/// Field encryption facade. Cheap to clone; clones share one registry and
/// one audit queue.
#[derive(Debug, Clone)]
pub struct FieldVault {
    registry: Arc<KeyRegistry>,
    audit: AuditDispatcher,
}

impl FieldVault {
    /// Assemble a vault from an existing registry and audit queue.
    pub fn new(registry: Arc<KeyRegistry>, audit: AuditDispatcher) -> Self {
        Self { registry, audit }
    }

    /// Build a vault from validated configuration, auditing to
    /// [`TracingAuditSink`].
    ///
    /// Starts the audit worker and, when `KEY_ROTATION_INTERVAL_SECS` is set,
    /// the scheduled rotation task. Must be called from within a Tokio
    /// runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the master key cannot be derived from the
    /// configured passphrase and salt.
    pub fn from_config(cfg: &Config) -> Result<(Self, VaultTasks)> {
        let salt = cfg.installation_salt()?;
        let master = MasterKey::from_passphrase(&cfg.medical_encryption_key, &salt)
            .context("failed to derive master key from configuration")?;
        let registry = Arc::new(KeyRegistry::new(master, cfg.staleness_policy()));
        let (dispatcher, audit) =
            spawn_audit_worker(Arc::new(TracingAuditSink), cfg.audit_queue_capacity);
        let vault = Self::new(registry, dispatcher);

        let rotation = cfg.rotation_interval().map(|interval| {
            info!(
                interval_secs = interval.as_secs(),
                "scheduled key rotation enabled"
            );
            rotation_task(vault.clone(), interval)
        });

        info!(
            key_version = vault.registry.current_version().get(),
            "field vault initialised"
        );
        Ok((vault, VaultTasks { audit, rotation }))
    }

    /// The shared key registry.
    pub fn registry(&self) -> &KeyRegistry {
        &self.registry
    }

    /// Encrypt one field value.
    ///
    /// # Errors
    ///
    /// Returns [`FieldCryptoError`] with kind `KeyDerivationFailure` or
    /// `EncryptionFailure`. The error never contains the value.
    pub fn encrypt_field(
        &self,
        value: &str,
        field_name: &str,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<StoredEnvelope, FieldCryptoError> {
        if value.trim().is_empty() {
            debug!(field = field_name, entity_type, "empty value; storing sentinel");
            return Ok(StoredEnvelope::empty());
        }

        let resource_type = resource_type(entity_type, field_name);
        let result = self.seal_value(value);

        let key_version = match &result {
            Ok(envelope) => envelope.key_version,
            Err(_) => self.registry.current_version(),
        };
        self.audit.notify(audit::field_record(
            AuditAction::DataEncrypt,
            &resource_type,
            entity_id,
            key_version,
            result.as_ref().err().copied(),
        ));

        match result {
            Ok(envelope) => {
                debug!(
                    resource_type = %resource_type,
                    resource_id = entity_id,
                    key_version = key_version.get(),
                    "field encrypted"
                );
                Ok(envelope)
            }
            Err(kind) => {
                warn!(
                    resource_type = %resource_type,
                    resource_id = entity_id,
                    key_version = key_version.get(),
                    error = kind.code(),
                    "field encryption failed"
                );
                Err(FieldCryptoError::new(
                    kind,
                    Operation::Encrypt,
                    resource_type,
                    entity_id,
                ))
            }
        }
    }

    /// Decrypt one stored envelope.
    ///
    /// # Errors
    ///
    /// Returns [`FieldCryptoError`] with kind `MalformedEnvelope`,
    /// `KeyDerivationFailure`, `AuthenticationFailure`, or
    /// `IntegrityMismatch`. No plaintext is returned on any failure.
    pub fn decrypt_field(
        &self,
        envelope: &StoredEnvelope,
        field_name: &str,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<String, FieldCryptoError> {
        if envelope.is_empty() {
            return Ok(String::new());
        }

        let resource_type = resource_type(entity_type, field_name);
        let result = self.open_value(envelope);

        self.audit.notify(audit::field_record(
            AuditAction::DataDecrypt,
            &resource_type,
            entity_id,
            envelope.key_version,
            result.as_ref().err().copied(),
        ));

        result.map_err(|kind| {
            warn!(
                resource_type = %resource_type,
                resource_id = entity_id,
                key_version = envelope.key_version.get(),
                error = kind.code(),
                "field decryption failed"
            );
            FieldCryptoError::new(kind, Operation::Decrypt, resource_type, entity_id)
        })
    }

    /// Re-seal an envelope under the current key version.
    ///
    /// Envelopes already on the current version, and the empty sentinel, are
    /// returned unchanged. Otherwise this is a decrypt followed by an
    /// encrypt, each audited.
    ///
    /// # Errors
    ///
    /// Propagates the first failing [`decrypt_field`](Self::decrypt_field) or
    /// [`encrypt_field`](Self::encrypt_field).
    pub fn re_encrypt_field(
        &self,
        envelope: &StoredEnvelope,
        field_name: &str,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<StoredEnvelope, FieldCryptoError> {
        if envelope.is_empty() || envelope.key_version == self.registry.current_version() {
            return Ok(envelope.clone());
        }
        let plaintext = Zeroizing::new(self.decrypt_field(
            envelope,
            field_name,
            entity_type,
            entity_id,
        )?);
        self.encrypt_field(&plaintext, field_name, entity_type, entity_id)
    }

    /// Advance to a new key version. Older envelopes remain decryptable.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Exhausted`] if the version counter cannot advance.
    pub fn rotate_keys(&self) -> Result<KeyVersion, KeyError> {
        match self.registry.rotate() {
            Ok(current) => {
                let previous = KeyVersion::new(current.get() - 1);
                self.audit
                    .notify(audit::rotation_record(previous, current, None));
                info!(
                    previous_version = previous.get(),
                    current_version = current.get(),
                    "encryption keys rotated"
                );
                Ok(current)
            }
            Err(e) => {
                let current = self.registry.current_version();
                self.audit.notify(audit::rotation_record(
                    current,
                    current,
                    Some(ErrorKind::KeyDerivationFailure.code()),
                ));
                error!(error = %e, current_version = current.get(), "key rotation failed");
                Err(e)
            }
        }
    }

    /// Whether data sealed under `key_version` is due for re-encryption.
    pub fn needs_re_encryption(&self, key_version: KeyVersion) -> bool {
        self.registry.is_stale(key_version)
    }

    fn seal_value(&self, value: &str) -> Result<StoredEnvelope, ErrorKind> {
        let salt = kdf::generate_salt();
        let (key_version, key) = self
            .registry
            .derive_current(&salt)
            .map_err(|_| ErrorKind::KeyDerivationFailure)?;
        let sealed = cipher::seal(value.as_bytes(), &key).map_err(cipher_error_kind)?;
        drop(key);

        Ok(StoredEnvelope {
            encrypted_value: codec::pack(&EnvelopeParts::new(salt, sealed)),
            key_version,
            checksum: integrity::checksum(value.as_bytes()),
        })
    }

    fn open_value(&self, envelope: &StoredEnvelope) -> Result<String, ErrorKind> {
        if !integrity::is_well_formed(&envelope.checksum) {
            return Err(ErrorKind::MalformedEnvelope);
        }
        let parts = codec::unpack(&envelope.encrypted_value)
            .map_err(|_| ErrorKind::MalformedEnvelope)?;
        let key = self
            .registry
            .derive_key(&parts.salt, envelope.key_version)
            .map_err(|_| ErrorKind::KeyDerivationFailure)?;
        let plaintext = cipher::open(&parts.nonce, &parts.tag, &parts.ciphertext, &key)
            .map_err(cipher_error_kind)?;
        drop(key);

        if !integrity::verify(&plaintext, &envelope.checksum) {
            return Err(ErrorKind::IntegrityMismatch);
        }
        String::from_utf8(plaintext.to_vec()).map_err(|_| ErrorKind::IntegrityMismatch)
    }
}

fn resource_type(entity_type: &str, field_name: &str) -> String {
    format!("{entity_type}.{field_name}")
}

fn cipher_error_kind(e: CipherError) -> ErrorKind {
    match e {
        CipherError::AuthenticationFailure => ErrorKind::AuthenticationFailure,
        CipherError::InvalidKeyLength => ErrorKind::KeyDerivationFailure,
        CipherError::EmptyPlaintext => ErrorKind::EmptyInput,
        CipherError::SealFailure => ErrorKind::EncryptionFailure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditSink, SinkError};
    use crate::crypto::{codec::HEADER_LEN, kdf::KEY_LEN, SALT_LEN};
    use crate::keys::StalenessPolicy;
    use async_trait::async_trait;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use std::collections::HashSet;
    use std::sync::Mutex;
    use vault_common::AuditRecord;

    #[derive(Default)]
    struct RecordingSink {
        records: Mutex<Vec<AuditRecord>>,
    }

    #[async_trait]
    impl AuditSink for RecordingSink {
        async fn record(&self, record: AuditRecord) -> Result<(), SinkError> {
            self.records.lock().unwrap().push(record);
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl AuditSink for FailingSink {
        async fn record(&self, _record: AuditRecord) -> Result<(), SinkError> {
            Err(SinkError("audit table locked".into()))
        }
    }

    fn registry() -> Arc<KeyRegistry> {
        Arc::new(KeyRegistry::new(
            MasterKey::from_bytes([0x5Au8; KEY_LEN]),
            StalenessPolicy::MaxVersionLag(1),
        ))
    }

    fn vault_with(sink: Arc<dyn AuditSink>) -> (FieldVault, JoinHandle<()>) {
        let (dispatcher, worker) = spawn_audit_worker(sink, 64);
        (FieldVault::new(registry(), dispatcher), worker)
    }

    /// Drop the vault so the worker drains, then return what the sink saw.
    async fn finish(vault: FieldVault, worker: JoinHandle<()>, sink: &RecordingSink) -> Vec<AuditRecord> {
        drop(vault);
        worker.await.unwrap();
        sink.records.lock().unwrap().clone()
    }

    fn flip_byte(envelope: &StoredEnvelope, index: usize) -> StoredEnvelope {
        let mut raw = STANDARD.decode(&envelope.encrypted_value).unwrap();
        raw[index] ^= 0x01;
        StoredEnvelope {
            encrypted_value: STANDARD.encode(raw),
            ..envelope.clone()
        }
    }

    #[tokio::test]
    async fn round_trip() {
        let (vault, _worker) = vault_with(Arc::new(RecordingSink::default()));
        for value in ["João Silva", "J45.909 asthma", "+55 11 91234-5678", "x", "🩺 ✓"] {
            let env = vault.encrypt_field(value, "name", "patient", "42").unwrap();
            assert_eq!(env.key_version, KeyVersion::INITIAL);
            assert_eq!(env.checksum.len(), 64);
            assert_eq!(
                vault.decrypt_field(&env, "name", "patient", "42").unwrap(),
                value
            );
        }
    }

    #[tokio::test]
    async fn one_audit_record_per_operation() {
        let sink = Arc::new(RecordingSink::default());
        let (vault, worker) = vault_with(sink.clone());

        let env = vault.encrypt_field("João Silva", "name", "patient", "42").unwrap();
        vault.decrypt_field(&env, "name", "patient", "42").unwrap();
        let tampered = flip_byte(&env, HEADER_LEN);
        assert!(vault.decrypt_field(&tampered, "name", "patient", "42").is_err());

        let records = finish(vault, worker, &sink).await;
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].action, AuditAction::DataEncrypt);
        assert_eq!(records[0].resource_type, "patient.name");
        assert_eq!(records[0].resource_id.as_deref(), Some("42"));
        assert!(records[0].success);
        assert_eq!(records[1].action, AuditAction::DataDecrypt);
        assert!(records[1].success);
        assert!(!records[2].success);
        assert_eq!(
            records[2].error_message.as_deref(),
            Some("authentication_failure")
        );
    }

    #[tokio::test]
    async fn empty_values_short_circuit_without_audit() {
        let sink = Arc::new(RecordingSink::default());
        let (vault, worker) = vault_with(sink.clone());

        let env = vault.encrypt_field("", "phone", "patient", "42").unwrap();
        assert_eq!(env, StoredEnvelope::empty());
        let blank = vault.encrypt_field("   \t", "phone", "patient", "42").unwrap();
        assert!(blank.is_empty());
        assert_eq!(vault.decrypt_field(&env, "phone", "patient", "42").unwrap(), "");

        assert!(finish(vault, worker, &sink).await.is_empty());
    }

    #[tokio::test]
    async fn tampering_is_detected_in_ciphertext_and_tag() {
        let (vault, _worker) = vault_with(Arc::new(RecordingSink::default()));
        let env = vault
            .encrypt_field("asthma, persistent", "diagnosis", "patient", "7")
            .unwrap();
        let raw_len = STANDARD.decode(&env.encrypted_value).unwrap().len();
        let tag_start = SALT_LEN + crate::crypto::NONCE_LEN;

        for index in tag_start..raw_len {
            let err = vault
                .decrypt_field(&flip_byte(&env, index), "diagnosis", "patient", "7")
                .unwrap_err();
            assert_eq!(err.kind, ErrorKind::AuthenticationFailure, "byte {index}");
        }
    }

    #[tokio::test]
    async fn tampered_salt_changes_the_key() {
        let (vault, _worker) = vault_with(Arc::new(RecordingSink::default()));
        let env = vault.encrypt_field("João Silva", "name", "patient", "42").unwrap();
        let err = vault
            .decrypt_field(&flip_byte(&env, 0), "name", "patient", "42")
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::AuthenticationFailure);
    }

    #[tokio::test]
    async fn wrong_checksum_is_an_integrity_mismatch() {
        let sink = Arc::new(RecordingSink::default());
        let (vault, worker) = vault_with(sink.clone());
        let env = vault.encrypt_field("João Silva", "name", "patient", "42").unwrap();
        let forged = StoredEnvelope {
            checksum: integrity::checksum("Joao Silva".as_bytes()),
            ..env
        };
        let err = vault.decrypt_field(&forged, "name", "patient", "42").unwrap_err();
        assert_eq!(err.kind, ErrorKind::IntegrityMismatch);
        assert_eq!(err.operation, Operation::Decrypt);

        let records = finish(vault, worker, &sink).await;
        assert_eq!(records.len(), 2);
        assert!(!records[1].success);
        assert_eq!(records[1].error_message.as_deref(), Some("integrity_mismatch"));
    }

    #[tokio::test]
    async fn malformed_envelopes_are_distinguished() {
        let (vault, _worker) = vault_with(Arc::new(RecordingSink::default()));
        let env = vault.encrypt_field("João Silva", "name", "patient", "42").unwrap();

        let not_base64 = StoredEnvelope {
            encrypted_value: "@@@".into(),
            ..env.clone()
        };
        let truncated = StoredEnvelope {
            encrypted_value: STANDARD.encode([0u8; HEADER_LEN]),
            ..env.clone()
        };
        let bad_checksum = StoredEnvelope {
            checksum: "not-a-digest".into(),
            ..env.clone()
        };
        for bad in [not_base64, truncated, bad_checksum] {
            let err = vault.decrypt_field(&bad, "name", "patient", "42").unwrap_err();
            assert_eq!(err.kind, ErrorKind::MalformedEnvelope);
        }
    }

    #[tokio::test]
    async fn unknown_version_is_a_key_derivation_failure() {
        let (vault, _worker) = vault_with(Arc::new(RecordingSink::default()));
        let env = vault.encrypt_field("João Silva", "name", "patient", "42").unwrap();
        for version in [0, 9] {
            let wrong = StoredEnvelope {
                key_version: KeyVersion::new(version),
                ..env.clone()
            };
            let err = vault.decrypt_field(&wrong, "name", "patient", "42").unwrap_err();
            assert_eq!(err.kind, ErrorKind::KeyDerivationFailure);
        }
    }

    #[tokio::test]
    async fn retired_version_cannot_be_decrypted() {
        let (vault, _worker) = vault_with(Arc::new(RecordingSink::default()));
        let env = vault.encrypt_field("João Silva", "name", "patient", "42").unwrap();
        vault.rotate_keys().unwrap();
        vault.registry().retire_before(KeyVersion::new(2)).unwrap();
        let err = vault.decrypt_field(&env, "name", "patient", "42").unwrap_err();
        assert_eq!(err.kind, ErrorKind::KeyDerivationFailure);
    }

    #[tokio::test]
    async fn errors_never_contain_plaintext() {
        let (vault, _worker) = vault_with(Arc::new(RecordingSink::default()));
        let env = vault
            .encrypt_field("HIV positive", "diagnosis", "patient", "42")
            .unwrap();
        let forged = StoredEnvelope {
            checksum: integrity::checksum(b"other"),
            ..env
        };
        let err = vault.decrypt_field(&forged, "diagnosis", "patient", "42").unwrap_err();
        let printed = format!("{err} {err:?}");
        assert!(!printed.contains("HIV"));
        assert!(printed.contains("patient.diagnosis"));
    }

    #[tokio::test]
    async fn salts_and_nonces_never_repeat() {
        let (vault, _worker) = vault_with(Arc::new(RecordingSink::default()));
        let mut seen = HashSet::new();
        for _ in 0..500 {
            let env = vault.encrypt_field("João Silva", "name", "patient", "42").unwrap();
            let raw = STANDARD.decode(&env.encrypted_value).unwrap();
            let salt_and_nonce = raw[..SALT_LEN + crate::crypto::NONCE_LEN].to_vec();
            assert!(seen.insert(salt_and_nonce));
        }
    }

    #[tokio::test]
    async fn rotation_keeps_old_envelopes_readable() {
        let sink = Arc::new(RecordingSink::default());
        let (vault, worker) = vault_with(sink.clone());
        let old = vault.encrypt_field("João Silva", "name", "patient", "42").unwrap();

        assert_eq!(vault.rotate_keys().unwrap(), KeyVersion::new(2));
        assert_eq!(vault.rotate_keys().unwrap(), KeyVersion::new(3));
        assert_eq!(
            vault.decrypt_field(&old, "name", "patient", "42").unwrap(),
            "João Silva"
        );

        let fresh = vault.encrypt_field("João Silva", "name", "patient", "42").unwrap();
        assert_eq!(fresh.key_version, KeyVersion::new(3));
        assert_ne!(fresh.encrypted_value, old.encrypted_value);

        let records = finish(vault, worker, &sink).await;
        let rotations: Vec<_> = records
            .iter()
            .filter(|r| r.action == AuditAction::KeyRotation)
            .collect();
        assert_eq!(rotations.len(), 2);
        assert_eq!(rotations[1].previous_key_version, Some(KeyVersion::new(2)));
        assert_eq!(rotations[1].key_version, KeyVersion::new(3));
    }

    #[tokio::test]
    async fn needs_re_encryption_follows_policy() {
        let (vault, _worker) = vault_with(Arc::new(RecordingSink::default()));
        assert!(!vault.needs_re_encryption(KeyVersion::INITIAL));
        vault.rotate_keys().unwrap();
        assert!(!vault.needs_re_encryption(KeyVersion::INITIAL));
        vault.rotate_keys().unwrap();
        assert!(vault.needs_re_encryption(KeyVersion::INITIAL));
        assert!(!vault.needs_re_encryption(KeyVersion::new(3)));
    }

    #[tokio::test]
    async fn re_encrypt_moves_envelope_to_current_version() {
        let (vault, _worker) = vault_with(Arc::new(RecordingSink::default()));
        let old = vault.encrypt_field("João Silva", "name", "patient", "42").unwrap();

        let unchanged = vault.re_encrypt_field(&old, "name", "patient", "42").unwrap();
        assert_eq!(unchanged, old);

        vault.rotate_keys().unwrap();
        let moved = vault.re_encrypt_field(&old, "name", "patient", "42").unwrap();
        assert_eq!(moved.key_version, KeyVersion::new(2));
        assert_eq!(moved.checksum, old.checksum);
        assert_eq!(
            vault.decrypt_field(&moved, "name", "patient", "42").unwrap(),
            "João Silva"
        );

        let empty = vault
            .re_encrypt_field(&StoredEnvelope::empty(), "name", "patient", "42")
            .unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn failing_sink_never_fails_operations() {
        let (vault, worker) = vault_with(Arc::new(FailingSink));
        let env = vault.encrypt_field("João Silva", "name", "patient", "42").unwrap();
        assert_eq!(
            vault.decrypt_field(&env, "name", "patient", "42").unwrap(),
            "João Silva"
        );
        vault.rotate_keys().unwrap();
        drop(vault);
        worker.await.unwrap();
    }

    fn config(rotation_secs: Option<u64>) -> Config {
        Config {
            medical_encryption_key: "a-production-grade-passphrase-of-length".into(),
            medical_encryption_salt: "aW5zdGFsbGF0aW9uLXNhbHQtMDAwMQ==".into(),
            key_max_age_days: 90,
            key_max_version_lag: None,
            key_rotation_interval_secs: rotation_secs,
            audit_queue_capacity: 16,
            log_level: "info".into(),
        }
    }

    #[tokio::test]
    async fn from_config_builds_a_working_vault() {
        let (vault, tasks) = FieldVault::from_config(&config(None)).unwrap();
        assert!(tasks.rotation.is_none());
        let env = vault.encrypt_field("João Silva", "name", "patient", "42").unwrap();
        assert_eq!(
            vault.decrypt_field(&env, "name", "patient", "42").unwrap(),
            "João Silva"
        );
        drop(vault);
        tasks.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn configured_interval_rotates_keys() {
        let (vault, tasks) = FieldVault::from_config(&config(Some(1))).unwrap();
        assert!(tasks.rotation.is_some());
        let old = vault.encrypt_field("João Silva", "name", "patient", "42").unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(2500)).await;

        assert!(vault.registry().current_version() > KeyVersion::INITIAL);
        assert_eq!(
            vault.decrypt_field(&old, "name", "patient", "42").unwrap(),
            "João Silva"
        );
        drop(vault);
        tasks.shutdown().await;
    }
}
