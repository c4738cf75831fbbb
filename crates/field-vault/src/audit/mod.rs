//! Best-effort audit trail for encrypt, decrypt, and key rotation.
//!
//! Records are pushed onto a bounded queue with [`AuditDispatcher::notify`],
//! which never blocks and never fails. A background task drains the queue
//! into an [`AuditSink`]. Sink failures, a full queue, or a stopped worker
//! are logged locally and the record is dropped; none of them reach the
//! caller of an encrypt or decrypt.
//!
//! # Audit invariants
//!
//! - **No plaintext, key material, salts, or checksums** in any record.
//! - Exactly one record per non-trivial facade call, success or failure.

pub mod tracing_sink;

pub use tracing_sink::TracingAuditSink;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;
use vault_common::{AuditAction, AuditRecord, ErrorKind, KeyVersion, RiskLevel};

use crate::crypto::ALGORITHM;

/// Resource type recorded for key rotations.
pub const KEY_RESOURCE_TYPE: &str = "encryption_keys";

/// Default bounded queue size between the facade and the sink.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Failure reported by an [`AuditSink`]. Always absorbed by the worker.
#[derive(Debug, Error)]
#[error("audit sink failed: {0}")]
pub struct SinkError(pub String);

/// Destination for audit records: a database table, a log pipeline, etc.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persist one record. Any timeout policy belongs to the implementation.
    async fn record(&self, record: AuditRecord) -> Result<(), SinkError>;
}

/// Non-blocking handle onto the audit queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AuditDispatcher {
    tx: mpsc::Sender<AuditRecord>,
}

impl AuditDispatcher {
    /// Enqueue a record without waiting.
    pub fn notify(&self, record: AuditRecord) {
        match self.tx.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(record)) => warn!(
                action = record.action.as_str(),
                resource_type = %record.resource_type,
                "audit queue full; record dropped"
            ),
            Err(TrySendError::Closed(record)) => warn!(
                action = record.action.as_str(),
                resource_type = %record.resource_type,
                "audit worker stopped; record dropped"
            ),
        }
    }
}

/// Spawn the background task that drains the audit queue into `sink`.
///
/// The task ends once every [`AuditDispatcher`] clone has been dropped and
/// the queue is empty. Must be called from within a Tokio runtime.
pub fn spawn_audit_worker(
    sink: Arc<dyn AuditSink>,
    capacity: usize,
) -> (AuditDispatcher, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<AuditRecord>(capacity.max(1));
    let handle = tokio::spawn(async move {
        while let Some(record) = rx.recv().await {
            let action = record.action;
            if let Err(e) = sink.record(record).await {
                warn!(
                    error = %e,
                    kind = ErrorKind::SinkFailure.code(),
                    action = action.as_str(),
                    "audit sink rejected record; dropped"
                );
            }
        }
        debug!("audit queue closed; worker exiting");
    });
    (AuditDispatcher { tx }, handle)
}

/// Build the record for one field encrypt or decrypt.
pub(crate) fn field_record(
    action: AuditAction,
    resource_type: &str,
    resource_id: &str,
    key_version: KeyVersion,
    failure: Option<ErrorKind>,
) -> AuditRecord {
    AuditRecord {
        id: Uuid::new_v4(),
        action,
        resource_type: resource_type.to_owned(),
        resource_id: Some(resource_id.to_owned()),
        success: failure.is_none(),
        key_version,
        previous_key_version: None,
        algorithm: ALGORITHM.to_owned(),
        error_message: failure.map(|kind| kind.code().to_owned()),
        risk_level: RiskLevel::Medium,
        timestamp: Utc::now(),
    }
}

/// Build the record for a key rotation attempt.
pub(crate) fn rotation_record(
    previous: KeyVersion,
    current: KeyVersion,
    failure: Option<&str>,
) -> AuditRecord {
    AuditRecord {
        id: Uuid::new_v4(),
        action: AuditAction::KeyRotation,
        resource_type: KEY_RESOURCE_TYPE.to_owned(),
        resource_id: None,
        success: failure.is_none(),
        key_version: current,
        previous_key_version: Some(previous),
        algorithm: ALGORITHM.to_owned(),
        error_message: failure.map(str::to_owned),
        risk_level: RiskLevel::High,
        timestamp: Utc::now(),
    }
}
