//! [`TracingAuditSink`]: writes audit records as structured `tracing` events.

use async_trait::async_trait;
use tracing::{info, warn};
use vault_common::{AuditRecord, RiskLevel};

use super::{AuditSink, SinkError};

/// Emits every record on the `audit` target.
///
/// High and critical risk records (key rotations) are logged at `warn` so
/// they surface as security alerts; everything else at `info`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, record: AuditRecord) -> Result<(), SinkError> {
        let resource_id = record.resource_id.as_deref().unwrap_or("-");
        let error = record.error_message.as_deref().unwrap_or("");
        let previous = record.previous_key_version.map(|v| v.get());
        if record.risk_level >= RiskLevel::High {
            warn!(
                target: "audit",
                id = %record.id,
                action = record.action.as_str(),
                resource_type = %record.resource_type,
                resource_id,
                success = record.success,
                key_version = record.key_version.get(),
                previous_key_version = previous,
                error,
                timestamp = %record.timestamp,
                "security-relevant audit event"
            );
        } else {
            info!(
                target: "audit",
                id = %record.id,
                action = record.action.as_str(),
                resource_type = %record.resource_type,
                resource_id,
                success = record.success,
                key_version = record.key_version.get(),
                algorithm = %record.algorithm,
                error,
                timestamp = %record.timestamp,
                "audit event"
            );
        }
        Ok(())
    }
}
