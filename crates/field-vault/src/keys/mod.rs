//! Key versioning, retention, and scheduled rotation.
//!
//! # Lifecycle
//!
//! 1. At startup the host builds a [`KeyRegistry`] from the master key, either
//!    fresh (version 1) or resumed at a persisted current version.
//! 2. Every encryption derives its key from the current version; every
//!    decryption derives from the version stored in the envelope.
//! 3. [`FieldVault::rotate_keys`] advances the version, either on demand or
//!    from [`rotation_task`] on a fixed interval.
//! 4. Hosts re-encrypt envelopes the policy reports as stale, then may call
//!    [`KeyRegistry::retire_before`] to drop derivation rights for old versions.
//!
//! # Security invariants
//!
//! - The master key is never logged, serialised, or cloned.
//! - Rotation never invalidates a retained version.

pub mod registry;

pub use registry::{KeyError, KeyRegistry, StalenessPolicy, VersionInfo};

use tokio::time;
use tracing::{info, warn};

use crate::vault::FieldVault;

/// Spawn a background task that rotates keys on a fixed interval.
///
/// The first rotation fires after one full interval. A failed rotation is
/// logged and the current version kept.
pub fn rotation_task(vault: FieldVault, interval: std::time::Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        // First tick fires immediately; skip it so startup doesn't rotate.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match vault.rotate_keys() {
                Ok(version) => info!(key_version = version.get(), "scheduled key rotation complete"),
                Err(e) => warn!(error = %e, "scheduled key rotation failed; keeping current version"),
            }
        }
    })
}
