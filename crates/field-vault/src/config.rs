//! Configuration loading and validation for the field vault.
//!
//! All values are read from environment variables at startup. Loading fails
//! with a clear error message if any required variable is missing or invalid.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use tracing::warn;

use crate::crypto::kdf::MIN_INSTALLATION_SALT_LEN;
use crate::keys::StalenessPolicy;

/// Passphrase shipped for local development. Never acceptable in production.
pub const DEVELOPMENT_KEY: &str = "telemed-master-key-development-only-change-in-production";

/// Passphrases shorter than this produce a warning.
const RECOMMENDED_KEY_CHARS: usize = 32;

/// Validated field vault configuration.
#[derive(Clone, Deserialize)]
pub struct Config {
    /// Master passphrase (`MEDICAL_ENCRYPTION_KEY`). **Required.**
    pub medical_encryption_key: String,

    /// Base64 per-installation salt for master key stretching
    /// (`MEDICAL_ENCRYPTION_SALT`). **Required.**
    pub medical_encryption_salt: String,

    /// Days a superseded key version may keep protecting data.
    #[serde(default = "default_key_max_age_days")]
    pub key_max_age_days: i64,

    /// When set, staleness is measured in versions instead of days.
    #[serde(default)]
    pub key_max_version_lag: Option<u32>,

    /// When set, keys rotate automatically on this interval.
    #[serde(default)]
    pub key_rotation_interval_secs: Option<u64>,

    /// Bounded audit queue size.
    #[serde(default = "default_audit_queue_capacity")]
    pub audit_queue_capacity: usize,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_key_max_age_days() -> i64 {
    90
}
fn default_audit_queue_capacity() -> usize {
    crate::audit::DEFAULT_QUEUE_CAPACITY
}
fn default_log_level() -> String {
    "info".into()
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("medical_encryption_key", &"[REDACTED]")
            .field("medical_encryption_salt", &"[REDACTED]")
            .field("key_max_age_days", &self.key_max_age_days)
            .field("key_max_version_lag", &self.key_max_version_lag)
            .field("key_rotation_interval_secs", &self.key_rotation_interval_secs)
            .field("audit_queue_capacity", &self.audit_queue_capacity)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// Security warnings (development key, short key) are logged, not fatal.
    ///
    /// # Errors
    ///
    /// Returns an error if any required variable is absent or cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::load(config::Environment::default())
    }

    fn load(env: config::Environment) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(env)
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        for warning in c.security_warnings() {
            warn!(warning = %warning, "insecure encryption configuration");
        }
        Ok(c)
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        if self.medical_encryption_key.trim().is_empty() {
            anyhow::bail!("MEDICAL_ENCRYPTION_KEY is required and must not be empty");
        }
        self.installation_salt()?;
        if self.key_max_age_days <= 0 {
            anyhow::bail!("KEY_MAX_AGE_DAYS must be > 0");
        }
        if self.audit_queue_capacity == 0 {
            anyhow::bail!("AUDIT_QUEUE_CAPACITY must be > 0");
        }
        if self.key_rotation_interval_secs == Some(0) {
            anyhow::bail!("KEY_ROTATION_INTERVAL_SECS must be > 0 when set");
        }
        crate::telemetry::filter(&self.log_level)?;
        Ok(())
    }

    /// Non-fatal findings about the configured key material.
    pub fn security_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.medical_encryption_key == DEVELOPMENT_KEY {
            warnings.push("using the development encryption key; change it in production".into());
        } else if self.medical_encryption_key.chars().count() < RECOMMENDED_KEY_CHARS {
            warnings.push(format!(
                "encryption key should be at least {RECOMMENDED_KEY_CHARS} characters long"
            ));
        }
        warnings
    }

    /// Decode the per-installation salt.
    ///
    /// # Errors
    ///
    /// Returns an error if the salt is not base64 or decodes to fewer than
    /// [`MIN_INSTALLATION_SALT_LEN`] bytes.
    pub fn installation_salt(&self) -> Result<Vec<u8>> {
        let salt = STANDARD
            .decode(self.medical_encryption_salt.trim())
            .context("MEDICAL_ENCRYPTION_SALT must be base64")?;
        if salt.len() < MIN_INSTALLATION_SALT_LEN {
            anyhow::bail!(
                "MEDICAL_ENCRYPTION_SALT must decode to at least {MIN_INSTALLATION_SALT_LEN} bytes"
            );
        }
        Ok(salt)
    }

    /// Staleness policy selected by the configuration.
    pub fn staleness_policy(&self) -> StalenessPolicy {
        match self.key_max_version_lag {
            Some(lag) => StalenessPolicy::MaxVersionLag(lag),
            None => StalenessPolicy::MaxAge(chrono::Duration::days(self.key_max_age_days)),
        }
    }

    /// Scheduled rotation interval, if enabled.
    pub fn rotation_interval(&self) -> Option<std::time::Duration> {
        self.key_rotation_interval_secs
            .map(std::time::Duration::from_secs)
    }
}
