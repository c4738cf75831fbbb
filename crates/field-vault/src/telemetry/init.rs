//! Global subscriber installation driven by [`Config`].

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Build the filter for a `LOG_LEVEL` value.
///
/// Accepts a bare level (`"info"`) or full directives
/// (`"warn,field_vault=debug,audit=info"`).
///
/// # Errors
///
/// Returns an error naming `LOG_LEVEL` if the directives do not parse.
pub fn filter(log_level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(log_level).with_context(|| format!("invalid LOG_LEVEL {log_level:?}"))
}

/// Install the global JSON subscriber at `cfg.log_level`.
///
/// `RUST_LOG` takes precedence when set. Hosts call this once at startup,
/// before [`FieldVault::from_config`](crate::FieldVault::from_config), so the
/// initialisation and `audit` target events are captured.
///
/// # Errors
///
/// Returns an error if `LOG_LEVEL` is invalid or a global subscriber is
/// already installed.
pub fn init(cfg: &Config) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(from_env) => from_env,
        Err(_) => filter(&cfg.log_level)?,
    };

    tracing_subscriber::fmt()
        .json()
        .with_target(true)
        .with_current_span(false)
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("tracing subscriber already installed: {e}"))
}
