//! Structured logging setup for hosts embedding the field vault.
//!
//! The library never installs a subscriber on its own. Hosts call
//! [`init`] with the loaded [`Config`](crate::Config); `LOG_LEVEL` selects
//! the filter and `RUST_LOG` overrides it when set.
//!
//! No plaintext, key material, salts, or checksums appear in any log field.

pub mod init;

pub use init::{filter, init};
