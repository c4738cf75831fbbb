//! Field encryption primitives.
//!
//! This module is free of I/O, audit, and configuration concerns. It provides
//! key derivation, the AEAD core, the envelope byte layout, and the plaintext
//! checksum used by the key registry and the field facade.
//!
//! # Envelope format
//!
//! ```text
//! base64( salt[64] ‖ nonce[16] ‖ tag[16] ‖ ciphertext[..] )
//! ```
//!
//! The concatenation order is fixed; envelopes written by earlier deployments
//! use the same layout.

pub mod cipher;
pub mod codec;
pub mod integrity;
pub mod kdf;

pub use cipher::{CipherError, Sealed, ALGORITHM, NONCE_LEN, TAG_LEN};
pub use codec::{CodecError, EnvelopeParts};
pub use kdf::{DerivedKey, MasterKey, KEY_LEN, SALT_LEN};
