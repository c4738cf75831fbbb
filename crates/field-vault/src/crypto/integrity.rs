//! SHA-256 plaintext checksum, checked after the AEAD tag has verified.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Hex length of a SHA-256 digest.
pub const CHECKSUM_HEX_LEN: usize = 64;

/// Lower-case hex SHA-256 of `plaintext`.
pub fn checksum(plaintext: &[u8]) -> String {
    hex::encode(Sha256::digest(plaintext))
}

/// Returns `true` if `expected` is well-formed: 64 hex characters.
pub fn is_well_formed(expected: &str) -> bool {
    expected.len() == CHECKSUM_HEX_LEN && expected.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Compare the digest of `plaintext` against a stored hex checksum.
///
/// Upper- and lower-case hex are both accepted. A malformed `expected`
/// never verifies.
pub fn verify(plaintext: &[u8], expected: &str) -> bool {
    let Ok(expected) = hex::decode(expected) else {
        return false;
    };
    let digest = Sha256::digest(plaintext);
    if expected.len() != digest.len() {
        return false;
    }
    bool::from(digest.as_slice().ct_eq(&expected))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digest() {
        assert_eq!(
            checksum(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn verify_accepts_matching_checksum() {
        let sum = checksum("João Silva".as_bytes());
        assert!(is_well_formed(&sum));
        assert!(verify("João Silva".as_bytes(), &sum));
        assert!(verify("João Silva".as_bytes(), &sum.to_uppercase()));
    }

    #[test]
    fn verify_rejects_other_plaintext() {
        let sum = checksum(b"asthma");
        assert!(!verify(b"asthmb", &sum));
    }

    #[test]
    fn verify_rejects_truncated_and_extended_digests() {
        let sum = checksum(b"asthma");
        assert!(!verify(b"asthma", &sum[..CHECKSUM_HEX_LEN - 2]));
        assert!(!verify(b"asthma", &format!("{sum}00")));
    }

    #[test]
    fn verify_rejects_single_bit_difference() {
        let mut digest = Sha256::digest(b"asthma").to_vec();
        digest[31] ^= 0x01;
        assert!(!verify(b"asthma", &hex::encode(digest)));
    }

    #[test]
    fn verify_rejects_garbage() {
        assert!(!verify(b"x", "zz"));
        assert!(!verify(b"x", ""));
        assert!(!is_well_formed("abc"));
        assert!(!is_well_formed(&"g".repeat(CHECKSUM_HEX_LEN)));
    }
}
