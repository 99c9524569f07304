#![forbid(unsafe_code)]
#![deny(
    warnings,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::result_large_err
)]

//! PoET primitives: canonical value encoding, SHA-256 helpers and identifiers.
//
// Shared by the engine crate and its conformance tests:
//
// - Canonical value model with a deterministic CBOR-subset encoding
// - Domain-tagged SHA-256 with length framing
// - Certificate identifiers, validator addresses and hex checks

use sha2::{Digest, Sha256};

/// 32-byte hash (SHA-256 output).
pub type Hash256 = [u8; 32];

pub mod canonical;
pub mod constants;

pub use canonical::{
    canonicalize, decode, encode, to_canonical_bytes, CanonicalValue, CanonicalizationError,
    DecodeError, Value,
};

/// Plain SHA-256.
#[must_use]
pub fn sha256(input: &[u8]) -> Hash256 {
    let digest = Sha256::digest(input);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Lowercase hex of SHA-256.
#[must_use]
pub fn sha256_hex(input: &[u8]) -> String {
    hex::encode(sha256(input))
}

/// Domain-tagged SHA-256 with length framing:
/// `SHA256( UTF8(tag) || Σ ( BE(|p|,8) || p ) )`
#[must_use]
pub fn h_tag(tag: &str, parts: &[&[u8]]) -> Hash256 {
    debug_assert!(
        tag.starts_with("poet."),
        "non-poet.* tag used in consensus hashing: {tag}"
    );
    let mut hasher = Sha256::new();
    hasher.update(tag.as_bytes());
    for p in parts {
        hasher.update((p.len() as u64).to_be_bytes());
        hasher.update(p);
    }
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// First [`constants::IDENTIFIER_HEX_LEN`] lowercase hex characters of SHA-256(`bytes`).
#[must_use]
pub fn short_identifier(bytes: &[u8]) -> String {
    let mut id = sha256_hex(bytes);
    id.truncate(constants::IDENTIFIER_HEX_LEN);
    id
}

/// Validator address: hex of the leading [`constants::ADDRESS_LEN`] bytes of SHA-256(public key).
#[must_use]
pub fn address_from_public_key(public_key: &[u8]) -> String {
    hex::encode(&sha256(public_key)[..constants::ADDRESS_LEN])
}

/// True when `s` is non-empty and made only of `0-9a-f`.
#[must_use]
pub fn is_lower_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[cfg(test)]
mod tag_asserts {
    use super::*;

    #[test]
    fn all_public_tag_constants_are_poet_namespaced() {
        for t in [
            constants::TAG_TIMER_DRAW,
            constants::TAG_SIGNUP_NONCE,
        ] {
            assert!(t.starts_with("poet."), "tag not poet.*: {t}");
        }
    }

    #[test]
    fn framing_separates_part_boundaries() {
        let a = h_tag(constants::TAG_TIMER_DRAW, &[b"ab", b"c"]);
        let b = h_tag(constants::TAG_TIMER_DRAW, &[b"a", b"bc"]);
        assert_ne!(a, b);
    }
}
