//! Signing and verification over canonical encodings.
//!
//! The signed message is always `encode(canonicalize(obj \ exclude_field, ratio_fields))`,
//! so any implementation that agrees on the canonical form agrees on what was
//! signed. Signatures travel as lowercase hex under the excluded field.
//!
//! `ratio_fields` belongs to the payload's schema: timers and certificates
//! use [`RATIO_FIELDS`](crate::types::RATIO_FIELDS), other payloads pass their own set.

use ed25519_dalek::{Signature, Signer as _, SigningKey, VerifyingKey};
use poet_primitives::{constants::FIELD_NONCE, to_canonical_bytes, Value};
use rand_core::OsRng;
use tracing::warn;

use crate::{errors::PoetError, hashers, types::wall_clock_seconds};

/// Holder of one private key.
pub struct Signer {
    key: SigningKey,
}

impl Signer {
    /// Fresh key from the OS RNG.
    #[must_use]
    pub fn generate() -> Self {
        Self { key: SigningKey::generate(&mut OsRng) }
    }

    #[must_use]
    pub fn from_bytes(secret: &[u8; 32]) -> Self {
        Self { key: SigningKey::from_bytes(secret) }
    }

    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    #[must_use]
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.key.verifying_key().as_bytes())
    }

    #[must_use]
    pub fn address(&self) -> String {
        hashers::validator_address(&self.key.verifying_key())
    }

    #[must_use]
    pub fn sign_bytes(&self, msg: &[u8]) -> [u8; 64] {
        self.key.sign(msg).to_bytes()
    }

    /// Sign `obj` and return it with the signature attached under `exclude_field`.
    ///
    /// A missing `nonce` field is filled with the current wall-clock seconds
    /// before signing; callers needing distinct signatures for identical
    /// content must supply their own nonce.
    ///
    /// # Errors
    ///
    /// Returns `PoetError::Encoding` for any malformed input: `obj` is not a
    /// map, or it does not canonicalize under `ratio_fields` (duplicate keys,
    /// non-finite floats, a ratio field holding a non-number, nesting too deep).
    pub fn sign(&self, obj: &Value, exclude_field: &str, ratio_fields: &[&str]) -> Result<Value, PoetError> {
        if !matches!(obj, Value::Map(_)) {
            return Err(PoetError::Encoding("signable object must be a map".into()));
        }
        let mut signed = obj.clone();
        if !signed.contains_key(FIELD_NONCE) {
            signed.insert(FIELD_NONCE, Value::Float(wall_clock_seconds()));
        }
        let msg = signable_bytes(&signed, exclude_field, ratio_fields).map_err(|e| match e {
            PoetError::Canonicalization(c) => PoetError::Encoding(c.to_string()),
            other => other,
        })?;
        signed.insert(exclude_field, hex::encode(self.sign_bytes(&msg)));
        Ok(signed)
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").field("public_key", &self.public_key_hex()).finish_non_exhaustive()
    }
}

/// Canonical bytes of `obj` with `exclude_field` removed.
///
/// # Errors
///
/// Returns `PoetError::Canonicalization` if `obj` cannot be canonicalized.
pub fn signable_bytes(obj: &Value, exclude_field: &str, ratio_fields: &[&str]) -> Result<Vec<u8>, PoetError> {
    let mut unsigned = obj.clone();
    unsigned.remove(exclude_field);
    Ok(to_canonical_bytes(&unsigned, ratio_fields)?)
}

/// Parse a 64-byte signature from lowercase hex.
///
/// # Errors
///
/// Returns `PoetError::InvalidField` on bad hex or wrong length.
pub fn signature_from_hex(sig_hex: &str) -> Result<[u8; 64], PoetError> {
    let raw = hex::decode(sig_hex).map_err(|e| PoetError::invalid("signature", e.to_string()))?;
    <[u8; 64]>::try_from(raw.as_slice())
        .map_err(|_| PoetError::invalid("signature", format!("expected 64 bytes got {}", raw.len())))
}

/// Parse a public key from lowercase hex.
///
/// # Errors
///
/// Returns `PoetError::InvalidField` on bad hex, wrong length or an invalid point.
pub fn verifying_key_from_hex(pk_hex: &str) -> Result<VerifyingKey, PoetError> {
    let raw = hex::decode(pk_hex).map_err(|e| PoetError::invalid("public_key", e.to_string()))?;
    let arr = <[u8; 32]>::try_from(raw.as_slice())
        .map_err(|_| PoetError::invalid("public_key", format!("expected 32 bytes got {}", raw.len())))?;
    VerifyingKey::from_bytes(&arr).map_err(|e| PoetError::invalid("public_key", e.to_string()))
}

/// Check a hex signature over raw message bytes. Never errors.
#[must_use]
pub fn verify_bytes(public_key: &VerifyingKey, msg: &[u8], sig_hex: &str) -> bool {
    signature_from_hex(sig_hex)
        .map(|sig| public_key.verify_strict(msg, &Signature::from_bytes(&sig)).is_ok())
        .unwrap_or(false)
}

/// Verify a signed object produced by [`Signer::sign`].
///
/// `ratio_fields` must match the set used when signing. Any malformed input
/// yields `false`.
#[must_use]
pub fn verify(public_key: &VerifyingKey, signed: &Value, exclude_field: &str, ratio_fields: &[&str]) -> bool {
    let Some(sig_hex) = signed.get(exclude_field).and_then(Value::as_str) else {
        return false;
    };
    match signable_bytes(signed, exclude_field, ratio_fields) {
        Ok(msg) => verify_bytes(public_key, &msg, sig_hex),
        Err(e) => {
            warn!(error = %e, "signed object failed to canonicalize");
            false
        }
    }
}
