use ed25519_dalek::VerifyingKey;
use poet_primitives::{
    address_from_public_key, constants::{TAG_SIGNUP_NONCE, TAG_TIMER_DRAW}, h_tag, sha256_hex,
    short_identifier, Hash256,
};

use crate::errors::PoetError;

/// ID = first 16 hex chars of SHA-256( signature bytes )
///
/// # Errors
///
/// Returns `PoetError::InvalidField` if `signature_hex` is not valid hex.
pub fn certificate_identifier(signature_hex: &str) -> Result<String, PoetError> {
    let sig = hex::decode(signature_hex).map_err(|e| PoetError::invalid("signature", e.to_string()))?;
    Ok(short_identifier(&sig))
}

/// Address = hex( SHA-256( pk )[..20] )
#[must_use]
pub fn validator_address(pk: &VerifyingKey) -> String {
    address_from_public_key(pk.as_bytes())
}

/// Anti-Sybil ID = hex( SHA-256( identity ) )
#[must_use]
pub fn anti_sybil_id(validator_identity: &str) -> String {
    sha256_hex(validator_identity.as_bytes())
}

/// NONCE = hex( H("poet.signup.nonce", [identity, entropy]) )
#[must_use]
pub fn signup_nonce(validator_identity: &str, entropy: &[u8; 32]) -> String {
    hex::encode(h_tag(TAG_SIGNUP_NONCE, &[validator_identity.as_bytes(), entropy]))
}

/// Message signed by the seal key when drawing a timer duration.
#[must_use]
pub fn timer_draw_message(previous_certificate_id: &str) -> Hash256 {
    h_tag(TAG_TIMER_DRAW, &[previous_certificate_id.as_bytes()])
}

/// Map the low 64 bits of a signature to a uniform sample in (0, 1].
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn uniform_from_signature(sig: &[u8; 64]) -> f64 {
    let mut low = [0u8; 8];
    low.copy_from_slice(&sig[56..]);
    let x = u64::from_be_bytes(low).max(1);
    x as f64 / u64::MAX as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use poet_primitives::constants::IDENTIFIER_HEX_LEN;

    #[test]
    fn identifier_from_hex_signature() {
        let id = certificate_identifier(&"ab".repeat(64)).expect("hex");
        assert_eq!(id.len(), IDENTIFIER_HEX_LEN);
        assert_eq!(id, short_identifier(&[0xab; 64]));
        assert!(certificate_identifier("not hex").is_err());
    }

    #[test]
    fn uniform_sample_bounds() {
        assert!(uniform_from_signature(&[0u8; 64]) > 0.0);
        assert!((uniform_from_signature(&[0xff; 64]) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn draw_message_depends_on_previous_id() {
        assert_ne!(timer_draw_message("0000000000000000"), timer_draw_message("0000000000000001"));
    }

    #[test]
    fn nonce_depends_on_entropy() {
        assert_ne!(signup_nonce("v", &[0; 32]), signup_nonce("v", &[1; 32]));
        assert_eq!(anti_sybil_id("v").len(), 64);
    }
}
