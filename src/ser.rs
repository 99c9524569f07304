//! Transport encoding of timers and certificates.
//!
//! The wire form is the canonical map of all fields with the signature
//! included under `signature`. Decoding is strict: the bytes must be
//! canonical, every field must be present with the right type, and nothing
//! else may appear.

use poet_primitives::{
    constants::{
        FIELD_BLOCK_HASH, FIELD_DURATION, FIELD_LOCAL_MEAN, FIELD_PREVIOUS_CERTIFICATE_ID,
        FIELD_REQUEST_TIME, FIELD_SEQUENCE_ID, FIELD_SIGNATURE, FIELD_VALIDATOR_ADDRESS,
    },
    decode, to_canonical_bytes, CanonicalValue, Value,
};

use crate::{errors::PoetError, types::RATIO_FIELDS, wait_certificate::WaitCertificate, wait_timer::WaitTimer};

const TIMER_FIELDS: usize = 7;
const CERTIFICATE_FIELDS: usize = 7;

fn with_signature(mut v: Value, signature: &str) -> Value {
    v.insert(FIELD_SIGNATURE, signature);
    v
}

/// # Errors
///
/// Returns `PoetError` if the timer holds non-finite numbers or an out-of-range sequence id.
pub fn encode_wait_timer(timer: &WaitTimer) -> Result<Vec<u8>, PoetError> {
    Ok(to_canonical_bytes(&with_signature(timer.to_value()?, &timer.signature), RATIO_FIELDS)?)
}

/// # Errors
///
/// Returns `PoetError` if the certificate holds non-finite numbers.
pub fn encode_wait_certificate(cert: &WaitCertificate) -> Result<Vec<u8>, PoetError> {
    Ok(to_canonical_bytes(&with_signature(cert.to_value(), &cert.signature), RATIO_FIELDS)?)
}

struct Fields<'a>(&'a std::collections::BTreeMap<String, CanonicalValue>);

impl<'a> Fields<'a> {
    fn open(v: &'a CanonicalValue, expected: usize) -> Result<Self, PoetError> {
        match v {
            CanonicalValue::Map(m) if m.len() == expected => Ok(Self(m)),
            CanonicalValue::Map(m) => Err(PoetError::invalid(
                "record",
                format!("expected {expected} fields got {}", m.len()),
            )),
            _ => Err(PoetError::Encoding("record is not a map".into())),
        }
    }

    fn float(&self, field: &'static str) -> Result<f64, PoetError> {
        self.0
            .get(field)
            .and_then(CanonicalValue::as_f64)
            .ok_or_else(|| PoetError::invalid(field, "missing or not a float"))
    }

    fn text(&self, field: &'static str) -> Result<String, PoetError> {
        self.0
            .get(field)
            .and_then(CanonicalValue::as_str)
            .map(str::to_owned)
            .ok_or_else(|| PoetError::invalid(field, "missing or not text"))
    }

    fn unsigned(&self, field: &'static str) -> Result<u64, PoetError> {
        self.0
            .get(field)
            .and_then(CanonicalValue::as_i64)
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| PoetError::invalid(field, "missing or not a non-negative integer"))
    }
}

/// # Errors
///
/// Returns `PoetError::Decode` for non-canonical bytes and
/// `PoetError::InvalidField` for missing, extra or mistyped fields.
pub fn decode_wait_timer(bytes: &[u8]) -> Result<WaitTimer, PoetError> {
    let root = decode(bytes)?;
    let f = Fields::open(&root, TIMER_FIELDS)?;
    Ok(WaitTimer {
        request_time: f.float(FIELD_REQUEST_TIME)?,
        duration: f.float(FIELD_DURATION)?,
        local_mean: f.float(FIELD_LOCAL_MEAN)?,
        previous_certificate_id: f.text(FIELD_PREVIOUS_CERTIFICATE_ID)?,
        validator_address: f.text(FIELD_VALIDATOR_ADDRESS)?,
        sequence_id: f.unsigned(FIELD_SEQUENCE_ID)?,
        signature: f.text(FIELD_SIGNATURE)?,
    })
}

/// # Errors
///
/// Returns `PoetError::Decode` for non-canonical bytes and
/// `PoetError::InvalidField` for missing, extra or mistyped fields.
pub fn decode_wait_certificate(bytes: &[u8]) -> Result<WaitCertificate, PoetError> {
    let root = decode(bytes)?;
    let f = Fields::open(&root, CERTIFICATE_FIELDS)?;
    Ok(WaitCertificate {
        request_time: f.float(FIELD_REQUEST_TIME)?,
        duration: f.float(FIELD_DURATION)?,
        local_mean: f.float(FIELD_LOCAL_MEAN)?,
        previous_certificate_id: f.text(FIELD_PREVIOUS_CERTIFICATE_ID)?,
        validator_address: f.text(FIELD_VALIDATOR_ADDRESS)?,
        block_hash: f.text(FIELD_BLOCK_HASH)?,
        signature: f.text(FIELD_SIGNATURE)?,
    })
}
