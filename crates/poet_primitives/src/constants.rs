#![forbid(unsafe_code)]

/// Identifier of "no predecessor": the previous certificate id of a genesis timer.
pub const NULL_IDENTIFIER: &str = "0000000000000000";
/// Hex characters kept from a SHA-256 digest when forming a certificate identifier.
pub const IDENTIFIER_HEX_LEN: usize = 16;
/// Bytes of SHA-256(public key) kept for a validator address.
pub const ADDRESS_LEN: usize = 20;

/// Nesting limit for canonical values (encode and decode).
pub const MAX_DEPTH: usize = 64;

pub const FIELD_SIGNATURE: &str = "signature";
pub const FIELD_NONCE: &str = "nonce";

pub const FIELD_REQUEST_TIME: &str = "request_time";
pub const FIELD_DURATION: &str = "duration";
pub const FIELD_LOCAL_MEAN: &str = "local_mean";
pub const FIELD_PREVIOUS_CERTIFICATE_ID: &str = "previous_certificate_id";
pub const FIELD_VALIDATOR_ADDRESS: &str = "validator_address";
pub const FIELD_SEQUENCE_ID: &str = "sequence_id";
pub const FIELD_BLOCK_HASH: &str = "block_hash";

/// Fields always encoded as binary64 floats, whatever numeric type the caller holds.
pub const RATIO_FIELDS: &[&str] = &[
    FIELD_DURATION,
    FIELD_LOCAL_MEAN,
    FIELD_NONCE,
    FIELD_REQUEST_TIME,
];

pub const TAG_TIMER_DRAW: &str = "poet.timer.draw";
pub const TAG_SIGNUP_NONCE: &str = "poet.signup.nonce";
