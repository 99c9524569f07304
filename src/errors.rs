use poet_primitives::{CanonicalizationError, DecodeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoetError {
    #[error("canonicalization failed: {0}")]
    Canonicalization(#[from] CanonicalizationError),

    #[error("encode error: {0}")]
    Encoding(String),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("invalid signature")]
    SignatureInvalid,

    #[error("attestation failed: {0}")]
    Attestation(#[from] AttestationError),

    #[error("oracle call failed: {0}")]
    Oracle(#[from] OracleError),

    #[error("stale timer: sequence {timer} but current round is {current}")]
    StaleTimer { timer: u64, current: u64 },

    #[error("timer not expired: {remaining:.3}s remaining")]
    TimerNotExpired { remaining: f64 },

    #[error("timer timed out: {elapsed:.3}s past request, limit {limit:.3}s")]
    TimerTimedOut { elapsed: f64, limit: f64 },

    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("certificate mismatch: {0}")]
    CertificateMismatch(String),

    #[error("settings: {0}")]
    Settings(#[from] SettingsError),

    #[error("no active signup")]
    NotSignedUp,

    #[error("claims from {address} are held pending investigation")]
    Quarantined { address: String },
}

impl PoetError {
    /// Whether retrying the same oracle call may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Attestation(e) => e.is_transient(),
            Self::Oracle(e) => e.is_transient(),
            _ => false,
        }
    }

    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField { field, reason: reason.into() }
    }
}

/// Failure of the signup/attestation path.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AttestationError {
    #[error("attestation service unreachable: {0}")]
    Unreachable(String),

    #[error("attestation request timed out")]
    Timeout,

    #[error("signup refused: {0}")]
    Refused(String),
}

impl AttestationError {
    /// Whether a retry with backoff may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Timeout)
    }
}

/// Failure of a timer or certificate signing request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error("oracle unavailable: {0}")]
    Unavailable(String),

    #[error("oracle request timed out")]
    Timeout,

    #[error("unknown signup {0}")]
    UnknownSignup(String),

    #[error("oracle refused request: {0}")]
    Refused(String),
}

impl OracleError {
    /// Whether a retry with backoff may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout)
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("reading settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("parsing settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
