//! Trusted signing authority boundary.
//!
//! Everything that makes a timer or certificate trustworthy goes through
//! [`SigningOracle`]. The engine only ever holds PoET public keys; private
//! keys stay behind the trait, whether it is backed by an enclave or by
//! [`SimulatedOracle`].

use std::collections::HashMap;
use std::sync::Mutex;

use rand_core::{OsRng, RngCore};
use tracing::{debug, warn};

use crate::{
    errors::{AttestationError, OracleError},
    hashers::{anti_sybil_id, signup_nonce, timer_draw_message, uniform_from_signature, validator_address},
    settings::PoetSettings,
    signer::{verify_bytes, verifying_key_from_hex, Signer},
    signup::SignupInfo,
    wait_certificate::WaitCertificate,
    wait_timer::WaitTimer,
};

/// Pluggable signing authority: signup, duration draws, timer and certificate signatures.
pub trait SigningOracle: Send + Sync {
    /// Attest `validator_identity` (hex public key) and mint a PoET key for it.
    fn request_signup(&self, validator_identity: &str) -> Result<SignupInfo, AttestationError>;

    /// Sample a wait duration for the timer that will follow `previous_certificate_id`.
    fn draw_duration(
        &self,
        signup: &SignupInfo,
        previous_certificate_id: &str,
        local_mean: f64,
    ) -> Result<f64, OracleError>;

    /// Sign an unsigned timer, returning the hex signature.
    fn sign_timer(&self, signup: &SignupInfo, timer: &WaitTimer) -> Result<String, OracleError>;

    /// Sign an unsigned certificate built from `timer`, returning the hex signature.
    fn sign_certificate(
        &self,
        signup: &SignupInfo,
        timer: &WaitTimer,
        certificate: &WaitCertificate,
    ) -> Result<String, OracleError>;

    /// Forget the key behind `signup`. Later requests under it fail.
    fn release_signup(&self, signup: &SignupInfo);
}

/// In-process oracle with software keys.
///
/// Durations are `minimum_wait_time - local_mean * ln(u)` where `u` comes from
/// a deterministic signature of the previous certificate id under a per-oracle
/// seal key, so a validator cannot re-draw for the same predecessor.
pub struct SimulatedOracle {
    seal: Signer,
    minimum_wait_time: f64,
    win_history_limit: usize,
    signups: Mutex<HashMap<String, Signer>>,
}

impl SimulatedOracle {
    #[must_use]
    pub fn new(settings: &PoetSettings) -> Self {
        Self {
            seal: Signer::generate(),
            minimum_wait_time: settings.minimum_wait_time,
            win_history_limit: settings.win_history_limit,
            signups: Mutex::new(HashMap::new()),
        }
    }

    /// Deterministic seal key, for reproducible draws.
    #[must_use]
    pub fn with_seal_key(seal_secret: &[u8; 32], minimum_wait_time: f64, win_history_limit: usize) -> Self {
        Self {
            seal: Signer::from_bytes(seal_secret),
            minimum_wait_time,
            win_history_limit,
            signups: Mutex::new(HashMap::new()),
        }
    }

    fn with_key<R>(&self, signup: &SignupInfo, f: impl FnOnce(&Signer) -> R) -> Result<R, OracleError> {
        let keys = self.signups.lock().map_err(|_| OracleError::Unavailable("key store poisoned".into()))?;
        keys.get(&signup.poet_public_key)
            .map(f)
            .ok_or_else(|| OracleError::UnknownSignup(signup.poet_public_key.clone()))
    }

    fn expected_duration(&self, previous_certificate_id: &str, local_mean: f64) -> f64 {
        let sig = self.seal.sign_bytes(&timer_draw_message(previous_certificate_id));
        self.minimum_wait_time - local_mean * uniform_from_signature(&sig).ln()
    }
}

impl std::fmt::Debug for SimulatedOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedOracle")
            .field("minimum_wait_time", &self.minimum_wait_time)
            .finish_non_exhaustive()
    }
}

impl SigningOracle for SimulatedOracle {
    fn request_signup(&self, validator_identity: &str) -> Result<SignupInfo, AttestationError> {
        let identity_key = verifying_key_from_hex(validator_identity)
            .map_err(|e| AttestationError::Refused(e.to_string()))?;
        let poet_key = Signer::generate();
        let mut entropy = [0u8; 32];
        OsRng.fill_bytes(&mut entropy);

        let info = SignupInfo::new(
            poet_key.public_key_hex(),
            anti_sybil_id(validator_identity),
            signup_nonce(validator_identity, &entropy),
            validator_address(&identity_key),
            self.win_history_limit,
        );
        self.signups
            .lock()
            .map_err(|_| AttestationError::Unreachable("key store poisoned".into()))?
            .insert(info.poet_public_key.clone(), poet_key);
        debug!(address = %info.validator_address, poet_key = %info.poet_public_key, "signup created");
        Ok(info)
    }

    fn draw_duration(
        &self,
        signup: &SignupInfo,
        previous_certificate_id: &str,
        local_mean: f64,
    ) -> Result<f64, OracleError> {
        self.with_key(signup, |_| ())?;
        Ok(self.expected_duration(previous_certificate_id, local_mean))
    }

    fn sign_timer(&self, signup: &SignupInfo, timer: &WaitTimer) -> Result<String, OracleError> {
        let expected = self.expected_duration(&timer.previous_certificate_id, timer.local_mean);
        if timer.duration.to_bits() != expected.to_bits() {
            warn!(claimed = timer.duration, expected, "timer duration was not drawn by this oracle");
            return Err(OracleError::Refused("duration not drawn by this oracle".into()));
        }
        if timer.validator_address != signup.validator_address {
            return Err(OracleError::Refused("timer address does not match signup".into()));
        }
        let msg = timer.signable_bytes().map_err(|e| OracleError::Refused(e.to_string()))?;
        self.with_key(signup, |k| hex::encode(k.sign_bytes(&msg)))
    }

    fn sign_certificate(
        &self,
        signup: &SignupInfo,
        timer: &WaitTimer,
        certificate: &WaitCertificate,
    ) -> Result<String, OracleError> {
        if !certificate.matches_timer(timer) {
            return Err(OracleError::Refused("certificate fields differ from its timer".into()));
        }
        let timer_msg = timer.signable_bytes().map_err(|e| OracleError::Refused(e.to_string()))?;
        let msg = certificate.signable_bytes().map_err(|e| OracleError::Refused(e.to_string()))?;
        self.with_key(signup, |k| {
            // the timer must have been signed by this very signup key
            verify_bytes(&k.verifying_key(), &timer_msg, &timer.signature)
                .then(|| hex::encode(k.sign_bytes(&msg)))
        })?
        .ok_or_else(|| OracleError::Refused("validator is not using its current wait timer".into()))
    }

    fn release_signup(&self, signup: &SignupInfo) {
        if let Ok(mut keys) = self.signups.lock() {
            keys.remove(&signup.poet_public_key);
        }
    }
}
