use std::cmp::Ordering;

use ed25519_dalek::VerifyingKey;
use poet_primitives::{
    constants::{
        FIELD_BLOCK_HASH, FIELD_DURATION, FIELD_LOCAL_MEAN, FIELD_PREVIOUS_CERTIFICATE_ID,
        FIELD_REQUEST_TIME, FIELD_VALIDATOR_ADDRESS,
    },
    is_lower_hex, to_canonical_bytes, Value,
};
use tracing::{debug, warn};

use crate::{
    election::ElectionRound,
    errors::PoetError,
    hashers::certificate_identifier,
    oracle::SigningOracle,
    settings::PoetSettings,
    signer::verify_bytes,
    signup::SignupInfo,
    types::RATIO_FIELDS,
    wait_timer::{check_identifier, TimerState, WaitTimer},
};

/// Absolute tolerance when comparing a certificate's local mean with the expected one.
pub const LOCAL_MEAN_TOLERANCE: f64 = 0.001;

/// Oracle-signed proof that a wait timer expired, bound to one block.
#[derive(Clone, Debug, PartialEq)]
pub struct WaitCertificate {
    pub request_time: f64,
    pub duration: f64,
    pub local_mean: f64,
    pub previous_certificate_id: String,
    pub validator_address: String,
    pub block_hash: String,
    /// Hex oracle signature over [`WaitCertificate::signable_bytes`].
    pub signature: String,
}

impl WaitCertificate {
    /// Turn an expired timer into a certificate for `block_hash`.
    ///
    /// Genesis timers (previous id is the null identifier) may claim at once
    /// and are never considered timed out.
    ///
    /// # Errors
    ///
    /// - `SignatureInvalid` if the timer was not signed under the signup's key
    /// - `StaleTimer` if the round moved on since the timer was issued
    /// - `TimerNotExpired` / `TimerTimedOut` outside the claim window
    /// - `InvalidField` for a malformed block hash
    /// - `Oracle` when the oracle refuses or fails to sign
    pub fn create<O: SigningOracle + ?Sized>(
        oracle: &O,
        signup: &SignupInfo,
        timer: &WaitTimer,
        round: &ElectionRound,
        block_hash: &str,
        now: f64,
        timeout_period: f64,
    ) -> Result<Self, PoetError> {
        let poet_key = signup.verifying_key()?;
        if !timer.verify(&poet_key) || timer.validator_address != signup.validator_address {
            warn!(address = %timer.validator_address, "wait timer signature does not verify");
            return Err(PoetError::SignatureInvalid);
        }
        if timer.state(round, now) == TimerState::Stale {
            debug!(timer = timer.sequence_id, current = round.current(), "discarding stale timer");
            return Err(PoetError::StaleTimer { timer: timer.sequence_id, current: round.current() });
        }
        if !timer.is_genesis() {
            if !timer.has_expired(now) {
                return Err(PoetError::TimerNotExpired { remaining: timer.expires_at() - now });
            }
            if timer.is_timed_out(now, timeout_period) {
                return Err(PoetError::TimerTimedOut {
                    elapsed: now - timer.request_time,
                    limit: timer.duration + timeout_period,
                });
            }
        }
        if !is_lower_hex(block_hash) {
            return Err(PoetError::invalid(FIELD_BLOCK_HASH, "must be lowercase hex"));
        }

        let mut cert = Self {
            request_time: timer.request_time,
            duration: timer.duration,
            local_mean: timer.local_mean,
            previous_certificate_id: timer.previous_certificate_id.clone(),
            validator_address: timer.validator_address.clone(),
            block_hash: block_hash.to_owned(),
            signature: String::new(),
        };
        cert.signature = oracle.sign_certificate(signup, timer, &cert)?;
        debug!(duration = cert.duration, block = %cert.block_hash, "wait certificate created");
        Ok(cert)
    }

    /// Whether the timer-derived fields equal `timer`'s.
    #[must_use]
    pub fn matches_timer(&self, timer: &WaitTimer) -> bool {
        self.request_time.to_bits() == timer.request_time.to_bits()
            && self.duration.to_bits() == timer.duration.to_bits()
            && self.local_mean.to_bits() == timer.local_mean.to_bits()
            && self.previous_certificate_id == timer.previous_certificate_id
            && self.validator_address == timer.validator_address
    }

    /// All fields except the signature.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::map()
            .with(FIELD_REQUEST_TIME, Value::Ratio(self.request_time))
            .with(FIELD_DURATION, Value::Ratio(self.duration))
            .with(FIELD_LOCAL_MEAN, Value::Ratio(self.local_mean))
            .with(FIELD_PREVIOUS_CERTIFICATE_ID, self.previous_certificate_id.as_str())
            .with(FIELD_VALIDATOR_ADDRESS, self.validator_address.as_str())
            .with(FIELD_BLOCK_HASH, self.block_hash.as_str())
    }

    /// The exact bytes the oracle signs.
    ///
    /// # Errors
    ///
    /// Returns `PoetError::Canonicalization` on non-finite numeric fields.
    pub fn signable_bytes(&self) -> Result<Vec<u8>, PoetError> {
        Ok(to_canonical_bytes(&self.to_value(), RATIO_FIELDS)?)
    }

    /// Check the oracle signature. Malformed certificates verify as `false`.
    #[must_use]
    pub fn verify(&self, poet_public_key: &VerifyingKey) -> bool {
        match self.signable_bytes() {
            Ok(msg) => verify_bytes(poet_public_key, &msg, &self.signature),
            Err(e) => {
                warn!(error = %e, "certificate failed to canonicalize");
                false
            }
        }
    }

    /// Short identifier derived from the signature; links the next certificate.
    ///
    /// # Errors
    ///
    /// Returns `PoetError::InvalidField` if the signature is not hex.
    pub fn identifier(&self) -> Result<String, PoetError> {
        certificate_identifier(&self.signature)
    }

    /// Validate against chain context: minimum wait, local mean, predecessor and signature.
    ///
    /// # Errors
    ///
    /// Returns `CertificateMismatch` naming the first failing check, or
    /// `SignatureInvalid` when the oracle signature does not verify.
    pub fn check_valid(
        &self,
        expected_previous_id: &str,
        expected_local_mean: f64,
        settings: &PoetSettings,
        poet_public_key: &VerifyingKey,
    ) -> Result<(), PoetError> {
        check_identifier(FIELD_PREVIOUS_CERTIFICATE_ID, &self.previous_certificate_id)?;
        if self.duration < settings.minimum_wait_time {
            return Err(PoetError::CertificateMismatch(format!(
                "wait time less than minimum: {} < {}",
                self.duration, settings.minimum_wait_time
            )));
        }
        if (self.local_mean - expected_local_mean).abs() > LOCAL_MEAN_TOLERANCE {
            return Err(PoetError::CertificateMismatch(format!(
                "local mean does not match: {} != {expected_local_mean}",
                self.local_mean
            )));
        }
        if self.previous_certificate_id != expected_previous_id {
            return Err(PoetError::CertificateMismatch(format!(
                "previous certificate id does not match: {} != {expected_previous_id}",
                self.previous_certificate_id
            )));
        }
        if !self.verify(poet_public_key) {
            warn!(address = %self.validator_address, "wait certificate signature does not verify");
            return Err(PoetError::SignatureInvalid);
        }
        Ok(())
    }

    /// Validator population implied by this certificate: `local_mean / target_wait_time`.
    #[must_use]
    pub fn population_estimate(&self, target_wait_time: f64) -> f64 {
        self.local_mean / target_wait_time
    }

    pub(crate) fn tie_key(&self) -> String {
        self.identifier().unwrap_or_else(|_| self.signature.clone())
    }

    /// Total order for fork resolution: shorter duration first, then smaller identifier.
    #[must_use]
    pub fn better_order(&self, other: &Self) -> Ordering {
        self.duration
            .total_cmp(&other.duration)
            .then_with(|| self.tie_key().cmp(&other.tie_key()))
    }
}

/// The better of two competing certificates. Ties on both keys keep `a`.
#[must_use]
pub fn compare_better<'a>(a: &'a WaitCertificate, b: &'a WaitCertificate) -> &'a WaitCertificate {
    if b.better_order(a) == Ordering::Less { b } else { a }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::SimulatedOracle;
    use crate::signer::Signer;
    use poet_primitives::constants::NULL_IDENTIFIER;

    const PREV: &str = "00000000000000aa";

    struct Fixture {
        oracle: SimulatedOracle,
        signup: SignupInfo,
        round: ElectionRound,
    }

    fn fixture() -> Fixture {
        let oracle = SimulatedOracle::with_seal_key(&[11u8; 32], 1.0, 64);
        let signup = oracle.request_signup(&Signer::from_bytes(&[12u8; 32]).public_key_hex()).expect("signup");
        Fixture { oracle, signup, round: ElectionRound::new(1) }
    }

    fn timer(f: &Fixture, prev: &str) -> WaitTimer {
        WaitTimer::create(&f.oracle, &f.signup, &f.round, 30.0, prev, 1000.0).expect("timer")
    }

    fn cert_with(duration: f64, signature: &str) -> WaitCertificate {
        WaitCertificate {
            request_time: 0.0,
            duration,
            local_mean: 30.0,
            previous_certificate_id: PREV.into(),
            validator_address: "aa".into(),
            block_hash: "bb".into(),
            signature: signature.into(),
        }
    }

    #[test]
    fn expired_timer_yields_verifiable_certificate() {
        let f = fixture();
        let t = timer(&f, PREV);
        let c = WaitCertificate::create(&f.oracle, &f.signup, &t, &f.round, "beef", t.expires_at(), 30.0)
            .expect("certificate");
        let pk = f.signup.verifying_key().expect("pk");
        assert!(c.verify(&pk));
        assert!(c.matches_timer(&t));
        assert_eq!(c.identifier().expect("id").len(), 16);
    }

    #[test]
    fn non_expired_non_genesis_timer_refused() {
        let f = fixture();
        let t = timer(&f, PREV);
        let r = WaitCertificate::create(&f.oracle, &f.signup, &t, &f.round, "beef", t.expires_at() - 0.5, 30.0);
        assert!(matches!(r, Err(PoetError::TimerNotExpired { .. })));
    }

    #[test]
    fn genesis_timer_claims_immediately_and_never_times_out() {
        let f = fixture();
        let t = timer(&f, NULL_IDENTIFIER);
        assert!(WaitCertificate::create(&f.oracle, &f.signup, &t, &f.round, "beef", 1000.0, 30.0).is_ok());
        assert!(WaitCertificate::create(&f.oracle, &f.signup, &t, &f.round, "beef", 1.0e9, 30.0).is_ok());
    }

    #[test]
    fn timed_out_timer_refused() {
        let f = fixture();
        let t = timer(&f, PREV);
        let r = WaitCertificate::create(&f.oracle, &f.signup, &t, &f.round, "beef", t.expires_at() + 31.0, 30.0);
        assert!(matches!(r, Err(PoetError::TimerTimedOut { .. })));
    }

    #[test]
    fn forged_timer_refused() {
        let f = fixture();
        let mut t = timer(&f, PREV);
        t.local_mean = 1.0;
        let r = WaitCertificate::create(&f.oracle, &f.signup, &t, &f.round, "beef", 1.0e6, 30.0);
        assert!(matches!(r, Err(PoetError::SignatureInvalid)));
    }

    #[test]
    fn check_valid_enforces_context() {
        let f = fixture();
        let t = timer(&f, PREV);
        let c = WaitCertificate::create(&f.oracle, &f.signup, &t, &f.round, "beef", t.expires_at(), 30.0)
            .expect("certificate");
        let pk = f.signup.verifying_key().expect("pk");
        let settings = PoetSettings::default();
        assert!(c.check_valid(PREV, 30.0005, &settings, &pk).is_ok());
        assert!(matches!(c.check_valid(PREV, 31.0, &settings, &pk), Err(PoetError::CertificateMismatch(_))));
        assert!(matches!(
            c.check_valid("00000000000000cc", 30.0, &settings, &pk),
            Err(PoetError::CertificateMismatch(_))
        ));
        let mut tampered = c;
        tampered.block_hash = "dead".into();
        assert!(matches!(tampered.check_valid(PREV, 30.0, &settings, &pk), Err(PoetError::SignatureInvalid)));
    }

    #[test]
    fn shorter_duration_wins_either_way() {
        let slow = cert_with(12.4, &"01".repeat(64));
        let fast = cert_with(8.9, &"02".repeat(64));
        assert_eq!(compare_better(&slow, &fast).duration, 8.9);
        assert_eq!(compare_better(&fast, &slow).duration, 8.9);
    }

    #[test]
    fn equal_durations_break_on_identifier() {
        let a = cert_with(5.0, &"01".repeat(64));
        let b = cert_with(5.0, &"02".repeat(64));
        let winner = if a.identifier().expect("id") < b.identifier().expect("id") { &a } else { &b };
        assert_eq!(compare_better(&a, &b), winner);
        assert_eq!(compare_better(&b, &a), winner);
    }
}
