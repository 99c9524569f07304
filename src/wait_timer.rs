use poet_primitives::{
    constants::{
        FIELD_DURATION, FIELD_LOCAL_MEAN, FIELD_PREVIOUS_CERTIFICATE_ID, FIELD_REQUEST_TIME,
        FIELD_SEQUENCE_ID, FIELD_VALIDATOR_ADDRESS, IDENTIFIER_HEX_LEN, NULL_IDENTIFIER,
    },
    is_lower_hex, to_canonical_bytes, Value,
};
use tracing::debug;

use crate::{
    election::ElectionRound, errors::PoetError, oracle::SigningOracle, signer::verify_bytes,
    signup::SignupInfo, types::RATIO_FIELDS,
};

/// Where a timer stands relative to the current round and clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerState {
    Pending,
    Expired,
    /// Issued for an earlier round; unusable whatever the clock says.
    Stale,
}

/// Oracle-signed wait timer.
#[derive(Clone, Debug, PartialEq)]
pub struct WaitTimer {
    pub request_time: f64,
    pub duration: f64,
    pub local_mean: f64,
    pub previous_certificate_id: String,
    pub validator_address: String,
    pub sequence_id: u64,
    /// Hex oracle signature over [`WaitTimer::signable_bytes`].
    pub signature: String,
}

pub(crate) fn check_identifier(field: &'static str, id: &str) -> Result<(), PoetError> {
    if id.len() == IDENTIFIER_HEX_LEN && is_lower_hex(id) {
        Ok(())
    } else {
        Err(PoetError::invalid(field, format!("not a {IDENTIFIER_HEX_LEN}-char lowercase hex id: {id:?}")))
    }
}

impl WaitTimer {
    /// Request a new timer from the oracle for the current round.
    ///
    /// The duration is drawn by the oracle, never by the caller.
    ///
    /// # Errors
    ///
    /// Returns `PoetError::InvalidField` for a non-positive local mean or a
    /// malformed previous certificate id, and `PoetError::Oracle` when the
    /// oracle cannot draw or sign.
    pub fn create<O: SigningOracle + ?Sized>(
        oracle: &O,
        signup: &SignupInfo,
        round: &ElectionRound,
        local_mean: f64,
        previous_certificate_id: &str,
        now: f64,
    ) -> Result<Self, PoetError> {
        if !(local_mean.is_finite() && local_mean > 0.0) {
            return Err(PoetError::invalid(FIELD_LOCAL_MEAN, format!("must be positive, got {local_mean}")));
        }
        check_identifier(FIELD_PREVIOUS_CERTIFICATE_ID, previous_certificate_id)?;

        let duration = oracle.draw_duration(signup, previous_certificate_id, local_mean)?;
        let mut timer = Self {
            request_time: now,
            duration,
            local_mean,
            previous_certificate_id: previous_certificate_id.to_owned(),
            validator_address: signup.validator_address.clone(),
            sequence_id: round.current(),
            signature: String::new(),
        };
        timer.signature = oracle.sign_timer(signup, &timer)?;
        debug!(
            sequence_id = timer.sequence_id,
            duration = timer.duration,
            previous = %timer.previous_certificate_id,
            "wait timer issued"
        );
        Ok(timer)
    }

    /// All fields except the signature.
    ///
    /// # Errors
    ///
    /// Returns `PoetError::InvalidField` if `sequence_id` exceeds the integer range.
    pub fn to_value(&self) -> Result<Value, PoetError> {
        let seq = i64::try_from(self.sequence_id)
            .map_err(|_| PoetError::invalid(FIELD_SEQUENCE_ID, "exceeds i64 range"))?;
        Ok(Value::map()
            .with(FIELD_REQUEST_TIME, Value::Ratio(self.request_time))
            .with(FIELD_DURATION, Value::Ratio(self.duration))
            .with(FIELD_LOCAL_MEAN, Value::Ratio(self.local_mean))
            .with(FIELD_PREVIOUS_CERTIFICATE_ID, self.previous_certificate_id.as_str())
            .with(FIELD_VALIDATOR_ADDRESS, self.validator_address.as_str())
            .with(FIELD_SEQUENCE_ID, seq))
    }

    /// The exact bytes the oracle signs.
    ///
    /// # Errors
    ///
    /// See [`WaitTimer::to_value`]; also fails on non-finite times.
    pub fn signable_bytes(&self) -> Result<Vec<u8>, PoetError> {
        Ok(to_canonical_bytes(&self.to_value()?, RATIO_FIELDS)?)
    }

    /// Check the oracle signature under the signup's PoET key.
    #[must_use]
    pub fn verify(&self, poet_public_key: &ed25519_dalek::VerifyingKey) -> bool {
        self.signable_bytes()
            .map(|msg| verify_bytes(poet_public_key, &msg, &self.signature))
            .unwrap_or(false)
    }

    #[must_use]
    pub fn is_genesis(&self) -> bool {
        self.previous_certificate_id == NULL_IDENTIFIER
    }

    #[must_use]
    pub fn expires_at(&self) -> f64 {
        self.request_time + self.duration
    }

    #[must_use]
    pub fn has_expired(&self, now: f64) -> bool {
        now >= self.expires_at()
    }

    /// Past the expiry window: `now > request_time + duration + timeout_period`.
    #[must_use]
    pub fn is_timed_out(&self, now: f64, timeout_period: f64) -> bool {
        now > self.expires_at() + timeout_period
    }

    #[must_use]
    pub fn state(&self, round: &ElectionRound, now: f64) -> TimerState {
        if self.sequence_id != round.current() {
            TimerState::Stale
        } else if self.has_expired(now) {
            TimerState::Expired
        } else {
            TimerState::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::SimulatedOracle;

    fn setup() -> (SimulatedOracle, SignupInfo, ElectionRound) {
        let oracle = SimulatedOracle::with_seal_key(&[1u8; 32], 1.0, 16);
        let validator = crate::signer::Signer::from_bytes(&[2u8; 32]);
        let signup = oracle.request_signup(&validator.public_key_hex()).expect("signup");
        (oracle, signup, ElectionRound::new(5))
    }

    #[test]
    fn created_timer_verifies_and_carries_round() {
        let (oracle, signup, round) = setup();
        let t = WaitTimer::create(&oracle, &signup, &round, 30.0, NULL_IDENTIFIER, 1000.0).expect("timer");
        assert_eq!(t.sequence_id, 5);
        assert!(t.duration >= 1.0);
        assert!(t.verify(&signup.verifying_key().expect("pk")));
        assert_eq!(t.validator_address, signup.validator_address);
    }

    #[test]
    fn tampered_duration_fails_verification() {
        let (oracle, signup, round) = setup();
        let mut t = WaitTimer::create(&oracle, &signup, &round, 30.0, NULL_IDENTIFIER, 1000.0).expect("timer");
        t.duration /= 2.0;
        assert!(!t.verify(&signup.verifying_key().expect("pk")));
    }

    #[test]
    fn state_machine_transitions() {
        let (oracle, signup, round) = setup();
        let t = WaitTimer::create(&oracle, &signup, &round, 30.0, "00000000000000aa", 1000.0).expect("timer");
        assert_eq!(t.state(&round, 1000.0), TimerState::Pending);
        assert_eq!(t.state(&round, t.expires_at()), TimerState::Expired);
        round.advance();
        assert_eq!(t.state(&round, t.expires_at()), TimerState::Stale);
    }

    #[test]
    fn timeout_window() {
        let (oracle, signup, round) = setup();
        let t = WaitTimer::create(&oracle, &signup, &round, 30.0, "00000000000000aa", 1000.0).expect("timer");
        assert!(!t.is_timed_out(t.expires_at() + 30.0, 30.0));
        assert!(t.is_timed_out(t.expires_at() + 30.5, 30.0));
    }

    #[test]
    fn bad_inputs_rejected() {
        let (oracle, signup, round) = setup();
        assert!(WaitTimer::create(&oracle, &signup, &round, 0.0, NULL_IDENTIFIER, 1.0).is_err());
        assert!(WaitTimer::create(&oracle, &signup, &round, 30.0, "XYZ", 1.0).is_err());
    }
}
