use std::collections::VecDeque;
use std::sync::Mutex;

use poet_engine::*;
use poet_engine::signer::verify_bytes;

/// Oracle that hands out pre-set durations, for exact scenario timing.
struct FixedOracle {
    key: Signer,
    durations: Mutex<VecDeque<f64>>,
}

impl FixedOracle {
    fn new(seed: u8, durations: &[f64]) -> Self {
        Self { key: Signer::from_bytes(&[seed; 32]), durations: Mutex::new(durations.iter().copied().collect()) }
    }
}

impl SigningOracle for FixedOracle {
    fn request_signup(&self, validator_identity: &str) -> Result<SignupInfo, AttestationError> {
        let pk = signer::verifying_key_from_hex(validator_identity)
            .map_err(|e| AttestationError::Refused(e.to_string()))?;
        Ok(SignupInfo::new(
            self.key.public_key_hex(),
            hashers::anti_sybil_id(validator_identity),
            "00".into(),
            hashers::validator_address(&pk),
            128,
        ))
    }

    fn draw_duration(&self, _: &SignupInfo, _: &str, _: f64) -> Result<f64, OracleError> {
        self.durations
            .lock()
            .expect("lock")
            .pop_front()
            .ok_or_else(|| OracleError::Unavailable("no durations left".into()))
    }

    fn sign_timer(&self, _: &SignupInfo, timer: &WaitTimer) -> Result<String, OracleError> {
        let msg = timer.signable_bytes().map_err(|e| OracleError::Refused(e.to_string()))?;
        Ok(hex::encode(self.key.sign_bytes(&msg)))
    }

    fn sign_certificate(
        &self,
        _: &SignupInfo,
        timer: &WaitTimer,
        certificate: &WaitCertificate,
    ) -> Result<String, OracleError> {
        let timer_msg = timer.signable_bytes().map_err(|e| OracleError::Refused(e.to_string()))?;
        if !verify_bytes(&self.key.verifying_key(), &timer_msg, &timer.signature) {
            return Err(OracleError::Refused("foreign timer".into()));
        }
        let msg = certificate.signable_bytes().map_err(|e| OracleError::Refused(e.to_string()))?;
        Ok(hex::encode(self.key.sign_bytes(&msg)))
    }

    fn release_signup(&self, _: &SignupInfo) {}
}

const PREV: &str = "00000000000000aa";

fn validator(seed: u8, durations: &[f64]) -> (FixedOracle, SignupInfo) {
    let oracle = FixedOracle::new(seed, durations);
    let identity = Signer::from_bytes(&[seed.wrapping_add(100); 32]);
    let signup = oracle.request_signup(&identity.public_key_hex()).expect("signup");
    (oracle, signup)
}

#[test]
fn shorter_wait_wins_regardless_of_submission_order() {
    let round = ElectionRound::new(1);
    let (oracle_a, signup_a) = validator(1, &[12.4]);
    let (oracle_b, signup_b) = validator(2, &[8.9]);

    let timer_a = WaitTimer::create(&oracle_a, &signup_a, &round, 30.0, PREV, 1000.0).expect("timer a");
    let timer_b = WaitTimer::create(&oracle_b, &signup_b, &round, 30.0, PREV, 1000.0).expect("timer b");

    let cert_b = WaitCertificate::create(&oracle_b, &signup_b, &timer_b, &round, "bb", 1009.0, 30.0).expect("cert b");
    let cert_a = WaitCertificate::create(&oracle_a, &signup_a, &timer_a, &round, "aa", 1013.0, 30.0).expect("cert a");

    assert!(cert_a.verify(&signup_a.verifying_key().expect("pk")));
    assert!(cert_b.verify(&signup_b.verifying_key().expect("pk")));
    assert_eq!(compare_better(&cert_a, &cert_b), &cert_b);
    assert_eq!(compare_better(&cert_b, &cert_a), &cert_b);
}

#[test]
fn round_change_makes_pending_timer_stale() {
    let round = ElectionRound::new(5);
    let (oracle, signup) = validator(3, &[10.0]);
    let timer = WaitTimer::create(&oracle, &signup, &round, 30.0, PREV, 1000.0).expect("timer");
    assert_eq!(timer.sequence_id, 5);

    assert_eq!(round.advance(), 6);
    let r = WaitCertificate::create(&oracle, &signup, &timer, &round, "aa", 1010.0, 30.0);
    assert!(matches!(r, Err(PoetError::StaleTimer { timer: 5, current: 6 })));
}

#[test]
fn claim_before_expiry_is_refused() {
    let round = ElectionRound::new(0);
    let (oracle, signup) = validator(4, &[10.0, 10.0]);
    let timer = WaitTimer::create(&oracle, &signup, &round, 30.0, PREV, 1000.0).expect("timer");
    assert!(matches!(
        WaitCertificate::create(&oracle, &signup, &timer, &round, "aa", 1009.99, 30.0),
        Err(PoetError::TimerNotExpired { .. })
    ));
    assert!(WaitCertificate::create(&oracle, &signup, &timer, &round, "aa", 1010.0, 30.0).is_ok());
}

#[test]
fn certificate_from_another_validators_timer_is_refused() {
    let round = ElectionRound::new(0);
    let (oracle_a, signup_a) = validator(5, &[3.0]);
    let (oracle_b, signup_b) = validator(6, &[3.0]);
    let timer_a = WaitTimer::create(&oracle_a, &signup_a, &round, 30.0, PREV, 0.0).expect("timer");
    let r = WaitCertificate::create(&oracle_b, &signup_b, &timer_a, &round, "aa", 5.0, 30.0);
    assert!(matches!(r, Err(PoetError::SignatureInvalid)));
}

#[test]
fn wire_round_trip_preserves_verifiability() {
    let round = ElectionRound::new(0);
    let (oracle, signup) = validator(7, &[4.0]);
    let timer = WaitTimer::create(&oracle, &signup, &round, 30.0, PREV, 0.0).expect("timer");
    let cert = WaitCertificate::create(&oracle, &signup, &timer, &round, "abcdef", 4.0, 30.0).expect("cert");
    let received = decode_wait_certificate(&encode_wait_certificate(&cert).expect("encode")).expect("decode");
    let pk = signup.verifying_key().expect("pk");
    assert!(received.verify(&pk));
    assert!(received.check_valid(PREV, 30.0, &PoetSettings::default(), &pk).is_ok());
    assert_eq!(received.identifier().expect("id"), cert.identifier().expect("id"));
}

#[test]
fn oracle_failure_surfaces_and_no_unsigned_timer_escapes() {
    let round = ElectionRound::new(0);
    let (oracle, signup) = validator(8, &[]);
    let r = WaitTimer::create(&oracle, &signup, &round, 30.0, PREV, 0.0);
    assert!(matches!(r, Err(PoetError::Oracle(OracleError::Unavailable(_)))));
}
