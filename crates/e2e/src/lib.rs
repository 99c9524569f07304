//! Multi-validator election harness for end-to-end tests.
//!
//! Every validator gets its own `SimulatedOracle` (its own enclave) and the
//! network drives rounds on a manual clock: all validators draw timers on the
//! current head, the clock jumps to the shortest expiry, and candidates claim
//! in wait order until one passes the election policy.

#![forbid(unsafe_code)]
#![deny(warnings)]

use poet_engine::{
    ConsensusState, ElectionPolicy, ElectionRound, Eligibility, ManualClock, Clock, PoetError,
    PoetSettings, Rejection, Signer, SigningOracle, SignupInfo, SimulatedOracle, WaitCertificate,
    WaitTimer, NULL_IDENTIFIER,
};
use poet_primitives::{h_tag, sha256_hex};

pub struct Validator {
    pub oracle: SimulatedOracle,
    pub identity: Signer,
    pub signup: SignupInfo,
}

/// One committed block.
#[derive(Clone, Debug)]
pub struct Block {
    pub height: u64,
    pub winner: usize,
    pub certificate: WaitCertificate,
    /// Shorter waits that the policy turned away, in wait order.
    pub rejected: Vec<(usize, Vec<Rejection>)>,
}

pub struct Network {
    pub settings: PoetSettings,
    pub policy: ElectionPolicy,
    pub round: ElectionRound,
    pub clock: ManualClock,
    pub state: ConsensusState,
    pub validators: Vec<Validator>,
    pub chain: Vec<WaitCertificate>,
}

fn seed(label: &str, index: usize) -> [u8; 32] {
    h_tag("poet.test.seed", &[label.as_bytes(), &(index as u64).to_be_bytes()])
}

/// Stand-in block content for `height`.
#[must_use]
pub fn block_hash(height: u64) -> String {
    sha256_hex(&height.to_be_bytes())
}

impl Network {
    /// Deterministic seal and identity keys per validator index.
    ///
    /// # Errors
    ///
    /// Returns `PoetError::Settings` for invalid settings and
    /// `PoetError::Attestation` if a signup is refused.
    pub fn new(validator_count: usize, settings: PoetSettings) -> Result<Self, PoetError> {
        settings.validate()?;
        let validators = (0..validator_count)
            .map(|i| -> Result<Validator, PoetError> {
                let oracle = SimulatedOracle::with_seal_key(
                    &seed("seal", i),
                    settings.minimum_wait_time,
                    settings.win_history_limit,
                );
                let identity = Signer::from_bytes(&seed("identity", i));
                let signup = oracle.request_signup(&identity.public_key_hex())?;
                Ok(Validator { oracle, identity, signup })
            })
            .collect::<Result<Vec<_>, PoetError>>()?;
        Ok(Self {
            policy: ElectionPolicy::from_settings(&settings),
            settings,
            round: ElectionRound::new(0),
            clock: ManualClock::at(1_000.0),
            state: ConsensusState::new(),
            validators,
            chain: Vec::new(),
        })
    }

    /// Identifier of the chain head, or the null identifier before genesis.
    ///
    /// # Errors
    ///
    /// Returns `PoetError::InvalidField` if the head's signature is malformed.
    pub fn head_id(&self) -> Result<String, PoetError> {
        self.chain.last().map_or_else(|| Ok(NULL_IDENTIFIER.to_owned()), WaitCertificate::identifier)
    }

    fn validator_count(&self) -> u64 {
        u64::try_from(self.validators.len()).unwrap_or(u64::MAX)
    }

    /// Re-sign up every validator that has used up its K wins.
    fn renew_expired_signups(&mut self) -> Result<(), PoetError> {
        let limit = self.policy.key_block_claim_limit;
        for v in self.validators.iter_mut().filter(|v| v.signup.wins_since_signup >= limit) {
            let fresh = v.oracle.request_signup(&v.identity.public_key_hex())?;
            v.oracle.release_signup(&v.signup);
            v.signup.renew(fresh);
        }
        Ok(())
    }

    /// Run one election round. `None` when every candidate was rejected.
    ///
    /// # Errors
    ///
    /// Propagates oracle and certificate failures.
    pub fn step(&mut self) -> Result<Option<Block>, PoetError> {
        self.renew_expired_signups()?;

        let previous = self.head_id()?;
        let local_mean = self.state.compute_local_mean(&self.settings);
        let now = self.clock.now();
        let mut timers = self
            .validators
            .iter()
            .enumerate()
            .map(|(i, v)| {
                WaitTimer::create(&v.oracle, &v.signup, &self.round, local_mean, &previous, now).map(|t| (i, t))
            })
            .collect::<Result<Vec<_>, PoetError>>()?;
        timers.sort_by(|a, b| a.1.duration.total_cmp(&b.1.duration));

        let view = self.state.network_view(self.validator_count());
        let height = u64::try_from(self.chain.len()).unwrap_or(u64::MAX);
        let hash = block_hash(height);
        let mut rejected = Vec::new();

        for (i, timer) in &timers {
            if !timer.is_genesis() {
                self.clock.set(self.clock.now().max(timer.expires_at()));
            }
            let v = &mut self.validators[*i];
            let certificate = WaitCertificate::create(
                &v.oracle,
                &v.signup,
                timer,
                &self.round,
                &hash,
                self.clock.now(),
                self.settings.timer_timeout_period,
            )?;
            match self.policy.accept(&mut v.signup, &certificate, &view) {
                Eligibility::Eligible => return Ok(Some(self.commit(*i, certificate, rejected))),
                Eligibility::Rejected(reasons) => rejected.push((*i, reasons)),
            }
        }
        Ok(None)
    }

    fn commit(&mut self, winner: usize, certificate: WaitCertificate, rejected: Vec<(usize, Vec<Rejection>)>) -> Block {
        let estimate = certificate.population_estimate(self.settings.target_wait_time);
        for (i, v) in self.validators.iter_mut().enumerate() {
            if i != winner {
                v.signup.observe_block(false, estimate);
            }
        }
        self.state.record_claim(&certificate, &self.settings);
        self.chain.push(certificate.clone());
        self.round.advance();
        Block {
            height: u64::try_from(self.chain.len() - 1).unwrap_or(u64::MAX),
            winner,
            certificate,
            rejected,
        }
    }

    /// Run `blocks` rounds, stopping early if a round produces no winner.
    ///
    /// # Errors
    ///
    /// Propagates the first failing round.
    pub fn run(&mut self, blocks: usize) -> Result<Vec<Block>, PoetError> {
        let mut out = Vec::with_capacity(blocks);
        for _ in 0..blocks {
            match self.step()? {
                Some(block) => out.push(block),
                None => break,
            }
        }
        Ok(out)
    }
}
