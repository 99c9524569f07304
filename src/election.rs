//! Election driver: round counter, oracle retries, interruptible wait.
//!
//! One [`Elector`] per validator process. The round counter is the only
//! state shared with the verification path, which only ever reads it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    consensus_state::ConsensusState,
    errors::PoetError,
    oracle::SigningOracle,
    policy::{ElectionPolicy, Eligibility},
    settings::PoetSettings,
    signer::Signer,
    signup::SignupInfo,
    types::Clock,
    wait_certificate::WaitCertificate,
    wait_timer::{TimerState, WaitTimer},
};

/// Process-wide election sequence counter. Single writer: the election loop.
#[derive(Debug, Default)]
pub struct ElectionRound {
    sequence: AtomicU64,
}

impl ElectionRound {
    #[must_use]
    pub const fn new(start: u64) -> Self {
        Self { sequence: AtomicU64::new(start) }
    }

    #[must_use]
    pub fn current(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    /// Start the next round; returns its sequence id.
    pub fn advance(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// Bounded exponential backoff for transient oracle failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Backoff {
    #[must_use]
    pub const fn from_settings(settings: &PoetSettings) -> Self {
        Self {
            attempts: settings.oracle_retry_attempts,
            initial_delay: settings.retry_initial_delay(),
            max_delay: settings.retry_max_delay(),
        }
    }

    /// Delay before retry number `attempt` (1-based), doubling up to `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(20);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// # Errors
    ///
    /// Returns the last error from `op`.
    pub async fn retry<T>(
        &self,
        what: &'static str,
        mut op: impl FnMut() -> Result<T, PoetError>,
    ) -> Result<T, PoetError> {
        let mut attempt = 1u32;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    let delay = self.delay_for_attempt(attempt);
                    debug!(what, attempt, ?delay, error = %e, "oracle call failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_transient() {
                        warn!(what, attempts = attempt, error = %e, "oracle retries exhausted");
                    }
                    return Err(e);
                }
            }
        }
    }
}

/// Sleep `remaining` seconds unless `cancel` fires first. `true` when the sleep completed.
pub async fn wait_out(remaining: f64, cancel: &CancellationToken) -> bool {
    let nap = Duration::try_from_secs_f64(remaining.max(0.0)).unwrap_or(Duration::MAX);
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(nap) => true,
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AbandonReason {
    /// A better peer certificate arrived, or the caller shut down.
    Cancelled,
    /// The round moved on while the timer was pending.
    Stale { timer: u64, current: u64 },
}

#[derive(Clone, Debug, PartialEq)]
pub enum RoundOutcome {
    Claimed(WaitCertificate),
    Abandoned(AbandonReason),
}

/// Ties signup, timer, wait, certificate and policy together for one validator.
pub struct Elector<O: SigningOracle + ?Sized> {
    oracle: Arc<O>,
    identity: Signer,
    settings: PoetSettings,
    policy: ElectionPolicy,
    backoff: Backoff,
    round: Arc<ElectionRound>,
    clock: Arc<dyn Clock>,
    signup: Option<SignupInfo>,
}

impl<O: SigningOracle + ?Sized> Elector<O> {
    /// # Errors
    ///
    /// Returns `PoetError::Settings` if `settings` do not validate.
    pub fn new(
        oracle: Arc<O>,
        identity: Signer,
        settings: PoetSettings,
        round: Arc<ElectionRound>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, PoetError> {
        settings.validate()?;
        Ok(Self {
            oracle,
            identity,
            policy: ElectionPolicy::from_settings(&settings),
            backoff: Backoff::from_settings(&settings),
            settings,
            round,
            clock,
            signup: None,
        })
    }

    #[must_use]
    pub const fn round(&self) -> &Arc<ElectionRound> {
        &self.round
    }

    #[must_use]
    pub const fn settings(&self) -> &PoetSettings {
        &self.settings
    }

    #[must_use]
    pub const fn signup_info(&self) -> Option<&SignupInfo> {
        self.signup.as_ref()
    }

    #[must_use]
    pub fn address(&self) -> String {
        self.identity.address()
    }

    /// Sign up, or re-sign up after K wins. Counters reset; win history carries over.
    ///
    /// # Errors
    ///
    /// Returns `PoetError::Attestation` once retries are exhausted or the
    /// oracle refuses.
    pub async fn signup(&mut self) -> Result<&SignupInfo, PoetError> {
        let identity = self.identity.public_key_hex();
        let oracle = Arc::clone(&self.oracle);
        let fresh = self
            .backoff
            .retry("request_signup", || Ok(oracle.request_signup(&identity)?))
            .await?;
        info!(address = %fresh.validator_address, poet_key = %fresh.poet_public_key, "signed up");
        let current = match self.signup.take() {
            Some(mut old) => {
                self.oracle.release_signup(&old);
                old.renew(fresh);
                old
            }
            None => fresh,
        };
        Ok(self.signup.insert(current))
    }

    /// Draw a timer, wait it out, and claim `block_hash` on top of `previous_certificate_id`.
    ///
    /// Returns `Abandoned` when `cancel` fires or the round moves on; both are
    /// routine and the caller simply starts the next round.
    ///
    /// # Errors
    ///
    /// Returns `PoetError::NotSignedUp` without a signup and propagates oracle
    /// and validation failures.
    pub async fn run_round(
        &mut self,
        state: &ConsensusState,
        previous_certificate_id: &str,
        block_hash: &str,
        cancel: &CancellationToken,
    ) -> Result<RoundOutcome, PoetError> {
        let signup = self.signup.as_ref().ok_or(PoetError::NotSignedUp)?;
        let oracle = self.oracle.as_ref();
        let local_mean = state.compute_local_mean(&self.settings);

        let timer = self
            .backoff
            .retry("sign_timer", || {
                WaitTimer::create(oracle, signup, &self.round, local_mean, previous_certificate_id, self.clock.now())
            })
            .await?;

        if !timer.is_genesis() {
            loop {
                let remaining = timer.expires_at() - self.clock.now();
                if remaining <= 0.0 {
                    break;
                }
                // tokio timers are millisecond-granular; never spin on a sub-ms remainder
                if !wait_out(remaining.max(0.001), cancel).await {
                    debug!(sequence_id = timer.sequence_id, "wait cancelled");
                    return Ok(RoundOutcome::Abandoned(AbandonReason::Cancelled));
                }
            }
        }

        let now = self.clock.now();
        if timer.state(&self.round, now) == TimerState::Stale {
            let current = self.round.current();
            debug!(timer = timer.sequence_id, current, "timer went stale while waiting");
            return Ok(RoundOutcome::Abandoned(AbandonReason::Stale { timer: timer.sequence_id, current }));
        }

        let timeout = self.settings.timer_timeout_period;
        let claimed = self
            .backoff
            .retry("sign_certificate", || {
                WaitCertificate::create(oracle, signup, &timer, &self.round, block_hash, self.clock.now(), timeout)
            })
            .await;
        match claimed {
            Ok(cert) => Ok(RoundOutcome::Claimed(cert)),
            Err(PoetError::StaleTimer { timer, current }) => {
                Ok(RoundOutcome::Abandoned(AbandonReason::Stale { timer, current }))
            }
            Err(e) => Err(e),
        }
    }

    /// Run the election policy on our own claim and, if eligible, book the win.
    ///
    /// # Errors
    ///
    /// Returns `PoetError::NotSignedUp` without a signup.
    pub fn accept_claim(
        &mut self,
        certificate: &WaitCertificate,
        state: &ConsensusState,
        validator_count: u64,
    ) -> Result<Eligibility, PoetError> {
        let signup = self.signup.as_mut().ok_or(PoetError::NotSignedUp)?;
        Ok(self.policy.accept(signup, certificate, &state.network_view(validator_count)))
    }

    /// A peer's block, claimed with `certificate`, was committed.
    pub fn observe_peer_block(&mut self, certificate: &WaitCertificate) {
        let estimate = certificate.population_estimate(self.settings.target_wait_time);
        if let Some(signup) = self.signup.as_mut() {
            signup.observe_block(false, estimate);
        }
    }
}

impl<O: SigningOracle + ?Sized> std::fmt::Debug for Elector<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Elector")
            .field("identity", &self.identity)
            .field("round", &self.round.current())
            .field("signup", &self.signup)
            .finish_non_exhaustive()
    }
}
