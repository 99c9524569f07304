//! K/c/z election eligibility.
//!
//! Rejection is a routine outcome, returned as a value. Every applicable
//! reason is reported, not just the first.
//!
//! The z-test walks the validator's win history newest first. Each committed
//! block contributes the population estimate its own certificate carried, and
//! the candidate contributes the estimate from its local mean. The test stays
//! off until the chain has `population_estimate_sample_size` claims, and the
//! walk never reaches back into those bootstrap blocks. A fresh signup is
//! tested from its first claim on a mature chain.

use tracing::{debug, info};

use crate::{
    settings::PoetSettings,
    signup::{HistoryEntry, SignupInfo},
    wait_certificate::WaitCertificate,
};

/// Why a claim was refused.
#[derive(Clone, Debug, PartialEq)]
pub enum Rejection {
    /// K-policy: the signup has used up its wins; re-signup first.
    SignupExpired { wins: u64, limit: u64 },
    /// c-policy: the signup has not yet seen enough committed blocks.
    TooSoonAfterSignup { blocks: u64, required: u64 },
    /// z-policy: the win rate is too far above what the population predicts.
    StatisticallyImprobable { z_score: f64, threshold: f64 },
}

#[derive(Clone, Debug, PartialEq)]
pub enum Eligibility {
    Eligible,
    Rejected(Vec<Rejection>),
}

impl Eligibility {
    #[must_use]
    pub const fn is_eligible(&self) -> bool {
        matches!(self, Self::Eligible)
    }
}

/// Chain-wide facts the policy needs beyond the validator's own counters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NetworkView {
    pub validator_count: u64,
    pub total_block_claim_count: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ElectionPolicy {
    pub key_block_claim_limit: u64,
    pub block_claim_delay: u64,
    pub ztest_maximum_win_deviation: f64,
    pub ztest_minimum_win_count: u64,
    pub population_estimate_sample_size: usize,
    pub target_wait_time: f64,
}

impl ElectionPolicy {
    #[must_use]
    pub const fn from_settings(settings: &PoetSettings) -> Self {
        Self {
            key_block_claim_limit: settings.key_block_claim_limit,
            block_claim_delay: settings.block_claim_delay,
            ztest_maximum_win_deviation: settings.ztest_maximum_win_deviation,
            ztest_minimum_win_count: settings.ztest_minimum_win_count,
            population_estimate_sample_size: settings.population_estimate_sample_size,
            target_wait_time: settings.target_wait_time,
        }
    }

    /// Effective c: never more than the number of other validators.
    #[must_use]
    pub fn effective_claim_delay(&self, network: &NetworkView) -> u64 {
        self.block_claim_delay.min(network.validator_count.saturating_sub(1))
    }

    /// Run K, c and z against `signup` for a claim backed by `candidate`.
    #[must_use]
    pub fn check_eligible(
        &self,
        signup: &SignupInfo,
        candidate: &WaitCertificate,
        network: &NetworkView,
    ) -> Eligibility {
        let mut reasons = Vec::new();

        if signup.wins_since_signup >= self.key_block_claim_limit {
            reasons.push(Rejection::SignupExpired {
                wins: signup.wins_since_signup,
                limit: self.key_block_claim_limit,
            });
        }

        // c is waived while the chain itself is younger than the delay
        let delay = self.effective_claim_delay(network);
        if network.total_block_claim_count > delay && signup.blocks_since_signup < delay {
            reasons.push(Rejection::TooSoonAfterSignup {
                blocks: signup.blocks_since_signup,
                required: delay,
            });
        }

        let population_estimate = candidate.population_estimate(self.target_wait_time);
        if let Some(z_score) =
            self.z_test(signup.win_history.iter(), population_estimate, network.total_block_claim_count)
        {
            reasons.push(Rejection::StatisticallyImprobable {
                z_score,
                threshold: self.ztest_maximum_win_deviation,
            });
        }

        if reasons.is_empty() {
            Eligibility::Eligible
        } else {
            info!(address = %candidate.validator_address, ?reasons, "claim rejected by election policy");
            Eligibility::Rejected(reasons)
        }
    }

    /// Check, and on success book the win against `signup`.
    pub fn accept(
        &self,
        signup: &mut SignupInfo,
        candidate: &WaitCertificate,
        network: &NetworkView,
    ) -> Eligibility {
        let verdict = self.check_eligible(signup, candidate, network);
        if verdict.is_eligible() {
            signup.record_win();
            signup.observe_block(true, candidate.population_estimate(self.target_wait_time));
            debug!(wins = signup.wins_since_signup, "claim accepted");
        }
        verdict
    }

    /// One-sample binomial z-test over `history` (newest first) with the
    /// candidate prepended as a win. Returns the offending z-score, if any.
    ///
    /// Off while the chain holds fewer than `population_estimate_sample_size`
    /// claims; after that only blocks past the bootstrap window are walked.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn z_test(
        &self,
        history: impl Iterator<Item = HistoryEntry>,
        candidate_estimate: f64,
        total_block_claim_count: u64,
    ) -> Option<f64> {
        let bootstrap = u64::try_from(self.population_estimate_sample_size).unwrap_or(u64::MAX);
        if total_block_claim_count < bootstrap {
            return None;
        }
        let window = usize::try_from(total_block_claim_count - bootstrap).unwrap_or(usize::MAX);
        let candidate = HistoryEntry { won: true, population_estimate: candidate_estimate };
        let mut observed = 0u64;
        let mut expected = 0.0f64;

        for (depth, entry) in std::iter::once(candidate).chain(history.take(window)).enumerate() {
            let n = (depth + 1) as f64;
            // estimates below one (or NaN) count as a population of one
            expected += 1.0 / entry.population_estimate.max(1.0);
            if !entry.won {
                continue;
            }
            observed += 1;
            let observed_f = observed as f64;
            if observed > self.ztest_minimum_win_count && observed_f > expected {
                let p = expected / n;
                let sd = (n * p * (1.0 - p)).sqrt();
                if sd > 0.0 {
                    let z = (observed_f - expected) / sd;
                    if z > self.ztest_maximum_win_deviation {
                        return Some(z);
                    }
                }
            }
        }
        None
    }
}
