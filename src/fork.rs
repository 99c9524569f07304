//! Choosing between competing chain heads.
//!
//! Heads on the same predecessor race on wait duration. Heads on different
//! predecessors are weighed by aggregate local mean, which grows with every
//! claimed block and with the population that claimed it. Remaining ties fall
//! to the certificate identifier so every node picks the same head.

use std::cmp::Ordering;

use tracing::info;

use crate::{consensus_state::ConsensusState, wait_certificate::WaitCertificate};

/// A candidate head: its certificate and the consensus state of the block it builds on.
#[derive(Clone, Copy, Debug)]
pub struct ForkHead<'a> {
    pub certificate: &'a WaitCertificate,
    /// State as of the predecessor, before this head's claim is folded in.
    pub predecessor_state: &'a ConsensusState,
}

impl<'a> ForkHead<'a> {
    #[must_use]
    pub const fn new(certificate: &'a WaitCertificate, predecessor_state: &'a ConsensusState) -> Self {
        Self { certificate, predecessor_state }
    }

    /// Aggregate local mean of the chain ending in this head.
    #[must_use]
    pub fn aggregate_local_mean(&self) -> f64 {
        self.predecessor_state.aggregate_local_mean + self.certificate.local_mean
    }

    fn shares_predecessor(&self, other: &Self) -> bool {
        self.certificate.previous_certificate_id == other.certificate.previous_certificate_id
    }

    /// Total order, `Less` meaning `self` is the better head.
    #[must_use]
    pub fn fork_order(&self, other: &Self) -> Ordering {
        if self.shares_predecessor(other) {
            return self.certificate.better_order(other.certificate);
        }
        other
            .aggregate_local_mean()
            .total_cmp(&self.aggregate_local_mean())
            .then_with(|| self.certificate.tie_key().cmp(&other.certificate.tie_key()))
    }
}

/// The head to build on. Full ties keep `current`.
#[must_use]
pub fn choose_fork<'b, 'a>(current: &'b ForkHead<'a>, candidate: &'b ForkHead<'a>) -> &'b ForkHead<'a> {
    if candidate.fork_order(current) == Ordering::Less {
        info!(
            head = %candidate.certificate.block_hash,
            aggregate = candidate.aggregate_local_mean(),
            duration = candidate.certificate.duration,
            "switching to new fork"
        );
        candidate
    } else {
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head_cert(previous: &str, duration: f64, local_mean: f64, signature: &str) -> WaitCertificate {
        WaitCertificate {
            request_time: 0.0,
            duration,
            local_mean,
            previous_certificate_id: previous.into(),
            validator_address: "aa".into(),
            block_hash: "bb".into(),
            signature: signature.into(),
        }
    }

    fn state(aggregate_local_mean: f64) -> ConsensusState {
        let mut s = ConsensusState::new();
        s.aggregate_local_mean = aggregate_local_mean;
        s
    }

    #[test]
    fn heavier_chain_beats_faster_head_on_another_predecessor() {
        let heavy_state = state(200.0);
        let light_state = state(20.0);
        let heavy = head_cert("00000000000000aa", 9.0, 20.0, &"01".repeat(64));
        let light = head_cert("00000000000000bb", 1.5, 20.0, &"02".repeat(64));
        let heavy_head = ForkHead::new(&heavy, &heavy_state);
        let light_head = ForkHead::new(&light, &light_state);

        assert_eq!(choose_fork(&heavy_head, &light_head).certificate.duration, 9.0);
        assert_eq!(choose_fork(&light_head, &heavy_head).certificate.duration, 9.0);
    }

    #[test]
    fn same_predecessor_races_on_duration() {
        let a_state = state(500.0);
        let b_state = state(20.0);
        let slow = head_cert("00000000000000aa", 9.0, 20.0, &"01".repeat(64));
        let fast = head_cert("00000000000000aa", 1.5, 20.0, &"02".repeat(64));
        let slow_head = ForkHead::new(&slow, &a_state);
        let fast_head = ForkHead::new(&fast, &b_state);

        assert_eq!(choose_fork(&slow_head, &fast_head).certificate.duration, 1.5);
        assert_eq!(choose_fork(&fast_head, &slow_head).certificate.duration, 1.5);
    }

    #[test]
    fn equal_weight_breaks_on_identifier() {
        let s = state(100.0);
        let a = head_cert("00000000000000aa", 3.0, 20.0, &"01".repeat(64));
        let b = head_cert("00000000000000bb", 7.0, 20.0, &"02".repeat(64));
        let (ha, hb) = (ForkHead::new(&a, &s), ForkHead::new(&b, &s));
        let expected = if a.identifier().expect("id") < b.identifier().expect("id") { 3.0 } else { 7.0 };

        assert_eq!(choose_fork(&ha, &hb).certificate.duration, expected);
        assert_eq!(choose_fork(&hb, &ha).certificate.duration, expected);
    }

    #[test]
    fn recorded_claims_feed_the_weight() {
        let settings = crate::settings::PoetSettings::default();
        let mut s = ConsensusState::new();
        let block = head_cert("00000000000000aa", 25.0, 30.0, &"03".repeat(64));
        s.record_claim(&block, &settings);
        s.record_claim(&block, &settings);
        let next = head_cert("00000000000000cc", 25.0, 30.0, &"04".repeat(64));
        assert_eq!(ForkHead::new(&next, &s).aggregate_local_mean(), 90.0);
    }
}
