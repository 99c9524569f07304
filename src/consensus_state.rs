use std::collections::VecDeque;

use poet_primitives::{constants::{FIELD_DURATION, FIELD_LOCAL_MEAN}, decode, encode, CanonicalValue, Value};
use tracing::debug;

use crate::{
    errors::PoetError,
    policy::NetworkView,
    settings::PoetSettings,
    types::RATIO_FIELDS,
    wait_certificate::WaitCertificate,
};

const FIELD_AGGREGATE_LOCAL_MEAN: &str = "aggregate_local_mean";
const FIELD_TOTAL_BLOCK_CLAIM_COUNT: &str = "total_block_claim_count";
const FIELD_POPULATION_SAMPLES: &str = "population_samples";

/// Duration and local mean of one accepted certificate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PopulationSample {
    pub duration: f64,
    pub local_mean: f64,
}

/// Chain-derived state feeding the local mean and the election policy.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConsensusState {
    pub aggregate_local_mean: f64,
    pub total_block_claim_count: u64,
    /// Most recent first, at most `population_estimate_sample_size` long.
    population_samples: VecDeque<PopulationSample>,
}

impl ConsensusState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn population_samples(&self) -> &VecDeque<PopulationSample> {
        &self.population_samples
    }

    /// Expected wait for the next timer.
    ///
    /// While fewer than `population_estimate_sample_size` samples exist, blends
    /// target and initial wait by the squared fill ratio. Afterwards it is
    /// `target_wait_time * population_estimate`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn compute_local_mean(&self, settings: &PoetSettings) -> f64 {
        let size = settings.population_estimate_sample_size;
        let count = self.population_samples.len();
        if count < size {
            let ratio = count as f64 / size as f64;
            let r2 = ratio * ratio;
            settings.target_wait_time * (1.0 - r2) + settings.initial_wait_time * r2
        } else {
            settings.target_wait_time * self.population_estimate(settings)
        }
    }

    /// Σ `local_mean` / Σ (`duration` - `minimum_wait_time`) over the sample window.
    ///
    /// The minimum of N exponential draws with mean m has mean m / N, so the
    /// ratio estimates N. Degenerate windows estimate a population of one.
    #[must_use]
    pub fn population_estimate(&self, settings: &PoetSettings) -> f64 {
        let (sum_means, sum_waits) = self
            .population_samples
            .iter()
            .fold((0.0, 0.0), |(m, w), s| (m + s.local_mean, w + (s.duration - settings.minimum_wait_time)));
        if sum_waits > 0.0 && sum_means > 0.0 { sum_means / sum_waits } else { 1.0 }
    }

    /// Fold an accepted certificate into the state.
    pub fn record_claim(&mut self, certificate: &WaitCertificate, settings: &PoetSettings) {
        self.aggregate_local_mean += certificate.local_mean;
        self.total_block_claim_count = self.total_block_claim_count.saturating_add(1);
        self.population_samples.push_front(PopulationSample {
            duration: certificate.duration,
            local_mean: certificate.local_mean,
        });
        self.population_samples.truncate(settings.population_estimate_sample_size);
        debug!(
            claims = self.total_block_claim_count,
            samples = self.population_samples.len(),
            "consensus state updated"
        );
    }

    #[must_use]
    pub const fn network_view(&self, validator_count: u64) -> NetworkView {
        NetworkView { validator_count, total_block_claim_count: self.total_block_claim_count }
    }

    /// Canonical bytes for persistence.
    ///
    /// # Errors
    ///
    /// Returns `PoetError::InvalidField` if the claim count exceeds the integer
    /// range and `PoetError::Canonicalization` on non-finite values.
    pub fn to_bytes(&self) -> Result<Vec<u8>, PoetError> {
        let count = i64::try_from(self.total_block_claim_count)
            .map_err(|_| PoetError::invalid("total_block_claim_count", "exceeds i64 range"))?;
        let samples = self
            .population_samples
            .iter()
            .map(|s| {
                Value::map()
                    .with(FIELD_DURATION, Value::Ratio(s.duration))
                    .with(FIELD_LOCAL_MEAN, Value::Ratio(s.local_mean))
            })
            .collect::<Vec<_>>();
        let value = Value::map()
            .with(FIELD_AGGREGATE_LOCAL_MEAN, Value::Ratio(self.aggregate_local_mean))
            .with(FIELD_TOTAL_BLOCK_CLAIM_COUNT, count)
            .with(FIELD_POPULATION_SAMPLES, samples);
        let canonical = poet_primitives::canonicalize(&value, RATIO_FIELDS)?;
        Ok(encode(&canonical))
    }

    /// Parse and validate persisted state.
    ///
    /// # Errors
    ///
    /// Returns `PoetError::Decode` for non-canonical bytes and
    /// `PoetError::InvalidField` for missing, negative or non-finite values.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PoetError> {
        let root = decode(bytes)?;
        let aggregate_local_mean = non_negative(&root, FIELD_AGGREGATE_LOCAL_MEAN)?;
        let total_block_claim_count = root
            .get(FIELD_TOTAL_BLOCK_CLAIM_COUNT)
            .and_then(CanonicalValue::as_i64)
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| PoetError::invalid("total_block_claim_count", "missing or negative"))?;
        let population_samples = root
            .get(FIELD_POPULATION_SAMPLES)
            .and_then(CanonicalValue::as_seq)
            .ok_or_else(|| PoetError::invalid("population_samples", "missing"))?
            .iter()
            .map(|s| {
                Ok(PopulationSample {
                    duration: non_negative(s, FIELD_DURATION)?,
                    local_mean: non_negative(s, FIELD_LOCAL_MEAN)?,
                })
            })
            .collect::<Result<VecDeque<_>, PoetError>>()?;
        Ok(Self { aggregate_local_mean, total_block_claim_count, population_samples })
    }
}

fn non_negative(v: &CanonicalValue, field: &'static str) -> Result<f64, PoetError> {
    match v.get(field).and_then(CanonicalValue::as_f64) {
        Some(x) if x >= 0.0 => Ok(x),
        Some(x) => Err(PoetError::invalid(field, format!("negative: {x}"))),
        None => Err(PoetError::invalid(field, "missing or not a float")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> PoetSettings {
        PoetSettings { population_estimate_sample_size: 4, ..PoetSettings::default() }
    }

    fn cert(duration: f64, local_mean: f64) -> WaitCertificate {
        WaitCertificate {
            request_time: 0.0,
            duration,
            local_mean,
            previous_certificate_id: "00000000000000aa".into(),
            validator_address: "aa".into(),
            block_hash: "bb".into(),
            signature: "cc".into(),
        }
    }

    #[test]
    fn bootstrap_blend() {
        let s = settings();
        let mut st = ConsensusState::new();
        assert!((st.compute_local_mean(&s) - 20.0).abs() < 1e-9);
        st.record_claim(&cert(10.0, 20.0), &s);
        st.record_claim(&cert(10.0, 20.0), &s);
        // ratio 0.5: 20 * 0.75 + 3000 * 0.25
        assert!((st.compute_local_mean(&s) - 765.0).abs() < 1e-9);
    }

    #[test]
    fn steady_state_uses_population_estimate() {
        let s = settings();
        let mut st = ConsensusState::new();
        for _ in 0..6 {
            // each winner waited 3s beyond the minimum under a 30s mean: population 10
            st.record_claim(&cert(4.0, 30.0), &s);
        }
        assert_eq!(st.population_samples().len(), 4);
        assert_eq!(st.total_block_claim_count, 6);
        assert!((st.population_estimate(&s) - 10.0).abs() < 1e-9);
        assert!((st.compute_local_mean(&s) - 200.0).abs() < 1e-9);
    }

    #[test]
    fn persists_through_canonical_bytes() {
        let s = settings();
        let mut st = ConsensusState::new();
        st.record_claim(&cert(4.0, 30.0), &s);
        st.record_claim(&cert(7.5, 25.0), &s);
        let bytes = st.to_bytes().expect("encode");
        assert_eq!(ConsensusState::from_bytes(&bytes).expect("decode"), st);
    }

    #[test]
    fn rejects_corrupt_state() {
        let bad = poet_primitives::to_canonical_bytes(
            &Value::map()
                .with(FIELD_AGGREGATE_LOCAL_MEAN, -1.0f64)
                .with(FIELD_TOTAL_BLOCK_CLAIM_COUNT, 1i64)
                .with(FIELD_POPULATION_SAMPLES, Vec::<Value>::new()),
            RATIO_FIELDS,
        )
        .expect("canonical");
        assert!(matches!(ConsensusState::from_bytes(&bad), Err(PoetError::InvalidField { .. })));
        assert!(ConsensusState::from_bytes(&[0xff]).is_err());
    }
}
