//! Intake for wait certificates claimed by other validators.
//!
//! A claim whose signature or encoding does not check out marks its sender.
//! Every later claim from that validator address is refused, valid or not,
//! until an operator releases it.

use std::collections::HashSet;

use ed25519_dalek::VerifyingKey;
use tracing::{debug, error, info};

use crate::{errors::PoetError, settings::PoetSettings, wait_certificate::WaitCertificate};

#[derive(Clone, Debug)]
pub struct PeerClaimVerifier {
    settings: PoetSettings,
    quarantined: HashSet<String>,
}

impl PeerClaimVerifier {
    #[must_use]
    pub fn new(settings: PoetSettings) -> Self {
        Self { settings, quarantined: HashSet::new() }
    }

    /// Check a peer's certificate against chain context.
    ///
    /// # Errors
    ///
    /// - `Quarantined` if the sender was flagged by an earlier claim
    /// - `SignatureInvalid`, `Canonicalization`, `Encoding` or `Decode` when
    ///   the claim itself is bad; the sender is quarantined
    /// - `CertificateMismatch` / `InvalidField` for context mismatches, which
    ///   a peer on another fork can produce honestly
    pub fn verify_claim(
        &mut self,
        certificate: &WaitCertificate,
        expected_previous_id: &str,
        expected_local_mean: f64,
        poet_public_key: &VerifyingKey,
    ) -> Result<(), PoetError> {
        let address = &certificate.validator_address;
        if self.quarantined.contains(address) {
            debug!(%address, "dropping claim from quarantined validator");
            return Err(PoetError::Quarantined { address: address.clone() });
        }
        let verdict =
            certificate.check_valid(expected_previous_id, expected_local_mean, &self.settings, poet_public_key);
        if let Some(e) = verdict.as_ref().err().filter(|e| implicates_sender(e)) {
            error!(%address, error = %e, "peer claim failed verification, quarantining validator");
            self.quarantined.insert(address.clone());
        }
        verdict
    }

    #[must_use]
    pub fn is_quarantined(&self, address: &str) -> bool {
        self.quarantined.contains(address)
    }

    /// Lift a quarantine once the offence has been looked into.
    pub fn release(&mut self, address: &str) -> bool {
        let released = self.quarantined.remove(address);
        if released {
            info!(%address, "validator released from quarantine");
        }
        released
    }
}

/// Failures no honest sender produces, whatever fork it is on.
const fn implicates_sender(e: &PoetError) -> bool {
    matches!(
        e,
        PoetError::SignatureInvalid | PoetError::Canonicalization(_) | PoetError::Encoding(_) | PoetError::Decode(_)
    )
}
