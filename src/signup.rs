use std::collections::VecDeque;

use ed25519_dalek::VerifyingKey;
use tracing::info;

use crate::{errors::PoetError, signer::verifying_key_from_hex};

/// One committed block as the z-test sees it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HistoryEntry {
    pub won: bool,
    /// Population estimate carried by that block's certificate.
    pub population_estimate: f64,
}

/// Bounded record of which committed blocks this validator won, newest first.
#[derive(Clone, Debug, PartialEq)]
pub struct WinHistory {
    blocks: VecDeque<HistoryEntry>,
    limit: usize,
}

impl WinHistory {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self { blocks: VecDeque::with_capacity(limit.min(1024)), limit: limit.max(1) }
    }

    /// Record the newest committed block; the oldest entry drops off past the limit.
    pub fn push(&mut self, won: bool, population_estimate: f64) {
        self.blocks.push_front(HistoryEntry { won, population_estimate });
        self.blocks.truncate(self.limit);
    }

    /// Newest-first iteration.
    pub fn iter(&self) -> impl Iterator<Item = HistoryEntry> + '_ {
        self.blocks.iter().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    #[must_use]
    pub fn wins(&self) -> usize {
        self.blocks.iter().filter(|e| e.won).count()
    }
}

/// Result of a successful signup, plus the counters the election policy reads.
#[derive(Clone, Debug, PartialEq)]
pub struct SignupInfo {
    /// Hex public key the oracle signs timers and certificates with.
    pub poet_public_key: String,
    pub anti_sybil_id: String,
    pub nonce: String,
    pub validator_address: String,
    pub wins_since_signup: u64,
    pub blocks_since_signup: u64,
    pub win_history: WinHistory,
}

impl SignupInfo {
    #[must_use]
    pub fn new(
        poet_public_key: String,
        anti_sybil_id: String,
        nonce: String,
        validator_address: String,
        win_history_limit: usize,
    ) -> Self {
        Self {
            poet_public_key,
            anti_sybil_id,
            nonce,
            validator_address,
            wins_since_signup: 0,
            blocks_since_signup: 0,
            win_history: WinHistory::new(win_history_limit),
        }
    }

    /// Parsed PoET public key.
    ///
    /// # Errors
    ///
    /// Returns `PoetError::InvalidField` if the stored key is malformed.
    pub fn verifying_key(&self) -> Result<VerifyingKey, PoetError> {
        verifying_key_from_hex(&self.poet_public_key)
    }

    /// Adopt a fresh signup: new key and counters, same win history.
    pub fn renew(&mut self, fresh: Self) {
        info!(
            old_key = %self.poet_public_key,
            new_key = %fresh.poet_public_key,
            wins = self.wins_since_signup,
            "signup renewed"
        );
        let history = std::mem::replace(&mut self.win_history, WinHistory::new(1));
        *self = Self { win_history: history, ..fresh };
    }

    /// A block was committed to the chain; `won` when this validator claimed it.
    pub fn observe_block(&mut self, won: bool, population_estimate: f64) {
        self.blocks_since_signup = self.blocks_since_signup.saturating_add(1);
        self.win_history.push(won, population_estimate);
    }

    pub fn record_win(&mut self) {
        self.wins_since_signup = self.wins_since_signup.saturating_add(1);
    }
}
