#![forbid(unsafe_code)]
#![deny(warnings)]
#![deny(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

//! PoET Engine - Proof-of-Elapsed-Time leader election core
//!
//! Wait timers, wait certificates and the K/c/z election policy, built on a
//! canonical, signature-stable encoding shared with every other
//! implementation of the protocol.
//!
//! Signatures are Ed25519, not secp256k1. The canonical bytes match other
//! implementations, but signatures produced by a secp256k1 signer (such as the
//! Sawtooth SDK) cannot be verified here, and ours cannot be verified there.

// Fixed choices:
// - Canonical form: sorted-key CBOR subset, floats always binary64 (see `poet_primitives`)
// - Signature: Ed25519 over the canonical bytes, signature field excluded
// - Identifiers: first 16 hex chars of SHA-256(signature)
// - Trust: every timer and certificate signature comes from a `SigningOracle`

pub mod types;
pub mod errors;
pub mod hashers;
pub mod signer;
pub mod signup;
pub mod oracle;
pub mod wait_timer;
pub mod wait_certificate;
pub mod policy;
pub mod fork;
pub mod peer;
pub mod consensus_state;
pub mod election;
pub mod settings;
pub mod ser;

pub use poet_primitives::{canonicalize, decode, encode, CanonicalValue, Value};
pub use types::*;
pub use errors::{AttestationError, OracleError, PoetError, SettingsError};
pub use signer::Signer;
pub use signup::{HistoryEntry, SignupInfo, WinHistory};
pub use oracle::{SigningOracle, SimulatedOracle};
pub use wait_timer::{TimerState, WaitTimer};
pub use wait_certificate::{compare_better, WaitCertificate};
pub use fork::{choose_fork, ForkHead};
pub use peer::PeerClaimVerifier;
pub use policy::{ElectionPolicy, Eligibility, NetworkView, Rejection};
pub use consensus_state::ConsensusState;
pub use election::{AbandonReason, ElectionRound, Elector, RoundOutcome};
pub use settings::PoetSettings;
pub use ser::{decode_wait_certificate, decode_wait_timer, encode_wait_certificate, encode_wait_timer};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
