//! A handful of validators racing PoET rounds on a live tokio runtime.
//!
//! Each validator owns its own simulated enclave. Every round all of them
//! draw a timer on the current head and wait it out; the first to claim
//! cancels the rest, and the claim goes through the election policy before
//! it is committed.
//!
//! Usage: `cargo run --example simulate_election [settings.toml]`
//! Set `RUST_LOG=poet_engine=debug` to see timers and certificates.

use std::collections::HashSet;
use std::error::Error;
use std::sync::Arc;

use poet_engine::{
    compare_better, AbandonReason, Clock, ConsensusState, ElectionRound, Elector, Eligibility,
    PoetSettings, RoundOutcome, Signer, SimulatedOracle, WallClock, NULL_IDENTIFIER,
};
use poet_primitives::sha256_hex;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const VALIDATORS: usize = 4;
const BLOCKS: u64 = 12;

type Node = Elector<SimulatedOracle>;

fn demo_settings() -> Result<PoetSettings, Box<dyn Error>> {
    if let Some(path) = std::env::args().nth(1) {
        return Ok(PoetSettings::load(path)?);
    }
    // sub-second waits so the demo finishes quickly
    Ok(PoetSettings {
        target_wait_time: 0.25,
        initial_wait_time: 0.5,
        minimum_wait_time: 0.05,
        population_estimate_sample_size: 8,
        ..PoetSettings::default()
    })
}

/// Race every node not in `benched` on one height; returns the nodes (in
/// order) and whatever claims were made before cancellation.
async fn race(
    nodes: Vec<Node>,
    benched: &HashSet<usize>,
    state: &ConsensusState,
    previous: &str,
    block_hash: &str,
) -> Result<(Vec<Node>, Vec<(usize, poet_engine::WaitCertificate)>), Box<dyn Error>> {
    let cancel = CancellationToken::new();
    let mut tasks = Vec::with_capacity(nodes.len());
    for (i, mut node) in nodes.into_iter().enumerate() {
        let sit_out = benched.contains(&i);
        let (state, previous, block_hash, cancel) =
            (state.clone(), previous.to_owned(), block_hash.to_owned(), cancel.clone());
        tasks.push(tokio::spawn(async move {
            if sit_out {
                return (node, Ok(RoundOutcome::Abandoned(AbandonReason::Cancelled)));
            }
            let out = node.run_round(&state, &previous, &block_hash, &cancel).await;
            if matches!(out, Ok(RoundOutcome::Claimed(_))) {
                cancel.cancel();
            }
            (node, out)
        }));
    }

    let mut nodes = Vec::with_capacity(tasks.len());
    let mut claims = Vec::new();
    for (i, task) in tasks.into_iter().enumerate() {
        let (node, out) = task.await?;
        nodes.push(node);
        if let RoundOutcome::Claimed(cert) = out? {
            claims.push((i, cert));
        }
    }
    Ok((nodes, claims))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = demo_settings()?;
    let round = Arc::new(ElectionRound::new(0));
    let clock: Arc<dyn Clock> = Arc::new(WallClock::new());

    let mut nodes = Vec::with_capacity(VALIDATORS);
    for _ in 0..VALIDATORS {
        let oracle = Arc::new(SimulatedOracle::new(&settings));
        let mut node = Elector::new(oracle, Signer::generate(), settings.clone(), Arc::clone(&round), Arc::clone(&clock))?;
        node.signup().await?;
        nodes.push(node);
    }

    println!("=== PoET election: {VALIDATORS} validators, {BLOCKS} blocks ===\n");
    let mut state = ConsensusState::new();
    let mut previous = NULL_IDENTIFIER.to_owned();

    while state.total_block_claim_count < BLOCKS {
        let height = state.total_block_claim_count;
        let block_hash = sha256_hex(&height.to_be_bytes());
        let mut benched = HashSet::new();

        let (winner, cert) = loop {
            let (back, claims) = race(nodes, &benched, &state, &previous, &block_hash).await?;
            nodes = back;
            let Some(best) = claims.iter().map(|(_, c)| c).reduce(compare_better).cloned() else {
                return Err("every validator sat out the round".into());
            };
            let Some(&(idx, _)) = claims.iter().find(|(_, c)| *c == best) else {
                return Err("winning claim vanished".into());
            };
            match nodes[idx].accept_claim(&best, &state, VALIDATORS as u64)? {
                Eligibility::Eligible => break (idx, best),
                Eligibility::Rejected(reasons) => {
                    println!("  height {height}: validator {idx} rejected: {reasons:?}");
                    benched.insert(idx);
                }
            }
        };

        for (i, node) in nodes.iter_mut().enumerate() {
            if i != winner {
                node.observe_peer_block(&cert);
            }
        }
        state.record_claim(&cert, &settings);
        round.advance();
        previous = cert.identifier()?;
        println!(
            "height {height:>3}  winner {winner}  wait {:>7.3}s  local mean {:>7.3}  id {previous}",
            cert.duration, cert.local_mean
        );
    }

    println!("\nfinal local mean: {:.3}", state.compute_local_mean(&settings));
    for (i, node) in nodes.iter().enumerate() {
        if let Some(signup) = node.signup_info() {
            println!("validator {i}: {} wins since signup", signup.wins_since_signup);
        }
    }
    Ok(())
}
