use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub use poet_primitives::constants::{NULL_IDENTIFIER, RATIO_FIELDS};

/// Seconds since the Unix epoch, as a float.
#[must_use]
pub fn wall_clock_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Source of "now" for timer expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// Wall time anchored once, then advanced by the tokio clock.
///
/// Under a paused tokio runtime the reading follows `tokio::time::advance`.
#[derive(Debug, Clone, Copy)]
pub struct WallClock {
    anchor_secs: f64,
    anchor: tokio::time::Instant,
}

impl WallClock {
    #[must_use]
    pub fn new() -> Self {
        Self { anchor_secs: wall_clock_seconds(), anchor: tokio::time::Instant::now() }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for WallClock {
    fn now(&self) -> f64 {
        self.anchor_secs + self.anchor.elapsed().as_secs_f64()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    bits: AtomicU64,
}

impl ManualClock {
    #[must_use]
    pub fn at(secs: f64) -> Self {
        Self { bits: AtomicU64::new(secs.to_bits()) }
    }

    pub fn set(&self, secs: f64) {
        self.bits.store(secs.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, secs: f64) {
        self.set(self.now() + secs);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}
