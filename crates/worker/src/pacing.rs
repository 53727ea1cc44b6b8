use dispatch_core::models::PacingRange;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Source of pacing delays, in whole seconds within `[min, max]`
pub trait DelaySource: Send + Sync {
    fn pick(&self, min_seconds: u64, max_seconds: u64) -> u64;
}

/// Thread-local RNG
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomDelaySource;

impl DelaySource for RandomDelaySource {
    fn pick(&self, min_seconds: u64, max_seconds: u64) -> u64 {
        rand::rng().random_range(min_seconds..=max_seconds)
    }
}

/// Deterministic source for tests and replays
pub struct SeededDelaySource {
    rng: Mutex<StdRng>,
}

impl SeededDelaySource {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl DelaySource for SeededDelaySource {
    fn pick(&self, min_seconds: u64, max_seconds: u64) -> u64 {
        match self.rng.lock() {
            Ok(mut rng) => rng.random_range(min_seconds..=max_seconds),
            Err(_) => min_seconds,
        }
    }
}

/// Pre-send delay policy
///
/// A job-level range overrides the pool default. When `min >= max` the delay
/// is exactly `min`.
#[derive(Clone)]
pub struct PacingPolicy {
    default_range: PacingRange,
    source: Arc<dyn DelaySource>,
}

impl PacingPolicy {
    pub fn new(default_range: PacingRange, source: Arc<dyn DelaySource>) -> Self {
        Self {
            default_range,
            source,
        }
    }

    pub fn random(min_seconds: u64, max_seconds: u64) -> Self {
        Self::new(
            PacingRange::new(min_seconds, max_seconds),
            Arc::new(RandomDelaySource),
        )
    }

    /// No delay at all
    pub fn none() -> Self {
        Self::random(0, 0)
    }

    pub fn delay_for(&self, job_range: Option<PacingRange>) -> Duration {
        let range = job_range.unwrap_or(self.default_range);
        if range.is_fixed() {
            return range.min();
        }
        Duration::from_secs(self.source.pick(range.min_seconds, range.max_seconds))
    }
}

impl std::fmt::Debug for PacingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacingPolicy")
            .field("default_range", &self.default_range)
            .finish()
    }
}
