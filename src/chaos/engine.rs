//! Per-request chaos decisions.
//!
//! # Responsibilities
//! - Turn a [`ChaosConfig`] into one [`Decision`] per request
//! - Own the random source shared by every request of a server instance
//!
//! # Design Decisions
//! - Evaluation order is fixed: drop, error, latency, corrupt
//! - Drop is terminal; nothing else is drawn once it is chosen
//! - The random source sits behind a mutex held only for the draw itself;
//!   corruption gets a child generator seeded from it

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::chaos::corruption::{self, Corrupted};

/// Status used for injected errors when none is configured.
pub const DEFAULT_ERROR_CODE: u16 = 500;

/// Fault injection parameters for one server instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChaosConfig {
    /// 0-100 percentage.
    pub drop_rate: f64,
    /// 0-100 percentage.
    pub error_rate: f64,
    /// HTTP status to return; 0 means [`DEFAULT_ERROR_CODE`].
    pub error_code: u16,
    /// 0-100 percentage.
    pub corrupt_rate: f64,
    /// Fixed latency. Wins over the random range when non-zero.
    pub latency: Duration,
    pub latency_min: Duration,
    pub latency_max: Duration,
}

/// Final decision for one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Decision {
    pub drop: bool,
    pub return_error: bool,
    pub error_code: u16,
    pub latency: Duration,
    pub corrupt: bool,
}

/// Decision engine backing one server instance.
#[derive(Debug)]
pub struct ChaosEngine {
    config: ChaosConfig,
    rng: Mutex<StdRng>,
}

impl ChaosEngine {
    /// Engine with an entropy-seeded random source.
    pub fn new(config: ChaosConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Engine with a reproducible random source.
    pub fn seeded(config: ChaosConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    pub fn with_rng(config: ChaosConfig, rng: StdRng) -> Self {
        Self {
            config,
            rng: Mutex::new(rng),
        }
    }

    /// Decide what happens to the next request.
    pub fn decide(&self) -> Decision {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        decide_with(&self.config, &mut *rng)
    }

    /// Corrupt a buffered response body.
    ///
    /// Only a child seed is drawn under the lock; the corruption runs on its own generator.
    pub fn corrupt(&self, body: &[u8]) -> Corrupted {
        let mut local = self.child_rng();
        corruption::corrupt(body, &mut local)
    }

    fn child_rng(&self) -> StdRng {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        StdRng::seed_from_u64(rng.gen())
    }
}

/// Build a decision from `config` using `rng`.
pub fn decide_with<R: Rng + ?Sized>(config: &ChaosConfig, rng: &mut R) -> Decision {
    let mut decision = Decision::default();

    if should_apply(config.drop_rate, rng) {
        decision.drop = true;
        return decision;
    }

    if should_apply(config.error_rate, rng) {
        decision.return_error = true;
        decision.error_code = if config.error_code == 0 {
            DEFAULT_ERROR_CODE
        } else {
            config.error_code
        };
    }

    decision.latency = pick_latency(config, rng);

    if should_apply(config.corrupt_rate, rng) {
        decision.corrupt = true;
    }

    decision
}

/// Bernoulli trial for a percentage. Exact at both ends.
pub fn should_apply<R: Rng + ?Sized>(rate: f64, rng: &mut R) -> bool {
    if rate.is_nan() || rate <= 0.0 {
        return false;
    }
    if rate >= 100.0 {
        return true;
    }
    rng.gen::<f64>() * 100.0 < rate
}

fn pick_latency<R: Rng + ?Sized>(config: &ChaosConfig, rng: &mut R) -> Duration {
    if !config.latency.is_zero() {
        return config.latency;
    }

    let (min, max) = (config.latency_min, config.latency_max);
    // An inverted range is rejected at load time; here it just means no latency.
    if max < min || max.is_zero() {
        return Duration::ZERO;
    }
    if max == min {
        return min;
    }

    let min_nanos = min.as_nanos() as u64;
    let max_nanos = max.as_nanos() as u64;
    Duration::from_nanos(rng.gen_range(min_nanos..max_nanos))
}
