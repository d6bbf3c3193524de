//! Delay policies applied between attempts.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Computes the pause inserted after a failed attempt, before the next one starts.
///
/// `attempt` is the 1-based number of the attempt that just failed. The client performs the
/// actual sleep so it can be interrupted by the request's cancellation token; implementations only
/// compute the duration and must always return a finite one.
pub trait BackoffPolicy: 'static + Send + Sync {
    fn delay(&self, attempt: u32) -> Duration;
}

/// Exponential backoff, capped, with random jitter on top:
///
/// ```text
/// raw    = min(base * 2^attempt, cap)
/// jitter = uniform(0, jitter * raw)
/// delay  = raw + jitter
/// ```
///
/// With the defaults (base 1s, cap 16s, jitter 0.5) the first retry waits between 2s and 3s and
/// no pause ever exceeds 24s.
///
/// The random source lives inside the policy. Use [`ExponentialBackoff::with_seed`] to get a
/// reproducible sequence of delays.
#[derive(Debug)]
pub struct ExponentialBackoff {
    base: Duration,
    cap: Duration,
    jitter: f64,
    rng: Mutex<StdRng>,
}

impl ExponentialBackoff {
    pub const DEFAULT_BASE: Duration = Duration::from_secs(1);
    pub const DEFAULT_CAP: Duration = Duration::from_secs(16);
    pub const DEFAULT_JITTER: f64 = 0.5;

    /// Default policy seeded from the operating system.
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    /// Default policy with a deterministic random source.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            base: Self::DEFAULT_BASE,
            cap: Self::DEFAULT_CAP,
            jitter: Self::DEFAULT_JITTER,
            rng: Mutex::new(rng),
        }
    }

    /// Delay unit that gets doubled on every attempt.
    pub fn base(mut self, base: Duration) -> Self {
        self.base = base;
        self
    }

    /// Upper bound of the delay before jitter is added.
    pub fn cap(mut self, cap: Duration) -> Self {
        self.cap = cap;
        self
    }

    /// Fraction of the capped delay used as the jitter range. Negative or non-finite values
    /// disable jitter.
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = if jitter.is_finite() && jitter > 0.0 {
            jitter
        } else {
            0.0
        };
        self
    }

    pub fn without_jitter(self) -> Self {
        self.jitter(0.0)
    }

    /// The delay for `attempt` before jitter: `min(base * 2^attempt, cap)`.
    pub fn raw_delay(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.cap, |delay| delay.min(self.cap))
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let raw = self.raw_delay(attempt);
        if self.jitter == 0.0 || raw.is_zero() {
            return raw;
        }
        let factor = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .random_range(0.0..self.jitter);
        let extra =
            Duration::try_from_secs_f64(raw.as_secs_f64() * factor).unwrap_or(Duration::MAX);
        raw.saturating_add(extra)
    }
}

/// Waits the same amount of time after every failed attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConstantBackoff(pub Duration);

impl BackoffPolicy for ConstantBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        self.0
    }
}
