use std::time::Duration;

use rand::Rng;

/// Default delay before retrying a device.
pub const DEFAULT_BASE: Duration = Duration::from_secs(5);

/// Default ceiling for a single retry delay.
pub const DEFAULT_MAX: Duration = Duration::from_secs(60);

/// Jittered retry delay.
///
/// Every retry waits `base` plus a uniform jitter in `[0, base/2)`, capped at
/// `max`. Delays do not grow with the attempt count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE, DEFAULT_MAX)
    }
}

impl Backoff {
    pub const fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Draws a fresh delay from the thread-local RNG.
    pub fn delay(&self) -> Duration {
        self.delay_with(&mut rand::thread_rng())
    }

    /// Draws a fresh delay from `rng`.
    pub fn delay_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let half_nanos = u64::try_from((self.base / 2).as_nanos()).unwrap_or(u64::MAX);
        let jitter = if half_nanos == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(rng.gen_range(0..half_nanos))
        };

        (self.base + jitter).min(self.max)
    }
}
