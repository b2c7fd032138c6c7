//! Poll backoff: how long to sleep after an empty poll.

use std::time::Duration;

use rand::Rng;

use crate::config::QueueSettings;

/// Fixed-interval backoff with optional per-sleep jitter.
///
/// Without jitter every worker in a fleet wakes on the same cadence; a
/// non-zero `jitter` spreads them by up to that much per sleep.
/// Not exponential: an empty queue is polled at a steady rate.
#[derive(Debug, Clone)]
pub struct PollBackoff {
    /// Delay after an empty poll or a store failure.
    pub base: Duration,

    /// Upper bound of uniform random jitter added to `base`.
    pub jitter: Duration,
}

impl PollBackoff {
    pub fn fixed(base: Duration) -> Self {
        Self {
            base,
            jitter: Duration::ZERO,
        }
    }

    pub fn from_settings(settings: &QueueSettings) -> Self {
        Self {
            base: settings.empty_poll_delay(),
            jitter: settings.poll_jitter(),
        }
    }

    pub fn next_delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.base;
        }
        let jitter_ms = self.jitter.as_millis().min(u64::MAX as u128) as u64;
        let extra = rand::thread_rng().gen_range(0..=jitter_ms);
        self.base + Duration::from_millis(extra)
    }
}
