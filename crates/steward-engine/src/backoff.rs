//! Crash backoff — delay before restarting a repeatedly crashing instance.
//!
//! Restarts are immediate until an index has crashed `minimum_crash_count`
//! times. From there the delay starts at `starting_delay` and doubles per
//! further crash, capped at `maximum_delay`.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrashBackoffPolicy {
    pub minimum_crash_count: u32,
    pub starting_delay: Duration,
    pub maximum_delay: Duration,
    /// Crash counters older than this are treated as absent.
    pub counter_ttl: Duration,
}

impl Default for CrashBackoffPolicy {
    fn default() -> Self {
        Self {
            minimum_crash_count: 3,
            starting_delay: Duration::from_secs(30),
            maximum_delay: Duration::from_secs(16 * 60),
            counter_ttl: Duration::from_secs(32 * 60),
        }
    }
}

impl CrashBackoffPolicy {
    /// Delay before the restart that follows `crash_count` recorded crashes.
    pub fn delay_for(&self, crash_count: u32) -> Duration {
        if crash_count < self.minimum_crash_count {
            return Duration::ZERO;
        }

        let exponent = crash_count - self.minimum_crash_count;
        let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.starting_delay
            .checked_mul(factor)
            .unwrap_or(self.maximum_delay)
            .min(self.maximum_delay)
    }
}
