//! Engine configuration, resolved from `steward.toml`.

use std::time::Duration;

use steward_core::{ConfigError, StewardConfig};

use crate::backoff::CrashBackoffPolicy;

/// Policy inputs shared by the analyzer and the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Delay before acting on a gap, and keep-alive of dispatched actions.
    pub grace_period: Duration,
    /// Max starts sent per dispatcher cycle.
    pub sender_message_limit: usize,
    /// Max age of the last desired/actual refresh.
    pub freshness_ttl: Duration,
    pub crash_backoff: CrashBackoffPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(30),
            sender_message_limit: 30,
            freshness_ttl: Duration::from_secs(60),
            crash_backoff: CrashBackoffPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_config(config: &StewardConfig) -> Result<Self, ConfigError> {
        let durations = config.validate()?;
        Ok(Self {
            grace_period: durations.grace_period,
            sender_message_limit: config.convergence.sender_message_limit,
            freshness_ttl: durations.freshness_ttl,
            crash_backoff: CrashBackoffPolicy {
                minimum_crash_count: config.crash_backoff.minimum_crash_count,
                starting_delay: durations.starting_delay,
                maximum_delay: durations.maximum_delay,
                counter_ttl: durations.counter_ttl,
            },
        })
    }

    pub(crate) fn grace_secs(&self) -> u64 {
        self.grace_period.as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_from_steward_config() {
        let config = StewardConfig::from_toml(
            r#"
[convergence]
grace_period = "45s"
sender_message_limit = 7

[crash_backoff]
minimum_crash_count = 1
starting_delay = "10s"
maximum_delay = "5m"
"#,
        )
        .unwrap();

        let engine = EngineConfig::from_config(&config).unwrap();
        assert_eq!(engine.grace_period, Duration::from_secs(45));
        assert_eq!(engine.sender_message_limit, 7);
        assert_eq!(engine.freshness_ttl, Duration::from_secs(60));
        assert_eq!(engine.crash_backoff.minimum_crash_count, 1);
        assert_eq!(engine.crash_backoff.maximum_delay, Duration::from_secs(300));
    }

    #[test]
    fn defaults_match_default_config() {
        let engine = EngineConfig::from_config(&StewardConfig::default()).unwrap();
        assert_eq!(engine, EngineConfig::default());
    }
}
