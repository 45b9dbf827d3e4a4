//! steward.toml configuration parser.
//!
//! Every section and key is optional; missing values fall back to the
//! defaults below. Durations are written as strings (`"500ms"`, `"30s"`,
//! `"16m"`, or bare seconds) and validated once by [`StewardConfig::validate`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid duration for `{key}`: {value:?}")]
    Duration { key: &'static str, value: String },

    #[error("invalid value for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StewardConfig {
    pub store: StoreConfig,
    pub convergence: ConvergenceConfig,
    pub crash_backoff: CrashBackoffConfig,
    pub transport: TransportConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
    /// How long a heartbeat stays part of the actual state without a refresh.
    pub heartbeat_ttl: String,
    /// Max age of the last desired/actual refresh before corrective action halts.
    pub freshness_ttl: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConvergenceConfig {
    pub grace_period: String,
    pub analysis_interval: String,
    pub send_interval: String,
    /// Max starts sent per dispatcher cycle.
    pub sender_message_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CrashBackoffConfig {
    /// Crash count below which restarts are not delayed.
    pub minimum_crash_count: u32,
    pub starting_delay: String,
    pub maximum_delay: String,
    /// Crash counters older than this are forgotten.
    pub counter_ttl: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    /// `host:port` of the component that executes start/stop directives.
    pub endpoint: String,
    pub timeout: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    pub port: u16,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/steward/steward.redb"),
            heartbeat_ttl: "30s".to_string(),
            freshness_ttl: "60s".to_string(),
        }
    }
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            grace_period: "30s".to_string(),
            analysis_interval: "10s".to_string(),
            send_interval: "10s".to_string(),
            sender_message_limit: 30,
        }
    }
}

impl Default for CrashBackoffConfig {
    fn default() -> Self {
        Self {
            minimum_crash_count: 3,
            starting_delay: "30s".to_string(),
            maximum_delay: "16m".to_string(),
            counter_ttl: "32m".to_string(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: "127.0.0.1:9022".to_string(),
            timeout: "5s".to_string(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: 9030 }
    }
}

/// Durations resolved from the string form in [`StewardConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Durations {
    pub heartbeat_ttl: Duration,
    pub freshness_ttl: Duration,
    pub grace_period: Duration,
    pub analysis_interval: Duration,
    pub send_interval: Duration,
    pub starting_delay: Duration,
    pub maximum_delay: Duration,
    pub counter_ttl: Duration,
    pub transport_timeout: Duration,
}

impl StewardConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Load `path` if it exists, otherwise return the defaults.
    pub fn from_file_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: StewardConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every duration parses and the numeric limits are usable.
    pub fn validate(&self) -> Result<Durations, ConfigError> {
        let durations = Durations {
            heartbeat_ttl: duration_key("store.heartbeat_ttl", &self.store.heartbeat_ttl)?,
            freshness_ttl: duration_key("store.freshness_ttl", &self.store.freshness_ttl)?,
            grace_period: duration_key("convergence.grace_period", &self.convergence.grace_period)?,
            analysis_interval: duration_key(
                "convergence.analysis_interval",
                &self.convergence.analysis_interval,
            )?,
            send_interval: duration_key("convergence.send_interval", &self.convergence.send_interval)?,
            starting_delay: duration_key(
                "crash_backoff.starting_delay",
                &self.crash_backoff.starting_delay,
            )?,
            maximum_delay: duration_key("crash_backoff.maximum_delay", &self.crash_backoff.maximum_delay)?,
            counter_ttl: duration_key("crash_backoff.counter_ttl", &self.crash_backoff.counter_ttl)?,
            transport_timeout: duration_key("transport.timeout", &self.transport.timeout)?,
        };

        if durations.maximum_delay < durations.starting_delay {
            return Err(ConfigError::Invalid {
                key: "crash_backoff.maximum_delay",
                reason: "must not be shorter than starting_delay".to_string(),
            });
        }
        if durations.analysis_interval.is_zero() || durations.send_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "convergence",
                reason: "cycle intervals must be non-zero".to_string(),
            });
        }
        if self.transport.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "transport.endpoint",
                reason: "must not be empty".to_string(),
            });
        }

        Ok(durations)
    }
}

fn duration_key(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).ok_or_else(|| ConfigError::Duration {
        key,
        value: value.to_string(),
    })
}

/// Parse a duration string like "5s", "500ms", "1m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().ok().map(|h| Duration::from_secs(h * 3600))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let durations = StewardConfig::default().validate().unwrap();
        assert_eq!(durations.grace_period, Duration::from_secs(30));
        assert_eq!(durations.maximum_delay, Duration::from_secs(16 * 60));
        assert_eq!(durations.counter_ttl, Duration::from_secs(32 * 60));
    }

    #[test]
    fn parse_partial_file_keeps_defaults() {
        let config = StewardConfig::from_toml(
            r#"
[convergence]
grace_period = "5s"
sender_message_limit = 4

[transport]
endpoint = "10.0.0.7:9022"
"#,
        )
        .unwrap();

        assert_eq!(config.convergence.grace_period, "5s");
        assert_eq!(config.convergence.sender_message_limit, 4);
        assert_eq!(config.convergence.send_interval, "10s");
        assert_eq!(config.transport.endpoint, "10.0.0.7:9022");
        assert_eq!(config.crash_backoff, CrashBackoffConfig::default());
    }

    #[test]
    fn rejects_bad_duration() {
        let err = StewardConfig::from_toml(
            r#"
[convergence]
grace_period = "soon"
"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Duration { key: "convergence.grace_period", .. }
        ));
    }

    #[test]
    fn rejects_cap_below_starting_delay() {
        let err = StewardConfig::from_toml(
            r#"
[crash_backoff]
starting_delay = "10m"
maximum_delay = "1m"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn round_trips_through_toml() {
        let config = StewardConfig::default();
        let rendered = config.to_toml_string().unwrap();
        assert!(rendered.contains("grace_period"));
        assert_eq!(StewardConfig::from_toml(&rendered).unwrap(), config);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = StewardConfig::from_file_or_default(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config, StewardConfig::default());

        let err = StewardConfig::from_file(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("ten"), None);
    }
}
