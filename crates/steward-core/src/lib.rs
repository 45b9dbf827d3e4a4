pub mod config;

pub use config::{parse_duration, ConfigError, Durations, StewardConfig};
