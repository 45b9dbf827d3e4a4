//! redb table definitions for the Steward state store.
//!
//! Record tables use `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Composite keys follow `{app_id},{app_version}[,{index|guid}]`.

use redb::TableDefinition;

/// Desired specs keyed by `{app_id},{app_version}`.
pub const DESIRED: TableDefinition<&str, &[u8]> = TableDefinition::new("desired");

/// Heartbeats keyed by `{app_id},{app_version},{instance_guid}`.
pub const ACTUAL: TableDefinition<&str, &[u8]> = TableDefinition::new("actual");

/// Crash counters keyed by `{app_id},{app_version},{instance_index}`.
pub const CRASH_COUNTS: TableDefinition<&str, &[u8]> = TableDefinition::new("crash_counts");

/// Pending starts keyed by `{app_id},{app_version},{instance_index}`.
pub const PENDING_STARTS: TableDefinition<&str, &[u8]> = TableDefinition::new("pending_starts");

/// Pending stops keyed by `{instance_guid}`.
pub const PENDING_STOPS: TableDefinition<&str, &[u8]> = TableDefinition::new("pending_stops");

/// Monotonic counters keyed by metric name.
pub const METRICS: TableDefinition<&str, u64> = TableDefinition::new("metrics");

/// Bookkeeping values: freshness timestamps and the message-id sequence.
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

pub const META_DESIRED_FRESH: &str = "desired_fresh_at";
pub const META_ACTUAL_FRESH: &str = "actual_fresh_at";
pub const META_MESSAGE_SEQ: &str = "message_seq";
