//! Domain types for the Steward state store.
//!
//! Desired specs come from the control-plane authority, heartbeats from
//! execution hosts. Crash counters and pending actions are owned by the
//! convergence engine. All types serialize to JSON for storage in redb.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unix timestamp in seconds.
pub type Timestamp = u64;

/// Identity of one deployed version of an application.
///
/// A redeploy produces a new version and therefore a new key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AppKey {
    pub app_id: String,
    pub app_version: String,
}

impl AppKey {
    pub fn new(app_id: impl Into<String>, app_version: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            app_version: app_version.into(),
        }
    }

    /// Key prefix shared by every table entry of this app.
    pub fn table_key(&self) -> String {
        format!("{},{}", self.app_id, self.app_version)
    }

    pub fn index_key(&self, index: u32) -> String {
        format!("{},{},{}", self.app_id, self.app_version, index)
    }
}

impl fmt::Display for AppKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.app_id, self.app_version)
    }
}

// ── Desired state ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppState {
    Started,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageState {
    Staged,
    Pending,
    Failed,
}

/// The control plane's declaration for one app version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredSpec {
    pub app_id: String,
    pub app_version: String,
    pub instance_count: u32,
    pub state: AppState,
    pub package_state: PackageState,
    /// Unix timestamp of the last change upstream.
    #[serde(default)]
    pub updated_at: Timestamp,
}

impl DesiredSpec {
    pub fn key(&self) -> AppKey {
        AppKey::new(&self.app_id, &self.app_version)
    }

    /// Only started + staged specs ask for running instances.
    pub fn wants_instances(&self) -> bool {
        self.state == AppState::Started && self.package_state == PackageState::Staged
    }

    pub fn is_staging(&self) -> bool {
        self.package_state == PackageState::Pending
    }

    /// Instance count that corrective actions work towards.
    pub fn effective_instance_count(&self) -> u32 {
        if self.wants_instances() {
            self.instance_count
        } else {
            0
        }
    }
}

// ── Actual state ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Starting,
    Running,
    Evacuating,
    Crashed,
}

/// One instance's report from an execution host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceHeartbeat {
    pub app_id: String,
    pub app_version: String,
    pub instance_index: u32,
    pub instance_guid: String,
    pub state: InstanceState,
    pub reported_at: Timestamp,
}

impl InstanceHeartbeat {
    pub fn key(&self) -> AppKey {
        AppKey::new(&self.app_id, &self.app_version)
    }

    pub fn table_key(&self) -> String {
        format!("{},{},{}", self.app_id, self.app_version, self.instance_guid)
    }

    /// Anything but a crash counts as a live instance.
    pub fn is_live(&self) -> bool {
        self.state != InstanceState::Crashed
    }

    pub fn is_crashed(&self) -> bool {
        self.state == InstanceState::Crashed
    }

    pub fn is_evacuating(&self) -> bool {
        self.state == InstanceState::Evacuating
    }
}

// ── Crash counters ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashCount {
    pub app_id: String,
    pub app_version: String,
    pub instance_index: u32,
    pub count: u32,
    pub created_at: Timestamp,
}

impl CrashCount {
    pub fn new(key: &AppKey, instance_index: u32, created_at: Timestamp) -> Self {
        Self {
            app_id: key.app_id.clone(),
            app_version: key.app_version.clone(),
            instance_index,
            count: 0,
            created_at,
        }
    }

    pub fn key(&self) -> AppKey {
        AppKey::new(&self.app_id, &self.app_version)
    }

    pub fn table_key(&self) -> String {
        self.key().index_key(self.instance_index)
    }
}

// ── Pending actions ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartReason {
    Missing,
    Crashed,
    Evacuating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Extra,
    Duplicate,
    EvacuationComplete,
}

/// A start decided by the analyzer and not yet retired by the sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingStart {
    pub app_id: String,
    pub app_version: String,
    pub instance_index: u32,
    /// Assigned when the start is persisted; 0 before that.
    pub message_id: u64,
    pub send_on: Timestamp,
    /// 0 until first dispatched.
    pub sent_on: Timestamp,
    /// Seconds the start stays valid after first dispatch; 0 = fire and forget.
    pub keep_alive: u64,
    /// Fraction of the app currently unsatisfied, 0.0–1.0.
    pub priority: f64,
    pub reason: StartReason,
    pub skip_verification: bool,
}

impl PendingStart {
    pub fn key(&self) -> AppKey {
        AppKey::new(&self.app_id, &self.app_version)
    }

    /// At most one pending start exists per app and index.
    pub fn table_key(&self) -> String {
        self.key().index_key(self.instance_index)
    }
}

/// A stop decided by the analyzer and not yet retired by the sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingStop {
    pub app_id: String,
    pub app_version: String,
    pub instance_index: u32,
    pub instance_guid: String,
    pub message_id: u64,
    pub send_on: Timestamp,
    pub sent_on: Timestamp,
    pub keep_alive: u64,
    pub reason: StopReason,
    pub skip_verification: bool,
}

impl PendingStop {
    pub fn key(&self) -> AppKey {
        AppKey::new(&self.app_id, &self.app_version)
    }

    /// At most one pending stop exists per instance guid.
    pub fn table_key(&self) -> String {
        self.instance_guid.clone()
    }
}

// ── Freshness ─────────────────────────────────────────────────────

/// When each state source was last refreshed (0 = never).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Freshness {
    pub desired_at: Timestamp,
    pub actual_at: Timestamp,
}

impl Freshness {
    pub fn desired_is_fresh(&self, now: Timestamp, ttl_secs: u64) -> bool {
        self.desired_at != 0 && now.saturating_sub(self.desired_at) <= ttl_secs
    }

    pub fn actual_is_fresh(&self, now: Timestamp, ttl_secs: u64) -> bool {
        self.actual_at != 0 && now.saturating_sub(self.actual_at) <= ttl_secs
    }
}
