//! Shared fixtures and test doubles for engine tests.

use std::collections::HashSet;
use std::sync::Mutex;

use steward_state::*;

use crate::transport::{
    ActionTransport, SendFuture, StartMessage, StopMessage, TransportError,
};

pub const NOW: Timestamp = 10_000;

pub fn key(app: &str) -> AppKey {
    AppKey::new(app, "v1")
}

pub fn desired(app: &str, instance_count: u32) -> DesiredSpec {
    DesiredSpec {
        app_id: app.to_string(),
        app_version: "v1".to_string(),
        instance_count,
        state: AppState::Started,
        package_state: PackageState::Staged,
        updated_at: 0,
    }
}

pub fn heartbeat(app: &str, index: u32, guid: &str, state: InstanceState) -> InstanceHeartbeat {
    InstanceHeartbeat {
        app_id: app.to_string(),
        app_version: "v1".to_string(),
        instance_index: index,
        instance_guid: guid.to_string(),
        state,
        reported_at: NOW,
    }
}

pub fn pending_start(app: &str, index: u32, send_on: Timestamp, priority: f64) -> PendingStart {
    PendingStart {
        app_id: app.to_string(),
        app_version: "v1".to_string(),
        instance_index: index,
        message_id: u64::from(index) + 1,
        send_on,
        sent_on: 0,
        keep_alive: 0,
        priority,
        reason: StartReason::Missing,
        skip_verification: false,
    }
}

pub fn pending_stop(app: &str, index: u32, guid: &str, reason: StopReason) -> PendingStop {
    PendingStop {
        app_id: app.to_string(),
        app_version: "v1".to_string(),
        instance_index: index,
        instance_guid: guid.to_string(),
        message_id: 100 + u64::from(index),
        send_on: NOW,
        sent_on: 0,
        keep_alive: 30,
        reason,
        skip_verification: false,
    }
}

/// In-memory store with desired and actual state marked fresh at `now`.
pub fn fresh_store(now: Timestamp) -> StateStore {
    seeded_store(vec![], vec![], now)
}

pub fn seeded_store(
    desired: Vec<DesiredSpec>,
    actual: Vec<InstanceHeartbeat>,
    now: Timestamp,
) -> StateStore {
    let store = StateStore::open_in_memory().unwrap();
    store.sync_desired_state(&desired, now).unwrap();
    store.save_actual_state(&actual, now).unwrap();
    store.mark_actual_fresh(now).unwrap();
    store
}

/// Store wrapper whose named operations fail.
pub struct FlakyStore {
    inner: StateStore,
    failing: HashSet<&'static str>,
}

impl FlakyStore {
    pub fn new(inner: StateStore) -> Self {
        Self {
            inner,
            failing: HashSet::new(),
        }
    }

    pub fn failing(mut self, op: &'static str) -> Self {
        self.failing.insert(op);
        self
    }

    fn check(&self, op: &'static str) -> StateResult<()> {
        if self.failing.contains(op) {
            Err(StateError::Unavailable(format!("{op} failed")))
        } else {
            Ok(())
        }
    }
}

impl Store for FlakyStore {
    fn get_desired_state(&self) -> StateResult<Vec<DesiredSpec>> {
        self.check("get_desired_state")?;
        self.inner.get_desired_state()
    }

    fn get_actual_state(&self, now: Timestamp) -> StateResult<Vec<InstanceHeartbeat>> {
        self.check("get_actual_state")?;
        self.inner.get_actual_state(now)
    }

    fn get_crash_counters(&self) -> StateResult<Vec<CrashCount>> {
        self.check("get_crash_counters")?;
        self.inner.get_crash_counters()
    }

    fn save_crash_counters(&self, counts: &[CrashCount]) -> StateResult<()> {
        self.check("save_crash_counters")?;
        self.inner.save_crash_counters(counts)
    }

    fn delete_crash_counters(&self, counts: &[CrashCount]) -> StateResult<u32> {
        self.check("delete_crash_counters")?;
        self.inner.delete_crash_counters(counts)
    }

    fn get_pending_starts(&self) -> StateResult<Vec<PendingStart>> {
        self.check("get_pending_starts")?;
        self.inner.get_pending_starts()
    }

    fn get_pending_stops(&self) -> StateResult<Vec<PendingStop>> {
        self.check("get_pending_stops")?;
        self.inner.get_pending_stops()
    }

    fn save_pending_starts(&self, starts: &[PendingStart]) -> StateResult<()> {
        self.check("save_pending_starts")?;
        self.inner.save_pending_starts(starts)
    }

    fn save_pending_stops(&self, stops: &[PendingStop]) -> StateResult<()> {
        self.check("save_pending_stops")?;
        self.inner.save_pending_stops(stops)
    }

    fn delete_pending_starts(&self, starts: &[PendingStart]) -> StateResult<u32> {
        self.check("delete_pending_starts")?;
        self.inner.delete_pending_starts(starts)
    }

    fn delete_pending_stops(&self, stops: &[PendingStop]) -> StateResult<u32> {
        self.check("delete_pending_stops")?;
        self.inner.delete_pending_stops(stops)
    }

    fn save_analysis(
        &self,
        starts: &[PendingStart],
        stops: &[PendingStop],
        crash_counts: &[CrashCount],
    ) -> StateResult<()> {
        self.check("save_analysis")?;
        self.inner.save_analysis(starts, stops, crash_counts)
    }

    fn allocate_message_ids(&self, count: u64) -> StateResult<u64> {
        self.check("allocate_message_ids")?;
        self.inner.allocate_message_ids(count)
    }

    fn get_freshness(&self) -> StateResult<Freshness> {
        self.check("get_freshness")?;
        self.inner.get_freshness()
    }

    fn increment_metric(&self, name: &str) -> StateResult<u64> {
        self.check("increment_metric")?;
        self.inner.increment_metric(name)
    }

    fn get_metrics(&self) -> StateResult<Vec<(String, u64)>> {
        self.check("get_metrics")?;
        self.inner.get_metrics()
    }
}

/// Transport that records messages in send order and rejects named apps.
#[derive(Default)]
pub struct RecordingTransport {
    starts: Mutex<Vec<StartMessage>>,
    stops: Mutex<Vec<StopMessage>>,
    failing_apps: HashSet<String>,
}

impl RecordingTransport {
    pub fn failing_app(mut self, app: &str) -> Self {
        self.failing_apps.insert(app.to_string());
        self
    }

    pub fn starts(&self) -> Vec<StartMessage> {
        self.starts.lock().unwrap().clone()
    }

    pub fn stops(&self) -> Vec<StopMessage> {
        self.stops.lock().unwrap().clone()
    }

    fn outcome(&self, app_id: &str) -> Result<(), TransportError> {
        if self.failing_apps.contains(app_id) {
            Err(TransportError::Status(503))
        } else {
            Ok(())
        }
    }
}

impl ActionTransport for RecordingTransport {
    fn send_start<'a>(&'a self, message: &'a StartMessage) -> SendFuture<'a> {
        Box::pin(async move {
            self.outcome(&message.app_id)?;
            self.starts.lock().unwrap().push(message.clone());
            Ok(())
        })
    }

    fn send_stop<'a>(&'a self, message: &'a StopMessage) -> SendFuture<'a> {
        Box::pin(async move {
            self.outcome(&message.app_id)?;
            self.stops.lock().unwrap().push(message.clone());
            Ok(())
        })
    }
}
