//! Reconciler — decides corrective actions for one app.
//!
//! Pure function of the app's [`AppView`], the crash ledger, the engine
//! config and the current time. Nothing is persisted here; the analyzer
//! dedups and commits the result.
//!
//! Decision order per app:
//!
//! 1. For each index below the instance count, start it if nothing live is
//!    there (delayed by crash backoff if it crashed), or if every live
//!    instance there is evacuating.
//! 2. Only if no start was decided: stop extras above the instance count,
//!    stop evacuated instances whose replacement is up, and stop all but
//!    one duplicate per index.

use std::cmp::Ordering;

use tracing::debug;

use steward_state::{
    CrashCount, InstanceHeartbeat, InstanceState, PendingStart, PendingStop, StartReason,
    StopReason, Timestamp,
};

use crate::config::EngineConfig;
use crate::ledger::CrashLedger;
use crate::snapshot::AppView;

/// Actions and crash-counter updates proposed for one app.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    pub starts: Vec<PendingStart>,
    pub stops: Vec<PendingStop>,
    /// Incremented counters, one per crashed start in `starts`.
    pub crash_counts: Vec<CrashCount>,
}

impl Reconciliation {
    pub fn is_empty(&self) -> bool {
        self.starts.is_empty() && self.stops.is_empty()
    }
}

pub struct Reconciler<'a> {
    config: &'a EngineConfig,
    ledger: &'a CrashLedger,
    now: Timestamp,
}

impl<'a> Reconciler<'a> {
    pub fn new(config: &'a EngineConfig, ledger: &'a CrashLedger, now: Timestamp) -> Self {
        Self {
            config,
            ledger,
            now,
        }
    }

    pub fn reconcile(&self, app: &AppView) -> Reconciliation {
        let mut result = Reconciliation::default();
        if app.is_staging() {
            return result;
        }

        let instance_count = app.instance_count();
        let priority = app.unsatisfied_fraction();
        let app_has_live = app.has_live_instance();
        let grace = self.config.grace_secs();

        for index in 0..instance_count {
            let live: Vec<&InstanceHeartbeat> = app.live_at(index).collect();

            if live.is_empty() && !app.has_crash_at(index) {
                result.starts.push(self.start(
                    app,
                    index,
                    StartReason::Missing,
                    self.now.saturating_add(grace),
                    0,
                    priority,
                ));
            } else if live.is_empty() {
                if index != 0 && !app_has_live {
                    debug!(app = %app.key, index, "crashed index waits for index 0");
                    continue;
                }
                let counter = self.ledger.get(&app.key, index, self.now);
                let delay = self.config.crash_backoff.delay_for(counter.count);
                result.starts.push(self.start(
                    app,
                    index,
                    StartReason::Crashed,
                    self.now.saturating_add(delay.as_secs()),
                    grace,
                    priority,
                ));
                result.crash_counts.push(CrashCount {
                    count: counter.count.saturating_add(1),
                    ..counter
                });
            } else if live.iter().all(|hb| hb.is_evacuating()) {
                let mut start =
                    self.start(app, index, StartReason::Evacuating, self.now, grace, priority);
                start.skip_verification = true;
                result.starts.push(start);
            }
        }

        if result.starts.is_empty() {
            result.stops = self.stops(app, instance_count);
        }
        result
    }

    fn stops(&self, app: &AppView, instance_count: u32) -> Vec<PendingStop> {
        let grace = self.config.grace_secs();
        let mut stops = Vec::new();

        for hb in app
            .heartbeats
            .iter()
            .filter(|hb| hb.is_live() && hb.instance_index >= instance_count)
        {
            stops.push(self.stop(hb, StopReason::Extra, self.now, grace));
        }

        for index in 0..instance_count {
            let (evacuating, mut serving): (Vec<_>, Vec<_>) =
                app.live_at(index).partition(|hb| hb.is_evacuating());
            if serving.is_empty() {
                continue;
            }

            for hb in evacuating {
                stops.push(self.stop(hb, StopReason::EvacuationComplete, self.now, grace));
            }

            serving.sort_by(|a, b| keep_order(a, b));
            for (rank, hb) in serving.iter().skip(1).enumerate() {
                let send_on = self
                    .now
                    .saturating_add((rank as u64 + 1).saturating_mul(grace));
                stops.push(self.stop(hb, StopReason::Duplicate, send_on, grace));
            }
        }

        stops
    }

    fn start(
        &self,
        app: &AppView,
        index: u32,
        reason: StartReason,
        send_on: Timestamp,
        keep_alive: u64,
        priority: f64,
    ) -> PendingStart {
        PendingStart {
            app_id: app.key.app_id.clone(),
            app_version: app.key.app_version.clone(),
            instance_index: index,
            message_id: 0,
            send_on,
            sent_on: 0,
            keep_alive,
            priority,
            reason,
            skip_verification: false,
        }
    }

    fn stop(
        &self,
        hb: &InstanceHeartbeat,
        reason: StopReason,
        send_on: Timestamp,
        keep_alive: u64,
    ) -> PendingStop {
        PendingStop {
            app_id: hb.app_id.clone(),
            app_version: hb.app_version.clone(),
            instance_index: hb.instance_index,
            instance_guid: hb.instance_guid.clone(),
            message_id: 0,
            send_on,
            sent_on: 0,
            keep_alive,
            reason,
            skip_verification: false,
        }
    }
}

/// Which duplicate survives: running before starting, then lowest guid.
fn keep_order(a: &InstanceHeartbeat, b: &InstanceHeartbeat) -> Ordering {
    let rank = |hb: &InstanceHeartbeat| u8::from(hb.state != InstanceState::Running);
    rank(a)
        .cmp(&rank(b))
        .then_with(|| a.instance_guid.cmp(&b.instance_guid))
}
