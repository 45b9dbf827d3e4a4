//! Analyzer — the convergence orchestrator.
//!
//! One analysis cycle reads a snapshot, reconciles every app present in
//! desired or actual state, drops proposals that already have a pending
//! entry, and persists the survivors together with their crash counters.
//! Any read failure aborts the cycle before anything is written.

use std::collections::HashSet;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use steward_state::{CrashCount, StartReason, Store, Timestamp};

use crate::config::EngineConfig;
use crate::epoch_secs;
use crate::error::{EngineError, EngineResult};
use crate::ledger::CrashLedger;
use crate::lifecycle::PendingAction;
use crate::reconciler::Reconciler;
use crate::snapshot::{ensure_fresh, Snapshot};

/// Outcome of one analysis cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnalysisReport {
    pub apps_analyzed: usize,
    pub apps_pending_staging: usize,
    pub starts_enqueued: usize,
    pub stops_enqueued: usize,
    pub starts_deduplicated: usize,
    pub stops_deduplicated: usize,
    pub crash_counts_updated: usize,
    /// Counters past their TTL removed from the store.
    pub crash_counts_reaped: usize,
}

pub struct Analyzer<S> {
    store: S,
    config: EngineConfig,
}

impl<S: Store> Analyzer<S> {
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run one analysis cycle as of `now`.
    pub fn analyze(&self, now: Timestamp) -> EngineResult<AnalysisReport> {
        ensure_fresh(&self.store, now, self.config.freshness_ttl.as_secs())?;

        let snapshot = Snapshot::load(&self.store, now)?;
        let ledger = CrashLedger::load(&self.store, self.config.crash_backoff.counter_ttl)?;
        let pending_starts: HashSet<String> = self
            .store
            .get_pending_starts()
            .map_err(EngineError::read("pending starts"))?
            .iter()
            .map(PendingAction::dedup_key)
            .collect();
        let pending_stops: HashSet<String> = self
            .store
            .get_pending_stops()
            .map_err(EngineError::read("pending stops"))?
            .iter()
            .map(PendingAction::dedup_key)
            .collect();

        let reconciler = Reconciler::new(&self.config, &ledger, now);
        let mut report = AnalysisReport::default();
        let mut starts = Vec::new();
        let mut stops = Vec::new();
        let mut crash_counts = Vec::new();

        for app in snapshot.apps() {
            report.apps_analyzed += 1;
            if app.is_staging() {
                report.apps_pending_staging += 1;
                continue;
            }

            let result = reconciler.reconcile(app);
            for start in result.starts {
                if pending_starts.contains(&start.dedup_key()) {
                    report.starts_deduplicated += 1;
                    continue;
                }
                // A crash only counts when its restart is newly enqueued.
                if start.reason == StartReason::Crashed
                    && let Some(count) = result
                        .crash_counts
                        .iter()
                        .find(|c| c.instance_index == start.instance_index)
                {
                    crash_counts.push(count.clone());
                }
                debug!(
                    app = %app.key,
                    index = start.instance_index,
                    reason = ?start.reason,
                    send_on = start.send_on,
                    "start enqueued"
                );
                starts.push(start);
            }
            for stop in result.stops {
                if pending_stops.contains(&stop.dedup_key()) {
                    report.stops_deduplicated += 1;
                    continue;
                }
                debug!(
                    app = %app.key,
                    index = stop.instance_index,
                    guid = %stop.instance_guid,
                    reason = ?stop.reason,
                    send_on = stop.send_on,
                    "stop enqueued"
                );
                stops.push(stop);
            }
        }

        let total = (starts.len() + stops.len()) as u64;
        if total > 0 {
            let first = self
                .store
                .allocate_message_ids(total)
                .map_err(EngineError::persist("message ids"))?;
            let mut next = first;
            for start in &mut starts {
                start.message_id = next;
                next += 1;
            }
            for stop in &mut stops {
                stop.message_id = next;
                next += 1;
            }
        }

        self.store
            .save_analysis(&starts, &stops, &crash_counts)
            .map_err(EngineError::persist("analysis"))?;

        report.starts_enqueued = starts.len();
        report.stops_enqueued = stops.len();
        report.crash_counts_updated = crash_counts.len();
        report.crash_counts_reaped = self.reap_crash_counters(&ledger, &crash_counts, now);

        info!(
            apps = report.apps_analyzed,
            staging = report.apps_pending_staging,
            starts = report.starts_enqueued,
            stops = report.stops_enqueued,
            deduplicated = report.starts_deduplicated + report.stops_deduplicated,
            "analysis cycle complete"
        );
        Ok(report)
    }

    /// Delete counters past their TTL, except those just rewritten by this
    /// cycle. Failures are logged and retried next cycle.
    fn reap_crash_counters(
        &self,
        ledger: &CrashLedger,
        rewritten: &[CrashCount],
        now: Timestamp,
    ) -> usize {
        let rewritten: HashSet<String> = rewritten.iter().map(CrashCount::table_key).collect();
        let expired: Vec<CrashCount> = ledger
            .expired(now)
            .into_iter()
            .filter(|count| !rewritten.contains(&count.table_key()))
            .collect();
        if expired.is_empty() {
            return 0;
        }
        match self.store.delete_crash_counters(&expired) {
            Ok(reaped) => {
                debug!(reaped, "expired crash counters reaped");
                reaped as usize
            }
            Err(e) => {
                warn!(error = %e, "crash counter reap failed");
                0
            }
        }
    }

    /// Run the analysis loop until shutdown.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "analyzer started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.analyze(epoch_secs()) {
                        error!(error = %e, "analysis cycle failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("analyzer shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;
    use steward_state::{InstanceState, PackageState, StateStore, StopReason};

    fn analyzer(store: StateStore) -> Analyzer<StateStore> {
        Analyzer::new(store, EngineConfig::default())
    }

    #[test]
    fn enqueues_missing_starts_with_fresh_message_ids() {
        let store = seeded_store(vec![desired("a", 3)], vec![], NOW);
        let report = analyzer(store.clone()).analyze(NOW).unwrap();

        assert_eq!(report.apps_analyzed, 1);
        assert_eq!(report.starts_enqueued, 3);
        assert_eq!(report.stops_enqueued, 0);

        let mut ids: Vec<u64> = store
            .get_pending_starts()
            .unwrap()
            .iter()
            .map(|s| s.message_id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn second_cycle_deduplicates_against_pending() {
        let store = seeded_store(
            vec![desired("a", 2)],
            vec![
                heartbeat("a", 0, "g-0", InstanceState::Running),
                heartbeat("a", 0, "g-1", InstanceState::Running),
                heartbeat("a", 1, "g-2", InstanceState::Running),
                heartbeat("a", 4, "g-4", InstanceState::Running),
            ],
            NOW,
        );
        let analyzer = analyzer(store.clone());

        let first = analyzer.analyze(NOW).unwrap();
        assert_eq!(first.stops_enqueued, 2);

        let second = analyzer.analyze(NOW).unwrap();
        assert_eq!(second.stops_enqueued, 0);
        assert_eq!(second.stops_deduplicated, 2);

        let stops = store.get_pending_stops().unwrap();
        assert_eq!(stops.len(), 2);
        let duplicate = stops.iter().find(|s| s.reason == StopReason::Duplicate).unwrap();
        assert_eq!(duplicate.instance_guid, "g-1");
    }

    #[test]
    fn crash_counter_increments_once_per_new_start() {
        let store = seeded_store(
            vec![desired("a", 1)],
            vec![heartbeat("a", 0, "g-0", InstanceState::Crashed)],
            NOW,
        );
        let analyzer = analyzer(store.clone());

        assert_eq!(analyzer.analyze(NOW).unwrap().crash_counts_updated, 1);
        let second = analyzer.analyze(NOW).unwrap();
        assert_eq!(second.starts_deduplicated, 1);
        assert_eq!(second.crash_counts_updated, 0);

        let counts = store.get_crash_counters().unwrap();
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[0].count, 1);
    }

    #[test]
    fn crash_backoff_grows_across_cycles() {
        let store = seeded_store(
            vec![desired("a", 1)],
            vec![heartbeat("a", 0, "g-0", InstanceState::Crashed)],
            NOW,
        );
        store
            .save_crash_counters(&[CrashCount {
                count: 5,
                ..CrashCount::new(&key("a"), 0, NOW - 10)
            }])
            .unwrap();

        analyzer(store.clone()).analyze(NOW).unwrap();

        let start = &store.get_pending_starts().unwrap()[0];
        assert_eq!(start.send_on, NOW + 120);
        assert_eq!(store.get_crash_counters().unwrap()[0].count, 6);
    }

    #[test]
    fn staging_apps_are_counted_and_skipped() {
        let mut spec = desired("a", 2);
        spec.package_state = PackageState::Pending;
        let store = seeded_store(vec![spec, desired("b", 1)], vec![], NOW);

        let report = analyzer(store).analyze(NOW).unwrap();
        assert_eq!(report.apps_analyzed, 2);
        assert_eq!(report.apps_pending_staging, 1);
        assert_eq!(report.starts_enqueued, 1);
    }

    #[test]
    fn stale_state_blocks_the_cycle() {
        let store = seeded_store(vec![desired("a", 1)], vec![], NOW - 120);
        let err = analyzer(store.clone()).analyze(NOW).unwrap_err();

        assert!(matches!(err, EngineError::Stale { .. }));
        assert!(store.get_pending_starts().unwrap().is_empty());
    }

    #[test]
    fn read_failure_aborts_without_writes() {
        for op in ["get_desired_state", "get_actual_state", "get_crash_counters", "get_pending_stops"] {
            let inner = seeded_store(vec![desired("a", 2)], vec![], NOW);
            let store = FlakyStore::new(inner.clone()).failing(op);

            let err = Analyzer::new(store, EngineConfig::default())
                .analyze(NOW)
                .unwrap_err();

            assert!(matches!(err, EngineError::Read { .. }), "{op}: {err}");
            assert!(inner.get_pending_starts().unwrap().is_empty());
        }
    }

    #[test]
    fn save_failure_is_reported() {
        let store = FlakyStore::new(seeded_store(vec![desired("a", 1)], vec![], NOW))
            .failing("save_analysis");
        let err = Analyzer::new(store, EngineConfig::default())
            .analyze(NOW)
            .unwrap_err();
        assert!(matches!(err, EngineError::Persist { what: "analysis", .. }));
    }

    #[test]
    fn expired_counters_of_departed_apps_are_reaped() {
        let store = seeded_store(
            vec![desired("a", 1)],
            vec![heartbeat("a", 0, "a-0", InstanceState::Running)],
            NOW,
        );
        store
            .save_crash_counters(&[CrashCount::new(&key("gone"), 0, 0)])
            .unwrap();

        let report = analyzer(store.clone()).analyze(NOW).unwrap();

        assert_eq!(report.crash_counts_reaped, 1);
        assert!(store.get_crash_counters().unwrap().is_empty());
    }

    #[test]
    fn expired_counter_of_crashing_index_is_restarted_not_reaped() {
        let store = seeded_store(
            vec![desired("a", 1)],
            vec![heartbeat("a", 0, "a-0", InstanceState::Crashed)],
            NOW,
        );
        store
            .save_crash_counters(&[CrashCount {
                count: 5,
                ..CrashCount::new(&key("a"), 0, 0)
            }])
            .unwrap();

        let report = analyzer(store.clone()).analyze(NOW).unwrap();

        assert_eq!(report.crash_counts_reaped, 0);
        assert_eq!(
            store.get_crash_counters().unwrap(),
            vec![CrashCount {
                count: 1,
                ..CrashCount::new(&key("a"), 0, NOW)
            }]
        );
    }

    #[test]
    fn reap_failure_does_not_fail_the_cycle() {
        let inner = seeded_store(vec![desired("a", 1)], vec![], NOW);
        inner
            .save_crash_counters(&[CrashCount::new(&key("gone"), 0, 0)])
            .unwrap();
        let store = FlakyStore::new(inner.clone()).failing("delete_crash_counters");

        let report = Analyzer::new(store, EngineConfig::default())
            .analyze(NOW)
            .unwrap();

        assert_eq!(report.crash_counts_reaped, 0);
        assert_eq!(report.starts_enqueued, 1);
        assert_eq!(inner.get_crash_counters().unwrap().len(), 1);
    }
}
