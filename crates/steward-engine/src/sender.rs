//! Sender — the dispatcher.
//!
//! Each cycle loads every pending action plus a fresh snapshot, drops the
//! expired and the no-longer-valid ones, sends what is due (starts by
//! priority, at most `sender_message_limit` per cycle; stops unthrottled)
//! and commits the outcome. A failed send leaves its action untouched for
//! the next cycle; successful sends are committed even when others fail.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use steward_state::{AppKey, PendingStart, PendingStop, Store, Timestamp};

use crate::config::EngineConfig;
use crate::epoch_secs;
use crate::error::{EngineError, EngineResult};
use crate::lifecycle::PendingAction;
use crate::metrics;
use crate::snapshot::{ensure_fresh, AppView, Snapshot};
use crate::transport::{ActionTransport, StartMessage, StopMessage};
use crate::verify::{verify_start, verify_stop};

/// Outcome of one dispatch cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub starts_sent: usize,
    pub stops_sent: usize,
    /// Sent before and past their keep-alive; deleted unsent.
    pub expired: usize,
    /// Failed send-time verification; deleted unsent.
    pub rejected: usize,
    /// Not yet due.
    pub waiting: usize,
    /// Verified starts held back by the per-cycle limit.
    pub throttled: usize,
    pub failed: usize,
}

/// Pending-table changes accumulated during one cycle.
struct Commit<A> {
    retire: Vec<A>,
    update: Vec<A>,
}

impl<A> Default for Commit<A> {
    fn default() -> Self {
        Self {
            retire: Vec::new(),
            update: Vec::new(),
        }
    }
}

pub struct Sender<S, T> {
    store: S,
    transport: T,
    config: EngineConfig,
}

impl<S: Store, T: ActionTransport> Sender<S, T> {
    pub fn new(store: S, transport: T, config: EngineConfig) -> Self {
        Self {
            store,
            transport,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run one dispatch cycle as of `now`.
    ///
    /// Returns [`EngineError::SendFailed`] after committing if any send failed.
    pub async fn dispatch(&self, now: Timestamp) -> EngineResult<DispatchReport> {
        ensure_fresh(&self.store, now, self.config.freshness_ttl.as_secs())?;

        let pending_starts = self
            .store
            .get_pending_starts()
            .map_err(EngineError::read("pending starts"))?;
        let pending_stops = self
            .store
            .get_pending_stops()
            .map_err(EngineError::read("pending stops"))?;
        let snapshot = Snapshot::load(&self.store, now)?;

        let mut report = DispatchReport::default();
        let mut starts: Commit<PendingStart> = Commit::default();
        let mut stops: Commit<PendingStop> = Commit::default();

        let mut due_starts = triage(
            pending_starts,
            now,
            |start| verify_start(start, &snapshot),
            &mut starts,
            &mut report,
        );
        let due_stops = triage(
            pending_stops,
            now,
            |stop| verify_stop(stop, &snapshot),
            &mut stops,
            &mut report,
        );

        due_starts.sort_by(|a, b| {
            b.priority
                .total_cmp(&a.priority)
                .then(a.send_on.cmp(&b.send_on))
                .then(a.message_id.cmp(&b.message_id))
        });
        let limit = self.config.sender_message_limit;
        if due_starts.len() > limit {
            report.throttled = due_starts.len() - limit;
            due_starts.truncate(limit);
        }

        let attempted = due_starts.len() + due_stops.len();

        for start in due_starts {
            let message = StartMessage::new(&start, running_indices(&snapshot, &start.key()));
            match self.transport.send_start(&message).await {
                Ok(()) => {
                    debug!(
                        app = %start.key(),
                        index = start.instance_index,
                        message_id = start.message_id,
                        reason = ?start.reason,
                        "start sent"
                    );
                    report.starts_sent += 1;
                    metrics::record_start_sent(&self.store, start.reason);
                    settle(start, now, &mut starts);
                }
                Err(e) => {
                    warn!(
                        app = %start.key(),
                        index = start.instance_index,
                        error = %e,
                        "start send failed"
                    );
                    report.failed += 1;
                }
            }
        }

        for stop in due_stops {
            let message = StopMessage::new(&stop, running_indices(&snapshot, &stop.key()));
            match self.transport.send_stop(&message).await {
                Ok(()) => {
                    debug!(
                        app = %stop.key(),
                        guid = %stop.instance_guid,
                        message_id = stop.message_id,
                        reason = ?stop.reason,
                        "stop sent"
                    );
                    report.stops_sent += 1;
                    metrics::record_stop_sent(&self.store, stop.reason);
                    settle(stop, now, &mut stops);
                }
                Err(e) => {
                    warn!(
                        app = %stop.key(),
                        guid = %stop.instance_guid,
                        error = %e,
                        "stop send failed"
                    );
                    report.failed += 1;
                }
            }
        }

        self.store
            .delete_pending_starts(&starts.retire)
            .map_err(EngineError::persist("retired starts"))?;
        self.store
            .delete_pending_stops(&stops.retire)
            .map_err(EngineError::persist("retired stops"))?;
        self.store
            .save_pending_starts(&starts.update)
            .map_err(EngineError::persist("sent starts"))?;
        self.store
            .save_pending_stops(&stops.update)
            .map_err(EngineError::persist("sent stops"))?;

        info!(
            starts = report.starts_sent,
            stops = report.stops_sent,
            expired = report.expired,
            rejected = report.rejected,
            waiting = report.waiting,
            throttled = report.throttled,
            failed = report.failed,
            "dispatch cycle complete"
        );

        if report.failed > 0 {
            return Err(EngineError::SendFailed {
                failed: report.failed,
                attempted,
            });
        }
        Ok(report)
    }

    /// Run the dispatch loop until shutdown.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "sender started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.dispatch(epoch_secs()).await {
                        error!(error = %e, "dispatch cycle failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("sender shutting down");
                    break;
                }
            }
        }
    }
}

/// Split pending actions into those due and verified, queueing expired and
/// rejected ones for deletion. Actions not yet due are left alone.
fn triage<A, V, R>(
    actions: Vec<A>,
    now: Timestamp,
    verify: V,
    commit: &mut Commit<A>,
    report: &mut DispatchReport,
) -> Vec<A>
where
    A: PendingAction,
    V: Fn(&A) -> Result<(), R>,
    R: std::fmt::Display,
{
    let mut due = Vec::new();
    for action in actions {
        if action.is_expired(now) {
            debug!(action = %action.dedup_key(), "pending action expired");
            report.expired += 1;
            commit.retire.push(action);
            continue;
        }
        if !action.is_time_to_send(now) {
            report.waiting += 1;
            continue;
        }
        if !action.skip_verification()
            && let Err(rejection) = verify(&action)
        {
            debug!(action = %action.dedup_key(), %rejection, "pending action discarded");
            report.rejected += 1;
            commit.retire.push(action);
            continue;
        }
        due.push(action);
    }
    due
}

/// Retire fire-and-forget actions; keep the rest alive with a sent stamp.
fn settle<A: PendingAction>(mut action: A, now: Timestamp, commit: &mut Commit<A>) {
    if action.is_fire_and_forget() {
        commit.retire.push(action);
    } else {
        action.mark_sent(now);
        commit.update.push(action);
    }
}

fn running_indices(snapshot: &Snapshot, key: &AppKey) -> BTreeMap<u32, u32> {
    snapshot
        .app(key)
        .map(AppView::running_indices)
        .unwrap_or_default()
}
