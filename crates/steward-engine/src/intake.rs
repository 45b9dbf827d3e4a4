//! Heartbeat intake buffer.
//!
//! Listeners push heartbeats as they arrive; a timer loop drains the
//! buffer and hands each batch to the store in one write. The engine never
//! reads this buffer: heartbeats only become actual state once flushed.
//!
//! Every report counts as a refresh of the actual state, including an
//! empty one from a host that runs no instances.

use std::mem;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use steward_state::{InstanceHeartbeat, StateResult, StateStore, Timestamp};

use crate::epoch_secs;

#[derive(Debug, Default)]
struct Pending {
    heartbeats: Vec<InstanceHeartbeat>,
    /// Latest receive time in the buffer; 0 when nothing was reported.
    received_at: Timestamp,
}

/// A drained batch of heartbeats.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct HeartbeatBatch {
    pub heartbeats: Vec<InstanceHeartbeat>,
    pub received_at: Timestamp,
}

#[derive(Debug, Default)]
pub struct HeartbeatBuffer {
    pending: Mutex<Pending>,
}

impl HeartbeatBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Buffer one heartbeat received now.
    pub fn record_heartbeat(&self, heartbeat: InstanceHeartbeat) {
        self.record_batch(vec![heartbeat], epoch_secs());
    }

    /// Buffer a host's report. An empty report still refreshes the actual
    /// state on the next flush.
    pub fn record_batch(&self, heartbeats: Vec<InstanceHeartbeat>, received_at: Timestamp) {
        let mut pending = self.lock();
        pending.heartbeats.extend(heartbeats);
        pending.received_at = pending.received_at.max(received_at);
    }

    /// Take everything buffered so far, leaving the buffer empty.
    pub fn drain(&self) -> HeartbeatBatch {
        let mut pending = self.lock();
        HeartbeatBatch {
            heartbeats: mem::take(&mut pending.heartbeats),
            received_at: mem::take(&mut pending.received_at),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().heartbeats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the buffered batch to the store. Returns heartbeats written.
    ///
    /// A failed write puts the batch back in front of anything that arrived
    /// in the meantime.
    pub fn flush(&self, store: &StateStore) -> StateResult<usize> {
        let batch = self.drain();
        if batch.received_at == 0 {
            return Ok(0);
        }
        match store.save_actual_state(&batch.heartbeats, batch.received_at) {
            Ok(()) => {
                debug!(heartbeats = batch.heartbeats.len(), "heartbeats flushed");
                Ok(batch.heartbeats.len())
            }
            Err(e) => {
                self.requeue(batch);
                Err(e)
            }
        }
    }

    fn requeue(&self, batch: HeartbeatBatch) {
        let mut pending = self.lock();
        let newer = mem::replace(&mut pending.heartbeats, batch.heartbeats);
        pending.heartbeats.extend(newer);
        pending.received_at = pending.received_at.max(batch.received_at);
    }

    /// Flush on every tick and reap expired heartbeats until shutdown.
    pub async fn run(
        &self,
        store: StateStore,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(interval_secs = interval.as_secs(), "heartbeat intake started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.flush(&store) {
                        error!(error = %e, "heartbeat flush failed");
                    }
                    match store.reap_expired_heartbeats(epoch_secs()) {
                        Ok(0) => {}
                        Ok(reaped) => debug!(reaped, "expired heartbeats reaped"),
                        Err(e) => warn!(error = %e, "heartbeat reap failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("heartbeat intake shutting down");
                    if let Err(e) = self.flush(&store) {
                        error!(error = %e, "final heartbeat flush failed");
                    }
                    break;
                }
            }
        }
    }
}
