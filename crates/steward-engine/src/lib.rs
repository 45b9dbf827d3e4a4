//! steward-engine — the Steward convergence engine.
//!
//! Compares the desired placement of app instances with the heartbeat-
//! reported actual placement and converges the two through corrective
//! start and stop actions, without thrashing and without acting on stale
//! state.
//!
//! # Architecture
//!
//! ```text
//! HeartbeatBuffer ──flush──▶ StateStore ◀──sync── desired state
//!                               │
//!            ┌──────────────────┴──────────────────┐
//!            ▼                                     ▼
//!        Analyzer                               Sender
//!   ├── Snapshot + CrashLedger            ├── fresh Snapshot
//!   ├── Reconciler per app                ├── expiry / verification
//!   ├── dedup against pending             ├── priority sort + throttle
//!   └── save_analysis (atomic)            └── ActionTransport ──▶ executors
//! ```
//!
//! The analyzer and the sender run on independent timers and never share
//! in-memory state; each cycle owns its snapshot. Cross-cycle safety comes
//! from dedup at enqueue time and re-verification at send time.
//!
//! # Crash backoff
//!
//! Crashed indices restart immediately until they reach
//! `minimum_crash_count` crashes, then wait `starting_delay`, doubling per
//! crash up to `maximum_delay`. Counters reset after `counter_ttl`.

pub mod analyzer;
pub mod backoff;
pub mod config;
pub mod error;
pub mod intake;
pub mod ledger;
pub mod lifecycle;
pub mod metrics;
pub mod reconciler;
pub mod sender;
pub mod snapshot;
pub mod transport;
pub mod verify;

#[cfg(test)]
mod testutil;

pub use analyzer::{AnalysisReport, Analyzer};
pub use backoff::CrashBackoffPolicy;
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use intake::HeartbeatBuffer;
pub use ledger::CrashLedger;
pub use lifecycle::PendingAction;
pub use reconciler::{Reconciler, Reconciliation};
pub use sender::{DispatchReport, Sender};
pub use snapshot::{AppView, Snapshot};
pub use transport::{ActionTransport, HttpTransport, SendFuture, StartMessage, StopMessage, TransportError};

/// Current Unix time in seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
