//! Crash ledger — per-index crash counters read by the reconciler.

use std::collections::HashMap;
use std::time::Duration;

use steward_state::{AppKey, CrashCount, Store, Timestamp};

use crate::error::{EngineError, EngineResult};

/// Read-only view of the persisted crash counters for one cycle.
///
/// Counters past their TTL read as fresh zero counters. The reconciler
/// returns incremented copies; nothing here writes back.
#[derive(Debug, Clone, Default)]
pub struct CrashLedger {
    counters: HashMap<String, CrashCount>,
    ttl_secs: u64,
}

impl CrashLedger {
    pub fn new(counts: Vec<CrashCount>, ttl: Duration) -> Self {
        let counters = counts
            .into_iter()
            .map(|count| (count.table_key(), count))
            .collect();
        Self {
            counters,
            ttl_secs: ttl.as_secs(),
        }
    }

    pub fn load<S: Store>(store: &S, ttl: Duration) -> EngineResult<Self> {
        let counts = store
            .get_crash_counters()
            .map_err(EngineError::read("crash counters"))?;
        Ok(Self::new(counts, ttl))
    }

    /// Counter for `(key, index)`, or a zero counter created at `now`.
    pub fn get(&self, key: &AppKey, index: u32, now: Timestamp) -> CrashCount {
        match self.counters.get(&key.index_key(index)) {
            Some(count) if self.is_current(count, now) => count.clone(),
            _ => CrashCount::new(key, index, now),
        }
    }

    /// Stored counters that have outlived the TTL at `now`.
    pub fn expired(&self, now: Timestamp) -> Vec<CrashCount> {
        self.counters
            .values()
            .filter(|count| !self.is_current(count, now))
            .cloned()
            .collect()
    }

    fn is_current(&self, count: &CrashCount, now: Timestamp) -> bool {
        now.saturating_sub(count.created_at) < self.ttl_secs
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}
