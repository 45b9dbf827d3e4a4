//! StateStore — redb-backed state persistence for Steward.
//!
//! Provides the [`Store`] operations the convergence engine consumes plus
//! the write side used by the heartbeat intake and desired-state sync. All
//! records are JSON-serialized into redb's `&[u8]` value columns. The store
//! supports both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use redb::{Database, ReadableDatabase, ReadableTable, Table, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type RecordTable = TableDefinition<'static, &'static str, &'static [u8]>;

const DEFAULT_HEARTBEAT_TTL: Duration = Duration::from_secs(30);

/// Operations the convergence engine needs from the backing store.
///
/// Reads distinguish "nothing there" (empty `Vec`, zeroed [`Freshness`])
/// from failure (`Err`). Batch writes are all-or-nothing per call.
pub trait Store: Send + Sync {
    fn get_desired_state(&self) -> StateResult<Vec<DesiredSpec>>;

    /// Heartbeats that have not outlived the heartbeat TTL at `now`.
    fn get_actual_state(&self, now: Timestamp) -> StateResult<Vec<InstanceHeartbeat>>;

    fn get_crash_counters(&self) -> StateResult<Vec<CrashCount>>;

    fn save_crash_counters(&self, counts: &[CrashCount]) -> StateResult<()>;

    /// Returns how many of the given counters existed.
    fn delete_crash_counters(&self, counts: &[CrashCount]) -> StateResult<u32>;

    fn get_pending_starts(&self) -> StateResult<Vec<PendingStart>>;

    fn get_pending_stops(&self) -> StateResult<Vec<PendingStop>>;

    fn save_pending_starts(&self, starts: &[PendingStart]) -> StateResult<()>;

    fn save_pending_stops(&self, stops: &[PendingStop]) -> StateResult<()>;

    /// Returns how many of the given starts existed.
    fn delete_pending_starts(&self, starts: &[PendingStart]) -> StateResult<u32>;

    /// Returns how many of the given stops existed.
    fn delete_pending_stops(&self, stops: &[PendingStop]) -> StateResult<u32>;

    /// Persist the outcome of one analysis cycle.
    ///
    /// Implementations backed by a transactional store should override this
    /// to commit all three collections atomically.
    fn save_analysis(
        &self,
        starts: &[PendingStart],
        stops: &[PendingStop],
        crash_counts: &[CrashCount],
    ) -> StateResult<()> {
        self.save_pending_starts(starts)?;
        self.save_pending_stops(stops)?;
        self.save_crash_counters(crash_counts)
    }

    /// Reserve `count` consecutive message ids and return the first one.
    fn allocate_message_ids(&self, count: u64) -> StateResult<u64>;

    fn get_freshness(&self) -> StateResult<Freshness>;

    /// Bump a named counter by one and return its new value.
    fn increment_metric(&self, name: &str) -> StateResult<u64>;

    /// All counters, ordered by name.
    fn get_metrics(&self) -> StateResult<Vec<(String, u64)>>;
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    heartbeat_ttl: u64,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::from_database(db);
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::from_database(db);
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn from_database(db: Database) -> Self {
        Self {
            db: Arc::new(db),
            heartbeat_ttl: DEFAULT_HEARTBEAT_TTL.as_secs(),
        }
    }

    /// Set how long a heartbeat counts as actual state without a refresh.
    pub fn with_heartbeat_ttl(mut self, ttl: Duration) -> Self {
        self.heartbeat_ttl = ttl.as_secs();
        self
    }

    pub fn heartbeat_ttl(&self) -> Duration {
        Duration::from_secs(self.heartbeat_ttl)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        for def in [DESIRED, ACTUAL, CRASH_COUNTS, PENDING_STARTS, PENDING_STOPS] {
            txn.open_table(def).map_err(map_err!(Table))?;
        }
        txn.open_table(METRICS).map_err(map_err!(Table))?;
        txn.open_table(META).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic record access ──────────────────────────────────────

    fn scan<T: DeserializeOwned>(&self, def: RecordTable) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    fn put_all<T: Serialize>(&self, def: RecordTable, records: &[(String, &T)]) -> StateResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            for (key, record) in records {
                insert_json(&mut table, key, *record)?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn remove_all(&self, def: RecordTable, keys: &[String]) -> StateResult<u32> {
        if keys.is_empty() {
            return Ok(0);
        }
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut removed = 0;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            for key in keys {
                if table.remove(key.as_str()).map_err(map_err!(Write))?.is_some() {
                    removed += 1;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(removed)
    }

    fn read_meta(&self, key: &str) -> StateResult<u64> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(META).map_err(map_err!(Table))?;
        Ok(table
            .get(key)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value())
            .unwrap_or(0))
    }

    /// Raise a freshness timestamp; never moves it backwards.
    fn bump_meta(&self, key: &str, at: Timestamp) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(META).map_err(map_err!(Table))?;
            let current = table
                .get(key)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value())
                .unwrap_or(0);
            if at > current {
                table.insert(key, at).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Desired state (sync collaborator) ──────────────────────────

    /// Replace the cached desired state and mark it fresh as of `now`.
    pub fn sync_desired_state(&self, specs: &[DesiredSpec], now: Timestamp) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(DESIRED).map_err(map_err!(Table))?;
            let mut stale = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, _) = entry.map_err(map_err!(Read))?;
                stale.push(key.value().to_string());
            }
            for key in &stale {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            for spec in specs {
                insert_json(&mut table, &spec.key().table_key(), spec)?;
            }
        }
        {
            let mut meta = txn.open_table(META).map_err(map_err!(Table))?;
            meta.insert(META_DESIRED_FRESH, now).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(apps = specs.len(), "desired state synced");
        Ok(())
    }

    pub fn get_desired(&self, key: &AppKey) -> StateResult<Option<DesiredSpec>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DESIRED).map_err(map_err!(Table))?;
        match table.get(key.table_key().as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let spec: DesiredSpec =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(spec))
            }
            None => Ok(None),
        }
    }

    // ── Actual state (heartbeat intake) ────────────────────────────

    /// Upsert a batch of heartbeats and mark the actual state fresh as of
    /// `received_at`.
    pub fn save_actual_state(
        &self,
        heartbeats: &[InstanceHeartbeat],
        received_at: Timestamp,
    ) -> StateResult<()> {
        let records: Vec<(String, &InstanceHeartbeat)> =
            heartbeats.iter().map(|hb| (hb.table_key(), hb)).collect();
        self.put_all(ACTUAL, &records)?;
        self.bump_meta(META_ACTUAL_FRESH, received_at)?;
        debug!(heartbeats = heartbeats.len(), "actual state saved");
        Ok(())
    }

    /// Delete heartbeats that outlived the TTL. Returns number deleted.
    pub fn reap_expired_heartbeats(&self, now: Timestamp) -> StateResult<u32> {
        let expired: Vec<String> = self
            .scan::<InstanceHeartbeat>(ACTUAL)?
            .into_iter()
            .filter(|hb| !self.heartbeat_is_current(hb, now))
            .map(|hb| hb.table_key())
            .collect();
        self.remove_all(ACTUAL, &expired)
    }

    fn heartbeat_is_current(&self, hb: &InstanceHeartbeat, now: Timestamp) -> bool {
        now.saturating_sub(hb.reported_at) <= self.heartbeat_ttl
    }

    pub fn mark_desired_fresh(&self, at: Timestamp) -> StateResult<()> {
        self.bump_meta(META_DESIRED_FRESH, at)
    }

    pub fn mark_actual_fresh(&self, at: Timestamp) -> StateResult<()> {
        self.bump_meta(META_ACTUAL_FRESH, at)
    }
}

impl Store for StateStore {
    fn get_desired_state(&self) -> StateResult<Vec<DesiredSpec>> {
        self.scan(DESIRED)
    }

    fn get_actual_state(&self, now: Timestamp) -> StateResult<Vec<InstanceHeartbeat>> {
        let mut heartbeats: Vec<InstanceHeartbeat> = self.scan(ACTUAL)?;
        heartbeats.retain(|hb| self.heartbeat_is_current(hb, now));
        Ok(heartbeats)
    }

    fn get_crash_counters(&self) -> StateResult<Vec<CrashCount>> {
        self.scan(CRASH_COUNTS)
    }

    fn save_crash_counters(&self, counts: &[CrashCount]) -> StateResult<()> {
        let records: Vec<(String, &CrashCount)> =
            counts.iter().map(|c| (c.table_key(), c)).collect();
        self.put_all(CRASH_COUNTS, &records)
    }

    fn delete_crash_counters(&self, counts: &[CrashCount]) -> StateResult<u32> {
        let keys: Vec<String> = counts.iter().map(CrashCount::table_key).collect();
        self.remove_all(CRASH_COUNTS, &keys)
    }

    fn get_pending_starts(&self) -> StateResult<Vec<PendingStart>> {
        self.scan(PENDING_STARTS)
    }

    fn get_pending_stops(&self) -> StateResult<Vec<PendingStop>> {
        self.scan(PENDING_STOPS)
    }

    fn save_pending_starts(&self, starts: &[PendingStart]) -> StateResult<()> {
        let records: Vec<(String, &PendingStart)> =
            starts.iter().map(|s| (s.table_key(), s)).collect();
        self.put_all(PENDING_STARTS, &records)
    }

    fn save_pending_stops(&self, stops: &[PendingStop]) -> StateResult<()> {
        let records: Vec<(String, &PendingStop)> =
            stops.iter().map(|s| (s.table_key(), s)).collect();
        self.put_all(PENDING_STOPS, &records)
    }

    fn delete_pending_starts(&self, starts: &[PendingStart]) -> StateResult<u32> {
        let keys: Vec<String> = starts.iter().map(PendingStart::table_key).collect();
        self.remove_all(PENDING_STARTS, &keys)
    }

    fn delete_pending_stops(&self, stops: &[PendingStop]) -> StateResult<u32> {
        let keys: Vec<String> = stops.iter().map(PendingStop::table_key).collect();
        self.remove_all(PENDING_STOPS, &keys)
    }

    fn save_analysis(
        &self,
        starts: &[PendingStart],
        stops: &[PendingStop],
        crash_counts: &[CrashCount],
    ) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(PENDING_STARTS).map_err(map_err!(Table))?;
            for start in starts {
                insert_json(&mut table, &start.table_key(), start)?;
            }
        }
        {
            let mut table = txn.open_table(PENDING_STOPS).map_err(map_err!(Table))?;
            for stop in stops {
                insert_json(&mut table, &stop.table_key(), stop)?;
            }
        }
        {
            let mut table = txn.open_table(CRASH_COUNTS).map_err(map_err!(Table))?;
            for count in crash_counts {
                insert_json(&mut table, &count.table_key(), count)?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            starts = starts.len(),
            stops = stops.len(),
            crash_counts = crash_counts.len(),
            "analysis persisted"
        );
        Ok(())
    }

    fn allocate_message_ids(&self, count: u64) -> StateResult<u64> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let first;
        {
            let mut table = txn.open_table(META).map_err(map_err!(Table))?;
            let last = table
                .get(META_MESSAGE_SEQ)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value())
                .unwrap_or(0);
            first = last + 1;
            table
                .insert(META_MESSAGE_SEQ, last + count)
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(first)
    }

    fn get_freshness(&self) -> StateResult<Freshness> {
        Ok(Freshness {
            desired_at: self.read_meta(META_DESIRED_FRESH)?,
            actual_at: self.read_meta(META_ACTUAL_FRESH)?,
        })
    }

    fn increment_metric(&self, name: &str) -> StateResult<u64> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let next;
        {
            let mut table = txn.open_table(METRICS).map_err(map_err!(Table))?;
            let current = table
                .get(name)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value())
                .unwrap_or(0);
            next = current + 1;
            table.insert(name, next).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(next)
    }

    fn get_metrics(&self) -> StateResult<Vec<(String, u64)>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(METRICS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            results.push((key.value().to_string(), value.value()));
        }
        Ok(results)
    }
}

fn insert_json<T: Serialize + ?Sized>(
    table: &mut Table<'_, &'static str, &'static [u8]>,
    key: &str,
    record: &T,
) -> StateResult<()> {
    let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
    table
        .insert(key, value.as_slice())
        .map_err(map_err!(Write))?;
    Ok(())
}
