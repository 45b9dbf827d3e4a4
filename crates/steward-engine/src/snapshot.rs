//! State snapshot — per-cycle, read-only view of desired and actual state.
//!
//! Built once at the start of an analysis or dispatch cycle and indexed by
//! app key. Nothing mutates a snapshot after it is built.

use std::collections::BTreeMap;

use steward_state::{AppKey, DesiredSpec, InstanceHeartbeat, Store, Timestamp};

use crate::error::{EngineError, EngineResult};

/// Everything known about one app version in this cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct AppView {
    pub key: AppKey,
    pub desired: Option<DesiredSpec>,
    pub heartbeats: Vec<InstanceHeartbeat>,
}

impl AppView {
    fn new(key: AppKey) -> Self {
        Self {
            key,
            desired: None,
            heartbeats: Vec::new(),
        }
    }

    /// Target instance count; 0 unless the app is started and staged.
    pub fn instance_count(&self) -> u32 {
        self.desired
            .as_ref()
            .map_or(0, DesiredSpec::effective_instance_count)
    }

    pub fn is_desired(&self) -> bool {
        self.desired.as_ref().is_some_and(DesiredSpec::wants_instances)
    }

    pub fn is_staging(&self) -> bool {
        self.desired.as_ref().is_some_and(DesiredSpec::is_staging)
    }

    /// Live (non-crashed) heartbeats reported at `index`.
    pub fn live_at(&self, index: u32) -> impl Iterator<Item = &InstanceHeartbeat> {
        self.heartbeats
            .iter()
            .filter(move |hb| hb.instance_index == index && hb.is_live())
    }

    pub fn has_crash_at(&self, index: u32) -> bool {
        self.heartbeats
            .iter()
            .any(|hb| hb.instance_index == index && hb.is_crashed())
    }

    pub fn has_live_instance(&self) -> bool {
        self.heartbeats.iter().any(InstanceHeartbeat::is_live)
    }

    pub fn heartbeat(&self, instance_guid: &str) -> Option<&InstanceHeartbeat> {
        self.heartbeats
            .iter()
            .find(|hb| hb.instance_guid == instance_guid)
    }

    /// Number of live heartbeats per index.
    pub fn running_indices(&self) -> BTreeMap<u32, u32> {
        let mut indices = BTreeMap::new();
        for hb in self.heartbeats.iter().filter(|hb| hb.is_live()) {
            *indices.entry(hb.instance_index).or_insert(0) += 1;
        }
        indices
    }

    /// Fraction of the desired indices with no live instance, 0.0–1.0.
    pub fn unsatisfied_fraction(&self) -> f64 {
        let count = self.instance_count();
        if count == 0 {
            return 0.0;
        }
        let satisfied = self
            .running_indices()
            .keys()
            .filter(|&&index| index < count)
            .count() as u32;
        f64::from(count - satisfied) / f64::from(count)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    apps: BTreeMap<AppKey, AppView>,
}

impl Snapshot {
    /// Read desired and actual state from the store.
    ///
    /// Either read failing fails the whole snapshot.
    pub fn load<S: Store>(store: &S, now: Timestamp) -> EngineResult<Self> {
        let desired = store
            .get_desired_state()
            .map_err(EngineError::read("desired state"))?;
        let actual = store
            .get_actual_state(now)
            .map_err(EngineError::read("actual state"))?;
        Ok(Self::from_state(desired, actual))
    }

    pub fn from_state(desired: Vec<DesiredSpec>, actual: Vec<InstanceHeartbeat>) -> Self {
        let mut apps: BTreeMap<AppKey, AppView> = BTreeMap::new();
        for spec in desired {
            let key = spec.key();
            apps.entry(key.clone())
                .or_insert_with(|| AppView::new(key))
                .desired = Some(spec);
        }
        for hb in actual {
            let key = hb.key();
            apps.entry(key.clone())
                .or_insert_with(|| AppView::new(key))
                .heartbeats
                .push(hb);
        }
        Self { apps }
    }

    pub fn app(&self, key: &AppKey) -> Option<&AppView> {
        self.apps.get(key)
    }

    /// Every app present in desired or actual state, ordered by key.
    pub fn apps(&self) -> impl Iterator<Item = &AppView> {
        self.apps.values()
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }
}

/// Refuse to act on state that has not been refreshed within `ttl_secs`.
pub fn ensure_fresh<S: Store>(store: &S, now: Timestamp, ttl_secs: u64) -> EngineResult<()> {
    let freshness = store
        .get_freshness()
        .map_err(EngineError::read("freshness"))?;
    if !freshness.desired_is_fresh(now, ttl_secs) {
        return Err(EngineError::Stale {
            what: "desired",
            refreshed_at: freshness.desired_at,
            now,
        });
    }
    if !freshness.actual_is_fresh(now, ttl_secs) {
        return Err(EngineError::Stale {
            what: "actual",
            refreshed_at: freshness.actual_at,
            now,
        });
    }
    Ok(())
}
