//! Send-time verification of pending actions against a fresh snapshot.

use std::fmt;

use steward_state::{PendingStart, PendingStop};

use crate::snapshot::Snapshot;

/// Why a pending action no longer applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    AppNotDesired,
    IndexOutOfRange,
    IndexAlreadyRunning,
    InstanceGone,
    AppStaging,
    InstanceStillNeeded,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::AppNotDesired => "app is no longer desired",
            Self::IndexOutOfRange => "index is outside the desired instance count",
            Self::IndexAlreadyRunning => "index already has a live instance",
            Self::InstanceGone => "instance is no longer live",
            Self::AppStaging => "app is staging",
            Self::InstanceStillNeeded => "instance is the only one serving its index",
        };
        f.write_str(reason)
    }
}

pub fn verify_start(start: &PendingStart, snapshot: &Snapshot) -> Result<(), Rejection> {
    let app = snapshot
        .app(&start.key())
        .filter(|app| app.is_desired())
        .ok_or(Rejection::AppNotDesired)?;
    if start.instance_index >= app.instance_count() {
        return Err(Rejection::IndexOutOfRange);
    }
    if app.live_at(start.instance_index).next().is_some() {
        return Err(Rejection::IndexAlreadyRunning);
    }
    Ok(())
}

pub fn verify_stop(stop: &PendingStop, snapshot: &Snapshot) -> Result<(), Rejection> {
    let app = snapshot.app(&stop.key()).ok_or(Rejection::InstanceGone)?;
    let target = app
        .heartbeat(&stop.instance_guid)
        .filter(|hb| hb.is_live())
        .ok_or(Rejection::InstanceGone)?;
    if app.is_staging() {
        return Err(Rejection::AppStaging);
    }

    let index = target.instance_index;
    let beyond_count = index >= app.instance_count();
    let duplicated = app
        .live_at(index)
        .any(|hb| hb.instance_guid != target.instance_guid);

    if beyond_count || duplicated || target.is_evacuating() || !app.is_desired() {
        Ok(())
    } else {
        Err(Rejection::InstanceStillNeeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;
    use steward_state::{AppState, InstanceState, StartReason, StopReason};

    fn start(app: &str, index: u32) -> PendingStart {
        pending_start(app, index, NOW, 1.0)
    }

    fn stop(app: &str, index: u32, guid: &str) -> PendingStop {
        pending_stop(app, index, guid, StopReason::Duplicate)
    }

    #[test]
    fn start_passes_for_empty_desired_index() {
        let snapshot = Snapshot::from_state(
            vec![desired("a", 3)],
            vec![heartbeat("a", 2, "g-2", InstanceState::Crashed)],
        );
        assert_eq!(verify_start(&start("a", 2), &snapshot), Ok(()));
    }

    #[test]
    fn start_rejected_once_index_runs() {
        let snapshot = Snapshot::from_state(
            vec![desired("a", 3)],
            vec![heartbeat("a", 2, "g-2", InstanceState::Starting)],
        );
        assert_eq!(
            verify_start(&start("a", 2), &snapshot),
            Err(Rejection::IndexAlreadyRunning)
        );
    }

    #[test]
    fn start_rejected_when_scaled_down_or_stopped() {
        let snapshot = Snapshot::from_state(vec![desired("a", 2)], vec![]);
        assert_eq!(
            verify_start(&start("a", 2), &snapshot),
            Err(Rejection::IndexOutOfRange)
        );

        let mut spec = desired("a", 3);
        spec.state = AppState::Stopped;
        let snapshot = Snapshot::from_state(vec![spec], vec![]);
        assert_eq!(
            verify_start(&start("a", 0), &snapshot),
            Err(Rejection::AppNotDesired)
        );

        let mut crashed = start("b", 0);
        crashed.reason = StartReason::Crashed;
        assert_eq!(
            verify_start(&crashed, &Snapshot::default()),
            Err(Rejection::AppNotDesired)
        );
    }

    #[test]
    fn stop_passes_for_duplicate_and_extra() {
        let snapshot = Snapshot::from_state(
            vec![desired("a", 1)],
            vec![
                heartbeat("a", 0, "g-0a", InstanceState::Running),
                heartbeat("a", 0, "g-0b", InstanceState::Running),
                heartbeat("a", 1, "g-1", InstanceState::Running),
            ],
        );
        assert_eq!(verify_stop(&stop("a", 0, "g-0b"), &snapshot), Ok(()));
        assert_eq!(verify_stop(&stop("a", 1, "g-1"), &snapshot), Ok(()));
    }

    #[test]
    fn stop_rejected_for_last_instance_at_index() {
        let snapshot = Snapshot::from_state(
            vec![desired("a", 1)],
            vec![heartbeat("a", 0, "g-0b", InstanceState::Running)],
        );
        assert_eq!(
            verify_stop(&stop("a", 0, "g-0b"), &snapshot),
            Err(Rejection::InstanceStillNeeded)
        );
    }

    #[test]
    fn stop_rejected_when_target_gone_or_crashed() {
        let snapshot = Snapshot::from_state(
            vec![desired("a", 1)],
            vec![heartbeat("a", 3, "g-3", InstanceState::Crashed)],
        );
        assert_eq!(
            verify_stop(&stop("a", 3, "g-3"), &snapshot),
            Err(Rejection::InstanceGone)
        );
        assert_eq!(
            verify_stop(&stop("a", 0, "g-x"), &snapshot),
            Err(Rejection::InstanceGone)
        );
    }

    #[test]
    fn stop_passes_for_evacuating_or_undesired() {
        let snapshot = Snapshot::from_state(
            vec![desired("a", 1)],
            vec![heartbeat("a", 0, "g-0", InstanceState::Evacuating)],
        );
        assert_eq!(verify_stop(&stop("a", 0, "g-0"), &snapshot), Ok(()));

        let snapshot = Snapshot::from_state(
            vec![],
            vec![heartbeat("b", 0, "g-b", InstanceState::Running)],
        );
        assert_eq!(verify_stop(&stop("b", 0, "g-b"), &snapshot), Ok(()));
    }
}
