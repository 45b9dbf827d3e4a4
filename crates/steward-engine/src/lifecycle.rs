//! Pending action lifecycle.
//!
//! ```text
//! scheduled (sent_on = 0) ──send──▶ dispatched (sent_on = t) ──▶ retired
//!        │                               │  ▲
//!        │                               └──┘ resend while keep-alive holds
//!        └──verification failure──▶ retired
//! ```
//!
//! A successful send of a fire-and-forget action (`keep_alive = 0`) retires
//! it at once. Otherwise the first send stamps `sent_on` and the action
//! expires `keep_alive` seconds later. Actions that were never sent do not
//! expire by age.

use steward_state::{PendingStart, PendingStop, StartReason, StopReason, Timestamp};

/// Lifecycle fields shared by pending starts and stops.
pub trait PendingAction {
    fn send_on(&self) -> Timestamp;
    fn sent_on(&self) -> Timestamp;
    fn keep_alive(&self) -> u64;
    fn skip_verification(&self) -> bool;

    /// Identity used to keep at most one pending action per target.
    fn dedup_key(&self) -> String;

    /// Stamp the first dispatch time; later sends keep the original stamp.
    fn mark_sent(&mut self, now: Timestamp);

    fn is_time_to_send(&self, now: Timestamp) -> bool {
        now >= self.send_on()
    }

    fn is_expired(&self, now: Timestamp) -> bool {
        self.sent_on() != 0 && now >= self.sent_on().saturating_add(self.keep_alive())
    }

    fn is_fire_and_forget(&self) -> bool {
        self.keep_alive() == 0
    }
}

impl PendingAction for PendingStart {
    fn send_on(&self) -> Timestamp {
        self.send_on
    }

    fn sent_on(&self) -> Timestamp {
        self.sent_on
    }

    fn keep_alive(&self) -> u64 {
        self.keep_alive
    }

    fn skip_verification(&self) -> bool {
        self.skip_verification
    }

    fn dedup_key(&self) -> String {
        self.table_key()
    }

    fn mark_sent(&mut self, now: Timestamp) {
        if self.sent_on == 0 {
            self.sent_on = now;
        }
    }
}

impl PendingAction for PendingStop {
    fn send_on(&self) -> Timestamp {
        self.send_on
    }

    fn sent_on(&self) -> Timestamp {
        self.sent_on
    }

    fn keep_alive(&self) -> u64 {
        self.keep_alive
    }

    fn skip_verification(&self) -> bool {
        self.skip_verification
    }

    fn dedup_key(&self) -> String {
        self.table_key()
    }

    fn mark_sent(&mut self, now: Timestamp) {
        if self.sent_on == 0 {
            self.sent_on = now;
        }
    }
}

pub fn start_reason_label(reason: StartReason) -> &'static str {
    match reason {
        StartReason::Missing => "missing",
        StartReason::Crashed => "crashed",
        StartReason::Evacuating => "evacuating",
    }
}

pub fn stop_reason_label(reason: StopReason) -> &'static str {
    match reason {
        StopReason::Extra => "extra",
        StopReason::Duplicate => "duplicate",
        StopReason::EvacuationComplete => "evacuation_complete",
    }
}
