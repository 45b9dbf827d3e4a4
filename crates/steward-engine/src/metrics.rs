//! Per-reason dispatch counters and their Prometheus rendering.

use std::fmt::Write;

use tracing::warn;

use steward_state::{StartReason, StopReason, Store};

use crate::lifecycle::{start_reason_label, stop_reason_label};

pub fn start_metric(reason: StartReason) -> String {
    format!("starts_{}", start_reason_label(reason))
}

pub fn stop_metric(reason: StopReason) -> String {
    format!("stops_{}", stop_reason_label(reason))
}

/// Count a sent start. Failures are logged and otherwise ignored.
pub fn record_start_sent<S: Store>(store: &S, reason: StartReason) {
    let name = start_metric(reason);
    if let Err(e) = store.increment_metric(&name) {
        warn!(metric = %name, error = %e, "failed to record dispatch metric");
    }
}

/// Count a sent stop. Failures are logged and otherwise ignored.
pub fn record_stop_sent<S: Store>(store: &S, reason: StopReason) {
    let name = stop_metric(reason);
    if let Err(e) = store.increment_metric(&name) {
        warn!(metric = %name, error = %e, "failed to record dispatch metric");
    }
}

/// Render counters in the Prometheus text exposition format.
///
/// `starts_missing` becomes `steward_starts_sent_total{reason="missing"}`;
/// unknown names are exported as plain `steward_<name>` counters.
pub fn render_prometheus(metrics: &[(String, u64)]) -> String {
    let mut starts = Vec::new();
    let mut stops = Vec::new();
    let mut other = Vec::new();
    for (name, value) in metrics {
        if let Some(reason) = name.strip_prefix("starts_") {
            starts.push((reason, *value));
        } else if let Some(reason) = name.strip_prefix("stops_") {
            stops.push((reason, *value));
        } else {
            other.push((name.as_str(), *value));
        }
    }

    let mut out = String::new();
    write_family(&mut out, "steward_starts_sent_total", "Start messages sent, by reason.", &starts);
    write_family(&mut out, "steward_stops_sent_total", "Stop messages sent, by reason.", &stops);
    for (name, value) in other {
        let _ = writeln!(out, "# TYPE steward_{name} counter");
        let _ = writeln!(out, "steward_{name} {value}");
    }
    out
}

fn write_family(out: &mut String, family: &str, help: &str, samples: &[(&str, u64)]) {
    if samples.is_empty() {
        return;
    }
    let _ = writeln!(out, "# HELP {family} {help}");
    let _ = writeln!(out, "# TYPE {family} counter");
    for (reason, value) in samples {
        let _ = writeln!(out, "{family}{{reason=\"{reason}\"}} {value}");
    }
}
