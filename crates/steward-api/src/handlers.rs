//! REST API handlers.
//!
//! Intake handlers write through the heartbeat buffer or the store; read
//! handlers return JSON views of the store.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use tracing::debug;

use steward_engine::{epoch_secs, metrics, Snapshot};
use steward_state::*;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

// ── Intake ─────────────────────────────────────────────────────

/// POST /v1/heartbeats
pub async fn record_heartbeats(
    State(state): State<ApiState>,
    Json(heartbeats): Json<Vec<InstanceHeartbeat>>,
) -> impl IntoResponse {
    let accepted = heartbeats.len();
    state.intake.record_batch(heartbeats, epoch_secs());
    debug!(accepted, "heartbeats buffered");
    (
        StatusCode::ACCEPTED,
        ApiResponse::ok(serde_json::json!({
            "accepted": accepted,
            "buffered": state.intake.len(),
        })),
    )
}

/// PUT /v1/desired
pub async fn replace_desired(
    State(state): State<ApiState>,
    Json(specs): Json<Vec<DesiredSpec>>,
) -> impl IntoResponse {
    match state.store.sync_desired_state(&specs, epoch_secs()) {
        Ok(()) => ApiResponse::ok(serde_json::json!({ "apps": specs.len() })).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Read side ──────────────────────────────────────────────────

/// One app as the engine currently sees it.
#[derive(Debug, serde::Serialize)]
pub struct AppSummary {
    pub app_id: String,
    pub app_version: String,
    pub desired: Option<DesiredSpec>,
    /// Effective target; 0 unless started and staged.
    pub instance_count: u32,
    pub running_indices: BTreeMap<u32, u32>,
    pub heartbeats: Vec<InstanceHeartbeat>,
}

/// GET /v1/apps
pub async fn list_apps(State(state): State<ApiState>) -> impl IntoResponse {
    match Snapshot::load(&state.store, epoch_secs()) {
        Ok(snapshot) => {
            let apps: Vec<AppSummary> = snapshot
                .apps()
                .map(|app| AppSummary {
                    app_id: app.key.app_id.clone(),
                    app_version: app.key.app_version.clone(),
                    desired: app.desired.clone(),
                    instance_count: app.instance_count(),
                    running_indices: app.running_indices(),
                    heartbeats: app.heartbeats.clone(),
                })
                .collect();
            ApiResponse::ok(apps).into_response()
        }
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

#[derive(Debug, serde::Serialize)]
pub struct PendingView {
    pub starts: Vec<PendingStart>,
    pub stops: Vec<PendingStop>,
}

/// GET /v1/pending
pub async fn list_pending(State(state): State<ApiState>) -> impl IntoResponse {
    let pending = state.store.get_pending_starts().and_then(|starts| {
        let stops = state.store.get_pending_stops()?;
        Ok(PendingView { starts, stops })
    });
    match pending {
        Ok(view) => ApiResponse::ok(view).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let counters = state.store.get_metrics().unwrap_or_default();
    let body = metrics::render_prometheus(&counters);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
