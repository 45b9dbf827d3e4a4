//! steward-api — REST API for Steward.
//!
//! Intake endpoints feed heartbeats and desired state into the store; the
//! read side exposes what the convergence engine sees and has queued.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/v1/heartbeats` | Buffer a batch of instance heartbeats |
//! | PUT | `/v1/desired` | Replace the desired state |
//! | GET | `/v1/apps` | Desired and actual state per app |
//! | GET | `/v1/pending` | Pending starts and stops |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use steward_engine::HeartbeatBuffer;
use steward_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub intake: Arc<HeartbeatBuffer>,
}

/// Build the complete API router.
pub fn build_router(store: StateStore, intake: Arc<HeartbeatBuffer>) -> Router {
    let api_state = ApiState { store, intake };

    let api_routes = Router::new()
        .route("/heartbeats", post(handlers::record_heartbeats))
        .route("/desired", put(handlers::replace_desired))
        .route("/apps", get(handlers::list_apps))
        .route("/pending", get(handlers::list_pending))
        .with_state(api_state.clone());

    Router::new()
        .nest("/v1", api_routes)
        .route("/metrics", get(handlers::prometheus_metrics).with_state(api_state))
}
