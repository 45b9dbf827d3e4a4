//! Long-running mode: API server plus the intake, analyzer and sender loops.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use steward_core::{Durations, StewardConfig};
use steward_engine::{Analyzer, EngineConfig, HeartbeatBuffer, HttpTransport, Sender};

use crate::open_store;

/// How often buffered heartbeats are written to the store.
const INTAKE_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

pub async fn run(
    config: StewardConfig,
    durations: Durations,
    engine: EngineConfig,
) -> anyhow::Result<()> {
    info!("Steward daemon starting");

    // ── Initialize subsystems ──────────────────────────────────

    let store = open_store(&config, &durations)?;
    let intake = Arc::new(HeartbeatBuffer::new());

    let analyzer = Analyzer::new(store.clone(), engine);
    let transport = HttpTransport::new(&config.transport.endpoint, durations.transport_timeout);
    info!(endpoint = %transport.endpoint(), "dispatch transport configured");
    let sender = Sender::new(store.clone(), transport, engine);

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let intake_shutdown = shutdown_rx.clone();
    let analyzer_shutdown = shutdown_rx.clone();
    let sender_shutdown = shutdown_rx;

    // ── Start background tasks ─────────────────────────────────

    let intake_handle = {
        let intake = Arc::clone(&intake);
        let store = store.clone();
        tokio::spawn(async move {
            intake
                .run(store, INTAKE_FLUSH_INTERVAL, intake_shutdown)
                .await;
        })
    };

    let analysis_interval = durations.analysis_interval;
    let analyzer_handle = tokio::spawn(async move {
        analyzer.run(analysis_interval, analyzer_shutdown).await;
    });

    let send_interval = durations.send_interval;
    let sender_handle = tokio::spawn(async move {
        sender.run(send_interval, sender_shutdown).await;
    });

    // ── Start API server ───────────────────────────────────────

    let router = steward_api::build_router(store, intake);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api.port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Wait for background tasks.
    let _ = intake_handle.await;
    let _ = analyzer_handle.await;
    let _ = sender_handle.await;

    info!("Steward daemon stopped");
    Ok(())
}
