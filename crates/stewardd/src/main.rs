//! stewardd — the Steward daemon.
//!
//! Runs the convergence engine either as one-shot cycles (for an external
//! scheduler) or as a long-running service:
//! - State store (redb)
//! - Heartbeat intake + expiry
//! - Analyzer (convergence orchestrator)
//! - Sender (dispatcher)
//! - REST API + Prometheus metrics
//!
//! # Usage
//!
//! ```text
//! stewardd --config /etc/steward/steward.toml serve
//! stewardd analyze
//! stewardd send
//! ```
//!
//! A failed one-shot cycle exits non-zero after logging the cause.

mod serve;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use steward_core::{Durations, StewardConfig};
use steward_engine::{epoch_secs, metrics, Analyzer, EngineConfig, HttpTransport, Sender};
use steward_state::{DesiredSpec, StateStore, Store};

const DEFAULT_CONFIG: &str = "/etc/steward/steward.toml";
const DEFAULT_FILTER: &str = "info,stewardd=debug,steward=debug";

#[derive(Parser)]
#[command(name = "stewardd", about = "Steward convergence daemon")]
struct Cli {
    /// Path to steward.toml. Defaults apply when omitted and the default
    /// path does not exist.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one analysis cycle and exit.
    Analyze,

    /// Run one dispatch cycle and exit.
    Send,

    /// Run the API, heartbeat intake, analyzer and sender until Ctrl-C.
    Serve,

    /// Replace the desired state with the specs in a JSON file.
    ImportDesired {
        /// JSON array of desired specs.
        file: PathBuf,
    },

    /// Print dispatch counters in Prometheus text format.
    Metrics,

    /// Print pending starts and stops as JSON.
    Pending,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let result = run(cli).await;
    if let Err(ref e) = result {
        error!(error = %format!("{e:#}"), "stewardd failed");
    }
    result
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let durations = config.validate()?;
    let engine = EngineConfig::from_config(&config)?;

    match cli.command {
        Command::Analyze => {
            let store = open_store(&config, &durations)?;
            let report = Analyzer::new(store, engine).analyze(epoch_secs())?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Send => {
            let store = open_store(&config, &durations)?;
            let transport =
                HttpTransport::new(&config.transport.endpoint, durations.transport_timeout);
            let report = Sender::new(store, transport, engine)
                .dispatch(epoch_secs())
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Serve => serve::run(config, durations, engine).await?,
        Command::ImportDesired { file } => {
            let store = open_store(&config, &durations)?;
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let specs: Vec<DesiredSpec> = serde_json::from_str(&content)
                .with_context(|| format!("invalid desired state in {}", file.display()))?;
            store.sync_desired_state(&specs, epoch_secs())?;
            info!(apps = specs.len(), "desired state imported");
        }
        Command::Metrics => {
            let store = open_store(&config, &durations)?;
            print!("{}", metrics::render_prometheus(&store.get_metrics()?));
        }
        Command::Pending => {
            let store = open_store(&config, &durations)?;
            let pending = serde_json::json!({
                "starts": store.get_pending_starts()?,
                "stops": store.get_pending_stops()?,
            });
            println!("{}", serde_json::to_string_pretty(&pending)?);
        }
    }

    Ok(())
}

/// An explicit `--config` must exist; the default path is optional.
fn load_config(path: Option<&Path>) -> anyhow::Result<StewardConfig> {
    let config = match path {
        Some(path) => StewardConfig::from_file(path)?,
        None => StewardConfig::from_file_or_default(Path::new(DEFAULT_CONFIG))?,
    };
    Ok(config)
}

pub(crate) fn open_store(config: &StewardConfig, durations: &Durations) -> anyhow::Result<StateStore> {
    let path = &config.store.path;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let store = StateStore::open(path)?.with_heartbeat_ttl(durations.heartbeat_ttl);
    info!(path = ?path, "state store opened");
    Ok(store)
}
