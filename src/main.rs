//! # Telemetry Fusion
//!
//! Poll a drone telemetry store and log the fused snapshot.
//!
//! # Control Flow
//!
//! 1. **Initialization**
//!    - Parse arguments and load configuration (file, then environment)
//!    - Set up logging with tracing subscriber (stdout, optional rolling file)
//!    - Build the configured source adapter
//!
//! 2. **Main Loop**
//!    - Poll immediately, then every `polling.interval_ms`
//!    - Log each new snapshot and every connectivity change
//!    - Warn when the retained snapshot goes stale
//!
//! 3. **Graceful Shutdown**
//!    - Ctrl+C tears the controller down so no late fetch publishes
//!
//! # Examples
//!
//! ```bash
//! cargo run --release -- --config config/default.toml
//! TELEMETRY_SOURCE=simulated cargo run -- --once
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use telemetry_fusion::command::StubDispatcher;
use telemetry_fusion::config::{Config, LoggingConfig, SourceKind};
use telemetry_fusion::poller::{ConnectionState, DashboardState, PollingController};
use telemetry_fusion::source::{
    ApiSource, DynamoScanStore, MemoryRecordStore, ScanSource, SimulatedSource, TelemetrySource,
};
use telemetry_fusion::telemetry::fusion::now_millis;

/// Default configuration file location
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Log file name prefix inside `logging.log_dir`
const LOG_FILE_PREFIX: &str = "telemetry-fusion.log";

#[derive(Parser, Debug)]
#[command(name = "telemetry-fusion", version, about = "Fuse partial drone telemetry into one snapshot")]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Run a single cycle and print the dashboard state as JSON
    #[arg(long)]
    once: bool,

    /// Replay raw store records from a JSON array file instead of the configured source
    #[arg(long)]
    replay: Option<PathBuf>,
}

fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        Config::load(path).with_context(|| format!("loading {}", path.display()))?
    } else if path == Path::new(DEFAULT_CONFIG_PATH) {
        Config::default()
    } else {
        anyhow::bail!("configuration file {} not found", path.display());
    };

    config
        .apply_env(std::env::vars())
        .context("applying environment overrides")?;
    Ok(config)
}

fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    if config.log_dir.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        return None;
    }

    let appender = tracing_appender::rolling::daily(&config.log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
        .init();

    Some(guard)
}

fn build_source(config: &Config, replay: Option<&Path>) -> Result<Arc<dyn TelemetrySource>> {
    if let Some(path) = replay {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading replay file {}", path.display()))?;
        let store = MemoryRecordStore::from_json(&json)?;
        info!(records = store.len(), file = %path.display(), "Replaying recorded telemetry");
        return Ok(Arc::new(ScanSource::with_limit(store, config.source.scan_limit)));
    }

    let source: Arc<dyn TelemetrySource> = match config.source.kind {
        SourceKind::Scan => {
            let store = DynamoScanStore::from_config(&config.source)?;
            info!(table = %config.source.table_name, endpoint = store.endpoint(), "Using DynamoDB scan source");
            Arc::new(ScanSource::with_limit(store, config.source.scan_limit))
        }
        SourceKind::Api => {
            let source = ApiSource::from_config(&config.source)?;
            info!(endpoint = source.endpoint(), "Using pre-aggregated API source");
            Arc::new(source)
        }
        SourceKind::Simulated => {
            info!("Using simulated drone");
            Arc::new(SimulatedSource::default())
        }
    };

    Ok(source)
}

/// Log what changed between two published states
fn report(previous: &DashboardState, current: &DashboardState, stale_after: Duration, commands_enabled: bool) {
    if previous.connection != current.connection {
        match current.connection {
            ConnectionState::Disconnected => warn!(
                error = current.last_error.as_deref().unwrap_or("unknown"),
                "Disconnected, keeping last known telemetry"
            ),
            state => info!(%state, commands_enabled, "Connection state changed"),
        }
    }

    let Some(telemetry) = &current.telemetry else {
        return;
    };
    if previous.telemetry.as_ref() == Some(telemetry) {
        return;
    }

    let armed = match telemetry.observed_armed() {
        Some(true) => "yes",
        Some(false) => "no",
        None => "unknown",
    };

    info!(
        drone_id = %telemetry.drone_id,
        battery = telemetry.battery,
        alt_m = telemetry.position.alt,
        mode = %telemetry.flight_mode,
        armed,
        "Telemetry updated"
    );

    if current.is_stale(now_millis(), stale_after) {
        warn!(
            age_ms = telemetry.age_ms(now_millis()),
            "Telemetry is stale"
        );
    }
}

/// Main entry point for Telemetry Fusion
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args.config)?;
    let _log_guard = init_logging(&config.logging);

    info!("Telemetry Fusion v{} starting...", env!("CARGO_PKG_VERSION"));

    let source = build_source(&config, args.replay.as_deref())?;
    let controller = Arc::new(PollingController::new(source, config.polling.interval()));

    if args.once {
        let outcome = controller.run_cycle().await;
        info!(?outcome, "Single cycle complete");
        println!("{}", serde_json::to_string_pretty(&controller.state())?);
        return Ok(());
    }

    let mut handle = Arc::clone(&controller).start();
    let dispatcher = StubDispatcher::new(handle.subscribe());
    let mut updates = handle.subscribe();
    let mut previous = updates.borrow().clone();

    info!("Press Ctrl+C to exit");

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = updates.borrow_and_update().clone();
                report(&previous, &current, config.polling.stale_after(), dispatcher.enabled());
                previous = current;
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    handle.shutdown();
    info!(cycles = previous.cycle, "Telemetry Fusion stopped");
    Ok(())
}
