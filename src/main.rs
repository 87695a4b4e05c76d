//! Sensorlink Agent
//!
//! Runs the telemetry agent against simulated hardware:
//! - `sensorlink run` samples the configured sensors and forwards readings
//! - `sensorlink config` prints a default config file
//!
//! # Configuration
//!
//! Config is read from `--config PATH` or the default locations, then
//! `SENSORLINK_*` environment variables, then command-line flags.

use clap::{Parser, Subcommand};
use sensorlink::config::{generate_default_config, Config};
use sensorlink::dispatch::DispatchMode;
use sensorlink::source::{Permission, PollingSource, SimulatedPosition, SimulatedSource, SourceSet};
use sensorlink::transport::HttpTransport;
use sensorlink::TelemetryManager;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(name = "sensorlink")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Device telemetry agent")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sample sensors and forward readings to the collector
    Run {
        /// Collector URL readings are POSTed to
        #[arg(long)]
        endpoint: Option<String>,
        /// Dispatch interval in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Sensors to enable at startup (repeatable)
        #[arg(short, long)]
        enable: Vec<String>,
        /// Send every reading as it arrives instead of on a timer
        #[arg(long)]
        immediate: bool,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Config { output } => {
            let content = generate_default_config();
            match output {
                Some(path) => {
                    std::fs::write(&path, content)?;
                    println!("Config written to {:?}", path);
                }
                None => print!("{}", content),
            }
            Ok(())
        }
        Commands::Run {
            endpoint,
            interval_ms,
            enable,
            immediate,
        } => {
            let mut config = match &cli.config {
                Some(path) => Config::load_with_env(path)?,
                None => Config::load_default()?,
            };

            if let Some(endpoint) = endpoint {
                config.collector.endpoint = endpoint;
            }
            if let Some(interval_ms) = interval_ms {
                config.dispatch.interval_ms = interval_ms;
            }
            if !enable.is_empty() {
                config.sensors.enabled = enable;
            }
            if immediate {
                config.dispatch.mode = DispatchMode::Immediate;
            }
            config.validate()?;

            run(config).await
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    config.logging.init_subscriber()?;

    tracing::info!("Starting Sensorlink agent v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Collector endpoint: {}", config.collector.endpoint);
    tracing::info!(
        "Dispatch: {} every {}ms",
        config.dispatch.mode,
        config.dispatch.interval_ms
    );

    let mut simulated = SimulatedSource::new();
    for sensor_id in &config.sensors.unavailable {
        simulated = simulated.missing(sensor_id.clone());
    }

    let permission = if config.sensors.gps_permission {
        Permission::Granted
    } else {
        Permission::Denied
    };
    let location = PollingSource::new(SimulatedPosition::default().permission(permission));

    let sources = SourceSet::new()
        .fallback(Arc::new(simulated))
        .route("gps", Arc::new(location));

    let transport = Arc::new(HttpTransport::new(config.transport())?);

    let manager = TelemetryManager::builder(config.registry()?, transport)
        .sources(sources)
        .dispatch(config.dispatch())
        .enable_on_init(config.sensors.enabled.clone())
        .build()?;

    // Surface every dispatch outcome the way a notification UI would
    let mut outcomes = manager.outcomes();
    let notifier = tokio::spawn(async move {
        loop {
            match outcomes.recv().await {
                Ok(outcome) => {
                    let (title, message) = outcome.notification();
                    if outcome.result.is_success() {
                        tracing::info!(sensor = %outcome.sensor_id, "{}: {}", title, message);
                    } else {
                        tracing::warn!(sensor = %outcome.sensor_id, "{}: {}", title, message);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Notification feed lagged, {} outcomes skipped", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    for err in manager.init().await {
        tracing::warn!("Sensor not started: {}", err);
    }

    let state = manager.current_state();
    let enabled: Vec<&str> = manager
        .registry()
        .ids()
        .filter(|id| state.get(*id).copied().unwrap_or(false))
        .collect();
    tracing::info!("Enabled sensors: {:?}", enabled);

    sensorlink::collector::shutdown_signal().await;

    tracing::info!("Shutting down...");
    manager.dispose().await;
    notifier.abort();

    tracing::info!("Sensorlink shutdown complete");
    Ok(())
}
