//! Sensorlink Reference Collector
//!
//! Run with: cargo run --bin sensorlink-collector
//!
//! Accepts the agent's `{type, data}` payloads on `/api/sensor/data` and keeps
//! the latest reading per sensor type in memory.
//!
//! # Configuration
//!
//! - `--bind ADDR` or `[collector].bind` in the config file (default: 0.0.0.0:8080)
//! - `RUST_LOG`: Log filter (default: from `[logging].level`)

use clap::Parser;
use sensorlink::collector::{serve, CollectorState};
use sensorlink::config::Config;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "sensorlink-collector")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Reference HTTP collector for sensorlink readings")]
struct Args {
    /// Address to listen on
    #[arg(short, long)]
    bind: Option<String>,

    /// Config file (default: search standard locations)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default()?,
    };
    config.logging.init_subscriber()?;

    tracing::info!(
        "Starting Sensorlink collector v{}",
        env!("CARGO_PKG_VERSION")
    );

    let bind = args.bind.unwrap_or(config.collector.bind);
    let state = Arc::new(CollectorState::default());

    serve(state, &bind).await?;
    Ok(())
}
