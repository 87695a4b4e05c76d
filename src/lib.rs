//! # Sensorlink
//!
//! Device telemetry agent: turns hardware sensors on and off on request,
//! caches each sensor's latest reading, and periodically forwards the
//! readings of enabled sensors to a remote HTTP collector.
//!
//! ## Modules
//!
//! - [`sensors`]: Sensor catalog, reading shapes and lifecycle errors
//! - [`store`]: Latest-reading cache with generation-guarded writes
//! - [`source`]: Cancellable sample producers (push, simulated, polled)
//! - [`controller`]: Per-sensor enable/disable state machine
//! - [`transport`]: Collector payload and HTTP transport
//! - [`dispatch`]: Periodic and immediate forwarding with per-sensor outcomes
//! - [`manager`]: `init()`/`dispose()` lifecycle facade for a UI
//! - [`collector`]: Reference collector server
//! - [`config`]: TOML and environment configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sensorlink::config::Config;
//! use sensorlink::source::{SimulatedSource, SourceSet};
//! use sensorlink::transport::HttpTransport;
//! use sensorlink::TelemetryManager;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     let transport = Arc::new(HttpTransport::new(config.transport())?);
//!
//!     let manager = TelemetryManager::builder(config.registry()?, transport)
//!         .sources(SourceSet::new().fallback(Arc::new(SimulatedSource::new())))
//!         .dispatch(config.dispatch())
//!         .enable_on_init(config.sensors.enabled.clone())
//!         .build()?;
//!
//!     for err in manager.init().await {
//!         eprintln!("{err}");
//!     }
//!
//!     tokio::signal::ctrl_c().await?;
//!     manager.dispose().await;
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod collector;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod manager;
pub mod sensors;
pub mod source;
pub mod store;
pub mod transport;

// Re-export top-level types for convenience
pub use sensors::{
    GpsReading, MotionReading, PressureReading, Reading, Sample, SensorCategory,
    SensorDescriptor, SensorError, SensorRegistry, SensorResult,
};

pub use store::{Generation, ReadingStore, ReadingUpdate};

pub use source::{
    ChannelSource, PollingSource, PositionProvider, SensorSource, SimulatedPosition,
    SimulatedSource, SourceError, SourceSet, SourceStream, StopHandle,
};

pub use controller::{EnablementState, SensorState, SubscriptionController, SubscriptionHandle};

pub use transport::{
    DispatchOutcome, DispatchResult, HttpTransport, SensorPayload, Transport, TransportConfig,
    TransportError,
};

pub use dispatch::{DispatchConfig, DispatchMode, DispatchTick, Dispatcher, OutcomeLog};

pub use manager::{TelemetryManager, TelemetryManagerBuilder};

pub use clock::{Clock, FixedClock, SystemClock};

pub use collector::{build_router, CollectorError, CollectorState};

pub use config::{Config, ConfigError, LoggingConfig};
