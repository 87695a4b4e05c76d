//! Telemetry Manager
//!
//! The single long-lived object a UI talks to. It owns the registry, the
//! reading store, the subscription controller and the dispatcher, and gives
//! them an explicit `init()`/`dispose()` lifecycle.
//!
//! ```rust,no_run
//! use sensorlink::clock::SystemClock;
//! use sensorlink::manager::TelemetryManager;
//! use sensorlink::sensors::SensorRegistry;
//! use sensorlink::source::{SimulatedSource, SourceSet};
//! use sensorlink::transport::{HttpTransport, TransportConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let transport = Arc::new(HttpTransport::new(TransportConfig::default())?);
//!     let manager = TelemetryManager::builder(SensorRegistry::standard(), transport)
//!         .sources(SourceSet::new().fallback(Arc::new(SimulatedSource::new())))
//!         .clock(Arc::new(SystemClock))
//!         .build()?;
//!
//!     manager.init().await;
//!     manager.toggle("accelerometer").await?;
//!
//!     let mut outcomes = manager.outcomes();
//!     while let Ok(outcome) = outcomes.recv().await {
//!         let (title, message) = outcome.notification();
//!         println!("{title}: {message}");
//!     }
//!
//!     manager.dispose().await;
//!     Ok(())
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::clock::{Clock, SystemClock};
use crate::controller::{EnablementState, SensorState, SubscriptionController};
use crate::dispatch::{DispatchConfig, DispatchTick, Dispatcher};
use crate::sensors::{Reading, SensorError, SensorRegistry, SensorResult};
use crate::source::SourceSet;
use crate::store::{ReadingStore, ReadingUpdate};
use crate::transport::{DispatchOutcome, Transport};

/// Builder for [`TelemetryManager`]
pub struct TelemetryManagerBuilder {
    registry: SensorRegistry,
    transport: Arc<dyn Transport>,
    sources: SourceSet,
    clock: Arc<dyn Clock>,
    dispatch: DispatchConfig,
    enable_on_init: Vec<String>,
}

impl TelemetryManagerBuilder {
    pub fn sources(mut self, sources: SourceSet) -> Self {
        self.sources = sources;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn dispatch(mut self, config: DispatchConfig) -> Self {
        self.dispatch = config;
        self
    }

    /// Sensors `init()` turns on
    pub fn enable_on_init(mut self, sensor_ids: impl IntoIterator<Item = String>) -> Self {
        self.enable_on_init = sensor_ids.into_iter().collect();
        self
    }

    /// Fails with `UnknownSensor` if an init sensor is not registered
    pub fn build(self) -> SensorResult<TelemetryManager> {
        for id in &self.enable_on_init {
            self.registry.descriptor_of(id)?;
        }

        let registry = Arc::new(self.registry);
        let store = Arc::new(ReadingStore::new(&registry));
        let controller = Arc::new(SubscriptionController::new(
            &registry,
            Arc::clone(&store),
            self.sources,
            Arc::clone(&self.clock),
        ));
        let dispatcher = Dispatcher::new(
            Arc::clone(&controller),
            Arc::clone(&store),
            self.transport,
            self.clock,
            self.dispatch,
        );

        Ok(TelemetryManager {
            registry,
            store,
            controller,
            dispatcher,
            enable_on_init: self.enable_on_init,
            initialized: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        })
    }
}

/// Owner of the whole sensor telemetry lifecycle
pub struct TelemetryManager {
    registry: Arc<SensorRegistry>,
    store: Arc<ReadingStore>,
    controller: Arc<SubscriptionController>,
    dispatcher: Dispatcher,
    enable_on_init: Vec<String>,
    initialized: AtomicBool,
    disposed: AtomicBool,
}

impl TelemetryManager {
    pub fn builder(registry: SensorRegistry, transport: Arc<dyn Transport>) -> TelemetryManagerBuilder {
        TelemetryManagerBuilder {
            registry,
            transport,
            sources: SourceSet::new(),
            clock: Arc::new(SystemClock),
            dispatch: DispatchConfig::default(),
            enable_on_init: Vec::new(),
        }
    }

    /// Start the dispatcher and turn on the configured sensors
    ///
    /// Returns the sensors that could not be turned on; the rest are
    /// unaffected by those failures. Calling it again is a no-op.
    pub async fn init(&self) -> Vec<SensorError> {
        if self.disposed.load(Ordering::SeqCst) || self.initialized.swap(true, Ordering::SeqCst) {
            return Vec::new();
        }

        self.dispatcher.start();

        let mut failures = Vec::new();
        for id in &self.enable_on_init {
            if let Err(e) = self.controller.set_enabled(id, true).await {
                tracing::warn!(sensor = %id, error = %e, "Could not enable sensor on init");
                failures.push(e);
            }
        }

        tracing::info!(
            sensors = self.registry.len(),
            enabled = self.controller.enabled_sensors().len(),
            "Telemetry manager initialized"
        );
        failures
    }

    /// Flip a sensor between Idle and Active
    pub async fn toggle(&self, sensor_id: &str) -> SensorResult<SensorState> {
        self.registry.descriptor_of(sensor_id)?;
        if self.disposed.load(Ordering::SeqCst) {
            return Err(SensorError::SensorUnavailable {
                sensor: sensor_id.to_string(),
                reason: "telemetry manager disposed".to_string(),
            });
        }
        self.controller.toggle(sensor_id).await
    }

    pub fn current_state(&self) -> EnablementState {
        self.controller.current_state()
    }

    pub async fn latest_reading(&self, sensor_id: &str) -> SensorResult<Reading> {
        self.store.get(sensor_id).await
    }

    pub async fn last_outcome(&self, sensor_id: &str) -> SensorResult<Option<DispatchOutcome>> {
        self.registry.descriptor_of(sensor_id)?;
        Ok(self.dispatcher.last_outcome(sensor_id).await)
    }

    /// Every dispatch outcome as it completes
    pub fn outcomes(&self) -> broadcast::Receiver<DispatchOutcome> {
        self.dispatcher.subscribe_outcomes()
    }

    /// Every accepted reading as it is stored
    pub fn readings(&self) -> broadcast::Receiver<ReadingUpdate> {
        self.store.updates()
    }

    /// Run a dispatch pass outside the timer
    pub async fn dispatch_now(&self) -> DispatchTick {
        self.dispatcher.tick().await
    }

    pub fn registry(&self) -> &SensorRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<ReadingStore> {
        &self.store
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Stop the dispatcher and cancel every live subscription
    ///
    /// Runs once; later calls return immediately.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.dispatcher.stop().await;
        self.controller.shutdown().await;

        tracing::info!("Telemetry manager disposed");
    }
}
