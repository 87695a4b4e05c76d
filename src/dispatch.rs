//! Dispatcher
//!
//! Periodically forwards the latest reading of every enabled sensor to the
//! collector.
//!
//! Each send runs in its own task, so a slow or failing collector call for one
//! sensor never holds back another sensor or the next tick. Outcomes are kept
//! per sensor (latest completed attempt wins) and published on a broadcast
//! feed for notification UIs.
//!
//! ## Modes
//!
//! - `Batched` (default): one snapshot per tick
//! - `Immediate`: every accepted store write of an enabled sensor is sent as
//!   soon as it lands

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::clock::Clock;
use crate::controller::SubscriptionController;
use crate::sensors::Reading;
use crate::store::{ReadingStore, ReadingUpdate};
use crate::transport::{DispatchOutcome, DispatchResult, Transport};

/// Capacity of the outcome feed
const OUTCOME_CAPACITY: usize = 256;

/// When readings are sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    #[default]
    Batched,
    Immediate,
}

impl std::str::FromStr for DispatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "batched" => Ok(DispatchMode::Batched),
            "immediate" => Ok(DispatchMode::Immediate),
            other => Err(format!("unknown dispatch mode: {}", other)),
        }
    }
}

impl std::fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchMode::Batched => write!(f, "batched"),
            DispatchMode::Immediate => write!(f, "immediate"),
        }
    }
}

/// Configuration for dispatch behavior
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Tick period in milliseconds
    pub interval_ms: u64,
    pub mode: DispatchMode,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5000,
            mode: DispatchMode::Batched,
        }
    }
}

/// Latest outcome per sensor plus a live feed of every outcome
pub struct OutcomeLog {
    latest: RwLock<HashMap<String, DispatchOutcome>>,
    feed: broadcast::Sender<DispatchOutcome>,
}

impl OutcomeLog {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(OUTCOME_CAPACITY);
        Self {
            latest: RwLock::new(HashMap::new()),
            feed,
        }
    }

    async fn record(&self, outcome: DispatchOutcome) {
        self.latest
            .write()
            .await
            .insert(outcome.sensor_id.clone(), outcome.clone());
        let _ = self.feed.send(outcome);
    }

    pub async fn last(&self, sensor_id: &str) -> Option<DispatchOutcome> {
        self.latest.read().await.get(sensor_id).cloned()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchOutcome> {
        self.feed.subscribe()
    }
}

impl Default for OutcomeLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Sends issued by one tick
///
/// Dropping it leaves the sends running; `outcomes` waits for them.
pub struct DispatchTick {
    skipped: Vec<String>,
    pending: Vec<(String, JoinHandle<DispatchOutcome>)>,
}

impl DispatchTick {
    /// Sensors a send was issued for
    pub fn dispatched(&self) -> Vec<&str> {
        self.pending.iter().map(|(id, _)| id.as_str()).collect()
    }

    /// Enabled sensors skipped because they have not emitted yet
    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    /// Wait for every send of this tick
    pub async fn outcomes(self) -> Vec<DispatchOutcome> {
        let mut outcomes = Vec::with_capacity(self.pending.len());
        for (sensor_id, task) in self.pending {
            match task.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => outcomes.push(DispatchOutcome {
                    sensor_id,
                    result: DispatchResult::Error(format!("dispatch task failed: {}", e)),
                    attempted_at: chrono::Utc::now(),
                }),
            }
        }
        outcomes
    }
}

/// Everything a send needs, cheap to clone into tasks
#[derive(Clone)]
struct DispatchCore {
    controller: Arc<SubscriptionController>,
    store: Arc<ReadingStore>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    outcomes: Arc<OutcomeLog>,
}

impl DispatchCore {
    async fn tick(&self) -> DispatchTick {
        let mut skipped = Vec::new();
        let mut pending = Vec::new();

        for sensor_id in self.controller.enabled_sensors() {
            let reading = match self.store.get(&sensor_id).await {
                Ok(reading) => reading,
                Err(e) => {
                    tracing::error!(sensor = %sensor_id, error = %e, "No store slot for enabled sensor");
                    continue;
                }
            };

            if !reading.has_timestamp() {
                skipped.push(sensor_id);
                continue;
            }

            let task = self.spawn_send(sensor_id.clone(), reading);
            pending.push((sensor_id, task));
        }

        DispatchTick { skipped, pending }
    }

    fn spawn_send(&self, sensor_id: String, reading: Reading) -> JoinHandle<DispatchOutcome> {
        let core = self.clone();

        tokio::spawn(async move {
            let attempted_at = core.clock.now();
            let result = core.transport.send(&sensor_id, &reading).await;

            match &result {
                DispatchResult::Success => {
                    tracing::debug!(sensor = %sensor_id, "Dispatch succeeded")
                }
                DispatchResult::Error(reason) => {
                    tracing::warn!(sensor = %sensor_id, reason = %reason, "Dispatch failed")
                }
            }

            let outcome = DispatchOutcome {
                sensor_id,
                result,
                attempted_at,
            };
            core.outcomes.record(outcome.clone()).await;
            outcome
        })
    }
}

struct Runner {
    task: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

/// Periodic driver of collector sends
pub struct Dispatcher {
    core: DispatchCore,
    config: DispatchConfig,
    runner: Mutex<Option<Runner>>,
    stopped: AtomicBool,
}

impl Dispatcher {
    pub fn new(
        controller: Arc<SubscriptionController>,
        store: Arc<ReadingStore>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            core: DispatchCore {
                controller,
                store,
                transport,
                clock,
                outcomes: Arc::new(OutcomeLog::new()),
            },
            config,
            runner: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Run one dispatch pass now
    ///
    /// Returns as soon as the sends are issued.
    pub async fn tick(&self) -> DispatchTick {
        self.core.tick().await
    }

    pub async fn last_outcome(&self, sensor_id: &str) -> Option<DispatchOutcome> {
        self.core.outcomes.last(sensor_id).await
    }

    pub fn subscribe_outcomes(&self) -> broadcast::Receiver<DispatchOutcome> {
        self.core.outcomes.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.runner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Spawn the background loop
    ///
    /// Returns false if it is already running or the dispatcher was stopped.
    pub fn start(&self) -> bool {
        let mut runner = self.runner.lock().unwrap_or_else(|e| e.into_inner());
        if runner.is_some() || self.stopped.load(Ordering::SeqCst) {
            return false;
        }

        // Subscribe before spawning so no write after `start` returns is missed
        let updates = self.core.store.updates();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_loop(
            self.core.clone(),
            self.config.clone(),
            updates,
            shutdown_rx,
        ));
        *runner = Some(Runner { task, shutdown });

        tracing::info!(
            interval_ms = self.config.interval_ms,
            mode = %self.config.mode,
            "Dispatcher started"
        );
        true
    }

    /// Stop the background loop; later calls are no-ops
    ///
    /// Sends already issued are left to finish on their own.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        let runner = self.runner.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(runner) = runner {
            let _ = runner.shutdown.send(true);
            if let Err(e) = runner.task.await {
                if !e.is_cancelled() {
                    tracing::error!(error = %e, "Dispatcher loop panicked");
                }
            }
            tracing::info!("Dispatcher stopped");
        }
    }
}

async fn run_loop(
    core: DispatchCore,
    config: DispatchConfig,
    mut updates: broadcast::Receiver<ReadingUpdate>,
    mut shutdown: watch::Receiver<bool>,
) {
    let batched = config.mode == DispatchMode::Batched;
    let immediate = config.mode == DispatchMode::Immediate;

    let mut ticker = tokio::time::interval(Duration::from_millis(config.interval_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the first immediate tick
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick(), if batched => {
                let tick = core.tick().await;
                tracing::debug!(
                    dispatched = tick.pending.len(),
                    skipped = tick.skipped.len(),
                    "Dispatch tick"
                );
            }
            update = updates.recv(), if immediate => match update {
                Ok(update) => {
                    if core.controller.is_enabled(&update.sensor_id).unwrap_or(false) {
                        core.spawn_send(update.sensor_id, update.reading);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Immediate dispatch fell behind, readings skipped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}
