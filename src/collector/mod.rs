//! Reference Collector
//!
//! Minimal HTTP receiver for the agent's dispatches, built with Axum. Useful
//! for running the whole pipeline locally and as the far end in tests.
//!
//! # Endpoints
//!
//! - `POST /api/sensor/data` - Accept one `{type, data}` payload
//! - `GET /api/sensor/data` - Latest payload per sensor type
//! - `GET /health` - Liveness and receive counter

mod error;

pub use error::{CollectorError, CollectorResult};

use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

use crate::sensors::{Reading, SensorCategory, SensorRegistry};
use crate::transport::SensorPayload;

/// Path the agent posts readings to
pub const SENSOR_DATA_PATH: &str = "/api/sensor/data";

/// Shared collector state
pub struct CollectorState {
    accepted: HashMap<String, SensorCategory>,
    latest: RwLock<HashMap<String, Reading>>,
    received: AtomicU64,
}

impl CollectorState {
    /// Accept payloads for the registry's sensors, in their category's shape
    pub fn new(registry: &SensorRegistry) -> Self {
        Self {
            accepted: registry
                .descriptors()
                .iter()
                .map(|d| (d.id.clone(), d.category))
                .collect(),
            latest: RwLock::new(HashMap::new()),
            received: AtomicU64::new(0),
        }
    }

    pub async fn latest(&self, sensor_type: &str) -> Option<Reading> {
        self.latest.read().await.get(sensor_type).cloned()
    }

    /// Number of payloads accepted so far
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

impl Default for CollectorState {
    fn default() -> Self {
        Self::new(&SensorRegistry::standard())
    }
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub status: String,
    pub received: u64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub received: u64,
    pub version: String,
}

/// Build the collector router
pub fn build_router(state: Arc<CollectorState>) -> Router {
    Router::new()
        .route(SENSOR_DATA_PATH, get(list_latest).post(ingest))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// POST /api/sensor/data
async fn ingest(
    State(state): State<Arc<CollectorState>>,
    Json(payload): Json<SensorPayload<'static>>,
) -> CollectorResult<(StatusCode, Json<IngestResponse>)> {
    let category = *state.accepted.get(&*payload.sensor_type).ok_or_else(|| {
        CollectorError::Validation(format!("unknown sensor type: {}", payload.sensor_type))
    })?;
    if !payload.data.fits(category) {
        return Err(CollectorError::Validation(format!(
            "data does not match the {} payload shape",
            category
        )));
    }
    if !payload.data.has_timestamp() {
        return Err(CollectorError::Validation(
            "reading has no timestamp".to_string(),
        ));
    }

    tracing::info!(
        sensor = %payload.sensor_type,
        timestamp = %payload.data.timestamp(),
        "Reading received"
    );

    state
        .latest
        .write()
        .await
        .insert(payload.sensor_type.into_owned(), payload.data.into_owned());
    let received = state.received.fetch_add(1, Ordering::Relaxed) + 1;

    Ok((
        StatusCode::OK,
        Json(IngestResponse {
            status: "ok".to_string(),
            received,
        }),
    ))
}

/// GET /api/sensor/data
async fn list_latest(State(state): State<Arc<CollectorState>>) -> Json<HashMap<String, Reading>> {
    Json(state.latest.read().await.clone())
}

/// GET /health
async fn health(State(state): State<Arc<CollectorState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        received: state.received(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Run the collector until Ctrl+C or SIGTERM
pub async fn serve(state: Arc<CollectorState>, bind: &str) -> CollectorResult<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;

    tracing::info!("Collector listening on {}", bind);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Collector shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use tower::util::ServiceExt;

    fn post_json(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(SENSOR_DATA_PATH)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_ingest_accepts_known_sensor() {
        let state = Arc::new(CollectorState::default());
        let app = build_router(Arc::clone(&state));

        let response = app
            .oneshot(post_json(serde_json::json!({
                "type": "barometer",
                "data": {"pressure": 1009.8, "timestamp": "2024-01-01T00:00:00.000Z"},
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.received(), 1);
        let latest = state.latest("barometer").await.unwrap();
        assert_eq!(latest.as_pressure().unwrap().pressure, 1009.8);
    }

    #[tokio::test]
    async fn test_ingest_rejects_unknown_type() {
        let state = Arc::new(CollectorState::default());
        let app = build_router(Arc::clone(&state));

        let response = app
            .oneshot(post_json(serde_json::json!({
                "type": "thermometer",
                "data": {"pressure": 1.0, "timestamp": "2024-01-01T00:00:00.000Z"},
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.received(), 0);
    }

    #[tokio::test]
    async fn test_ingest_rejects_wrong_shape_for_type() {
        let state = Arc::new(CollectorState::default());
        let app = build_router(Arc::clone(&state));

        let response = app
            .oneshot(post_json(serde_json::json!({
                "type": "gps",
                "data": {"x": 1.0, "y": 2.0, "z": 3.0, "timestamp": "2024-01-01T00:00:00.000Z"},
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.received(), 0);
        assert!(state.latest("gps").await.is_none());
    }

    #[tokio::test]
    async fn test_ingest_rejects_unstamped_reading() {
        let app = build_router(Arc::new(CollectorState::default()));

        let response = app
            .oneshot(post_json(serde_json::json!({
                "type": "gps",
                "data": {"latitude": 0.0, "longitude": 0.0, "timestamp": ""},
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_malformed_body_is_client_error() {
        let app = build_router(Arc::new(CollectorState::default()));

        let response = app
            .oneshot(post_json(serde_json::json!({"type": "gps"})))
            .await
            .unwrap();

        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn test_health() {
        let app = build_router(Arc::new(CollectorState::default()));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
