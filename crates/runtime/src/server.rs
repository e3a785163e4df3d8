//! Status server
//!
//! Health, latest session snapshot and Prometheus metrics for the running
//! detector.

use std::sync::Arc;
use std::time::Instant;

use alerting::DispatchSnapshot;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use dms::{AlertState, SessionSnapshot};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

/// State shared between the frame loop and the handlers
pub struct AppState {
    pub version: String,
    pub start_time: Instant,
    /// Latest session snapshot published by the frame loop
    pub snapshot: SessionSnapshot,
    pub dispatch: DispatchSnapshot,
    pub sinks: Vec<String>,
    /// Set once the stream has ended
    pub finished: bool,
    pub prometheus: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(prometheus: Option<PrometheusHandle>) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: Instant::now(),
            snapshot: SessionSnapshot::default(),
            dispatch: DispatchSnapshot::default(),
            sinks: Vec::new(),
            finished: false,
            prometheus,
        }
    }
}

pub type SharedState = Arc<RwLock<AppState>>;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub frames_processed: u64,
    pub alert_state: AlertState,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub session: SessionSnapshot,
    pub dispatch: DispatchSnapshot,
    pub sinks: Vec<String>,
    pub finished: bool,
}

pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/api/v1/health", get(health_handler))
        .route("/api/v1/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let state = state.read().await;
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    Json(HealthResponse {
        status: if state.finished { "finished" } else { "healthy" }.to_string(),
        timestamp,
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        frames_processed: state.snapshot.frames_processed,
        alert_state: state.snapshot.state,
    })
}

async fn status_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let state = state.read().await;
    Json(StatusResponse {
        session: state.snapshot.clone(),
        dispatch: state.dispatch,
        sinks: state.sinks.clone(),
        finished: state.finished,
    })
}

async fn metrics_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let state = state.read().await;
    match &state.prometheus {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed".to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn get_json(router: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null))
    }

    #[tokio::test]
    async fn test_health_reports_session_state() {
        let state = Arc::new(RwLock::new(AppState::new(None)));
        {
            let mut s = state.write().await;
            s.snapshot.frames_processed = 42;
            s.snapshot.state = AlertState::Drowsy;
        }

        let (status, body) = get_json(create_router(state), "/api/v1/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["frames_processed"], 42);
        assert_eq!(body["alert_state"], "DROWSY");
    }

    #[tokio::test]
    async fn test_status_includes_dispatch_counters() {
        let state = Arc::new(RwLock::new(AppState::new(None)));
        {
            let mut s = state.write().await;
            s.dispatch.handled = 7;
            s.sinks = vec!["audio".to_string()];
            s.finished = true;
        }

        let (status, body) = get_json(create_router(state), "/api/v1/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["dispatch"]["handled"], 7);
        assert_eq!(body["sinks"][0], "audio");
        assert_eq!(body["finished"], true);
        assert_eq!(body["session"]["state"], "NORMAL");
    }

    #[tokio::test]
    async fn test_metrics_without_recorder() {
        let state = Arc::new(RwLock::new(AppState::new(None)));
        let (status, _) = get_json(create_router(state), "/metrics").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
