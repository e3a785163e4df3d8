//! Microsleep Detector Service
//!
//! Wires a [`DetectionSession`] to a landmark replay source, the alert sinks
//! and the status server, and runs the paced frame loop.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use alerting::{AlertDispatcher, AudioSink, DispatchSnapshot, SerialBuzzerSink};
use cloud_sync::{CloudError, TelemetryClient};
use dms::{AlertEvent, DetectionSession, DmsError, FrameAnalysis, SessionSnapshot};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

pub mod provider;
pub mod server;
pub mod settings;

pub use provider::{spawn_provider, JsonLinesProvider};
pub use server::{create_router, AppState, SharedState};
pub use settings::Settings;

/// Frames buffered between the provider thread and the frame loop
const FRAME_QUEUE: usize = 64;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Settings error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid settings: {0}")]
    Settings(String),

    #[error("Detector error: {0}")]
    Dms(#[from] DmsError),

    #[error("Telemetry error: {0}")]
    Cloud(#[from] CloudError),

    #[error("Cannot open landmark source {path}: {source}")]
    Source { path: String, source: io::Error },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

/// Final counters of a run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub snapshot: SessionSnapshot,
    pub dispatch: DispatchSnapshot,
}

/// Initialize logging
pub fn init_logging(json: bool) -> Result<(), RuntimeError> {
    let builder = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(true);

    let result = if json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    result.map_err(|e| RuntimeError::Logging(e.to_string()))
}

/// Install the Prometheus recorder. Only the first call in a process succeeds.
pub fn install_metrics() -> Option<PrometheusHandle> {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Metrics recorder not installed: {}", e);
            None
        }
    }
}

fn record_frame(analysis: &FrameAnalysis) {
    counter!("detector_frames_total").increment(1);
    if !analysis.face_detected {
        counter!("detector_faceless_frames_total").increment(1);
    }
    if analysis.blink {
        counter!("detector_blinks_total").increment(1);
    }
    if analysis.microsleep_alert().is_some() {
        counter!("detector_microsleeps_total").increment(1);
    }
    gauge!("detector_alert_state").set(f64::from(analysis.state.level()));
}

/// Spawn one dispatcher worker per enabled sink
pub fn build_dispatcher(settings: &Settings) -> Result<AlertDispatcher, RuntimeError> {
    let mut dispatcher = AlertDispatcher::new(settings.alerts.channel_capacity);

    if settings.alerts.audio_enabled {
        dispatcher.spawn("audio", AudioSink::new(&settings.alerts));
    }

    let buzzer = SerialBuzzerSink::open(&settings.alerts);
    if buzzer.is_enabled() {
        dispatcher.spawn("serial", buzzer);
    }

    if settings.telemetry_enabled {
        dispatcher.spawn("telemetry", TelemetryClient::new(settings.cloud.clone())?);
    }

    Ok(dispatcher)
}

/// Bind and serve the status router. Bind failures disable the server only.
async fn spawn_server(addr: &str, state: SharedState) -> Option<JoinHandle<()>> {
    if addr.trim().is_empty() {
        return None;
    }

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            warn!("Status server disabled, cannot bind {}: {}", addr, e);
            return None;
        }
    };
    info!("Status server listening on {}", addr);

    let app = create_router(state);
    Some(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!("Status server stopped: {}", e);
        }
    }))
}

/// Run the detector until the landmark stream ends or Ctrl-C
pub async fn run(settings: Settings) -> Result<RunSummary, RuntimeError> {
    let mut session = DetectionSession::new(settings.dms.clone())?;

    let provider = JsonLinesProvider::open(&settings.landmark_source, settings.dms.fps).map_err(
        |source| RuntimeError::Source {
            path: settings.landmark_source.clone(),
            source,
        },
    )?;

    let dispatcher = build_dispatcher(&settings)?;
    let state: SharedState = Arc::new(RwLock::new(AppState::new(install_metrics())));
    state.write().await.sinks = dispatcher.sink_names().iter().map(|s| s.to_string()).collect();
    info!("Alert sinks: {:?}", dispatcher.sink_names());

    let server = spawn_server(&settings.status_addr, state.clone()).await;
    let mut frames = spawn_provider(provider, FRAME_QUEUE)?;

    let frame_interval = Duration::from_secs_f64(1.0 / settings.dms.fps);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let frame = tokio::select! {
            _ = &mut shutdown => {
                info!("Interrupted, shutting down");
                break;
            }
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => {
                    info!("Landmark stream ended");
                    break;
                }
            },
        };

        let started = Instant::now();
        let analysis = session.process_frame(frame.landmarks.as_ref(), frame.timestamp);
        record_frame(&analysis);

        if let Some(AlertEvent::MicrosleepAlert {
            frame_index,
            duration_s,
            confidence,
            ..
        }) = analysis.microsleep_alert()
        {
            warn!(
                "MICROSLEEP at frame {} ({:.2}s closed, confidence {:?})",
                frame_index, duration_s, confidence
            );
        }
        if analysis.has_events() {
            dispatcher.dispatch(&analysis.events);
        }

        {
            let mut shared = state.write().await;
            shared.snapshot = session.snapshot();
            shared.dispatch = dispatcher.metrics();
        }

        if settings.pace_frames {
            match frame_interval.checked_sub(started.elapsed()) {
                Some(rest) => tokio::time::sleep(rest).await,
                None => debug!("Frame {} over budget", analysis.frame_index),
            }
        }
    }

    let dispatch = dispatcher.shutdown().await;
    let snapshot = session.snapshot();
    {
        let mut shared = state.write().await;
        shared.snapshot = snapshot.clone();
        shared.dispatch = dispatch;
        shared.finished = true;
    }
    if let Some(server) = server {
        server.abort();
    }

    info!(
        "Processed {} frames ({} without face): {} blinks, {} microsleeps",
        snapshot.frames_processed, snapshot.faceless_frames, snapshot.blink_count, snapshot.microsleep_count
    );
    Ok(RunSummary { snapshot, dispatch })
}
