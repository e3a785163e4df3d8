//! Microsleep Detector - Main Entry Point
//!
//! Usage: `microsleep-detector [settings.toml]`

use std::path::PathBuf;

use runtime::{init_logging, run, RuntimeError, Settings};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), RuntimeError> {
    let path = std::env::args_os().nth(1).map(PathBuf::from);
    let settings = Settings::load(path.as_deref())?;
    init_logging(settings.log_json)?;

    info!("=== Microsleep Detector v{} ===", env!("CARGO_PKG_VERSION"));
    info!(
        "Landmarks from {} at {} fps, sensitivity {:.2}",
        if settings.reads_stdin() { "stdin" } else { settings.landmark_source.as_str() },
        settings.dms.fps,
        settings.dms.sensitivity
    );

    let summary = run(settings).await?;
    info!(
        "Alert dispatch: {} queued, {} handled, {} failed, {} dropped",
        summary.dispatch.queued, summary.dispatch.handled, summary.dispatch.failed, summary.dispatch.dropped
    );
    Ok(())
}
