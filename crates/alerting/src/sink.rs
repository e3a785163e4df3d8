//! Notification sink seam

use std::future::Future;

use dms::AlertEvent;
use thiserror::Error;

/// Sink failure; logged by the dispatcher, never returned to the session
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial port error: {0}")]
    Serial(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Sink disabled: {0}")]
    Disabled(String),
}

/// One-way consumer of alert events.
///
/// Each sink runs on its own dispatcher worker, so a slow `handle` only
/// delays that sink's queue.
pub trait AlertSink: Send + 'static {
    fn handle(&mut self, event: AlertEvent) -> impl Future<Output = Result<(), SinkError>> + Send;
}
