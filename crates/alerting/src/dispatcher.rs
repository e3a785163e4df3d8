//! Background fan-out of alert events to sinks
//!
//! One bounded channel and one spawned worker per sink. The frame loop only
//! calls [`AlertDispatcher::dispatch`], which never waits: a full queue drops
//! the event for that sink and counts it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dms::AlertEvent;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::sink::AlertSink;

/// Dispatcher counters
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    pub queued: AtomicU64,
    pub dropped: AtomicU64,
    pub handled: AtomicU64,
    pub failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSnapshot {
    pub queued: u64,
    pub dropped: u64,
    pub handled: u64,
    pub failed: u64,
}

impl DispatchMetrics {
    pub fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            queued: self.queued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            handled: self.handled.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

struct SinkHandle {
    name: String,
    tx: mpsc::Sender<AlertEvent>,
    worker: JoinHandle<()>,
}

/// Fans events out to independently running sinks
pub struct AlertDispatcher {
    capacity: usize,
    sinks: Vec<SinkHandle>,
    metrics: Arc<DispatchMetrics>,
}

impl AlertDispatcher {
    /// Must be created inside a Tokio runtime before [`spawn`](Self::spawn)
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            sinks: Vec::new(),
            metrics: Arc::new(DispatchMetrics::default()),
        }
    }

    /// Start a worker for `sink`
    pub fn spawn<S: AlertSink>(&mut self, name: impl Into<String>, mut sink: S) {
        let name = name.into();
        let (tx, mut rx) = mpsc::channel::<AlertEvent>(self.capacity);
        let metrics = Arc::clone(&self.metrics);
        let worker_name = name.clone();

        let worker = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match sink.handle(event).await {
                    Ok(()) => {
                        metrics.handled.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        metrics.failed.fetch_add(1, Ordering::Relaxed);
                        warn!("Sink {} failed: {}", worker_name, e);
                    }
                }
            }
            debug!("Sink {} worker stopped", worker_name);
        });

        info!("Alert sink started: {}", name);
        self.sinks.push(SinkHandle { name, tx, worker });
    }

    /// Queue `events` on every sink without waiting
    pub fn dispatch(&self, events: &[AlertEvent]) {
        for event in events {
            for sink in &self.sinks {
                match sink.tx.try_send(event.clone()) {
                    Ok(()) => {
                        self.metrics.queued.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
                        warn!("Sink {} queue full, event dropped", sink.name);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
                        warn!("Sink {} is gone, event dropped", sink.name);
                    }
                }
            }
        }
    }

    pub fn sink_names(&self) -> Vec<&str> {
        self.sinks.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn metrics(&self) -> DispatchSnapshot {
        self.metrics.snapshot()
    }

    /// Close every queue and wait for the workers to drain them
    pub async fn shutdown(self) -> DispatchSnapshot {
        let mut workers = Vec::with_capacity(self.sinks.len());
        for sink in self.sinks {
            drop(sink.tx);
            workers.push((sink.name, sink.worker));
        }
        for (name, worker) in workers {
            if let Err(e) = worker.await {
                warn!("Sink {} worker aborted: {}", name, e);
            }
        }
        info!("Alert dispatcher stopped");
        self.metrics.snapshot()
    }
}
