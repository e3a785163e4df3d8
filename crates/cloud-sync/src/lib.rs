//! Cloud Synchronization Module
//!
//! Telemetry upload of the driver's alert status:
//! - Primary HTTP POST to the fleet server
//! - Token-authenticated device endpoint as fallback
//! - Runs as an [`AlertSink`] on its own dispatcher worker

use std::time::Duration;

use alerting::{AlertSink, SinkError};
use chrono::{DateTime, Utc};
use dms::{AlertEvent, AlertState, ReportStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Primary URL value that means "not configured"
pub const PLACEHOLDER_URL: &str = "dummy_url";

/// Cloud sync error types
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Server rejected report with status {0}")]
    Status(u16),

    #[error("Primary server not configured")]
    NotConfigured,

    #[error("Fallback token missing")]
    MissingToken,
}

impl From<CloudError> for SinkError {
    fn from(err: CloudError) -> Self {
        SinkError::Transport(err.to_string())
    }
}

/// Cloud sync configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    /// Fleet server endpoint; empty or `dummy_url` goes straight to the fallback
    pub server_url: String,
    pub request_timeout_ms: u64,
    /// Base URL of the device cloud
    pub fallback_base_url: String,
    /// `X-Auth-Token` for the device cloud
    pub fallback_token: Option<String>,
    pub device_label: String,
    pub fallback_timeout_ms: u64,
    pub driver_id: String,
    pub vehicle_id: String,
    pub route_id: String,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:5001/vision".to_string(),
            request_timeout_ms: 3000,
            fallback_base_url: "https://industrial.api.ubidots.com".to_string(),
            fallback_token: None,
            device_label: "esp32-cam".to_string(),
            fallback_timeout_ms: 5000,
            driver_id: "unknown".to_string(),
            vehicle_id: "unknown".to_string(),
            route_id: "unknown".to_string(),
        }
    }
}

impl CloudConfig {
    pub fn primary_configured(&self) -> bool {
        !self.server_url.trim().is_empty() && self.server_url != PLACEHOLDER_URL
    }

    pub fn fallback_url(&self) -> String {
        format!(
            "{}/api/v1.6/devices/{}",
            self.fallback_base_url.trim_end_matches('/'),
            self.device_label
        )
    }
}

/// Report sent to the fleet server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerPayload {
    pub driver_id: String,
    pub timestamp: DateTime<Utc>,
    pub vehicle_id: String,
    pub route_id: String,
    pub status_alert: ReportStatus,
}

/// Report sent to the device cloud
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudPayload {
    pub driver_id: String,
    pub vehicle_id: String,
    pub route_id: String,
    pub timestamp: DateTime<Utc>,
    /// 1 only while in microsleep
    pub status_alert: u8,
}

impl CloudPayload {
    pub fn from_report(report: &ServerPayload, state: AlertState) -> Self {
        Self {
            driver_id: report.driver_id.clone(),
            vehicle_id: report.vehicle_id.clone(),
            route_id: report.route_id.clone(),
            timestamp: report.timestamp,
            status_alert: u8::from(state == AlertState::Microsleep),
        }
    }
}

/// Where a report ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Primary,
    Fallback,
    /// Both paths unavailable; nothing was sent
    Skipped,
}

/// HTTP telemetry client
pub struct TelemetryClient {
    config: CloudConfig,
    http: reqwest::Client,
    delivered: u64,
}

impl TelemetryClient {
    pub fn new(config: CloudConfig) -> Result<Self, CloudError> {
        let http = reqwest::Client::builder().build()?;
        info!(
            "Telemetry client for driver {} (vehicle {}, route {})",
            config.driver_id, config.vehicle_id, config.route_id
        );
        Ok(Self {
            config,
            http,
            delivered: 0,
        })
    }

    pub fn config(&self) -> &CloudConfig {
        &self.config
    }

    pub fn server_payload(&self, status: ReportStatus, timestamp: DateTime<Utc>) -> ServerPayload {
        ServerPayload {
            driver_id: self.config.driver_id.clone(),
            timestamp,
            vehicle_id: self.config.vehicle_id.clone(),
            route_id: self.config.route_id.clone(),
            status_alert: status,
        }
    }

    /// Send one report, falling back to the device cloud when the primary
    /// is unset or fails.
    pub async fn send_report(&mut self, state: AlertState, timestamp: DateTime<Utc>) -> Delivery {
        let payload = self.server_payload(ReportStatus::from_state(state), timestamp);
        debug!(
            "Report {} | driver {} | status {}",
            payload.timestamp,
            payload.driver_id,
            payload.status_alert.as_str()
        );

        match self.send_primary(&payload).await {
            Ok(()) => {
                self.delivered += 1;
                return Delivery::Primary;
            }
            Err(CloudError::NotConfigured) => {
                debug!("Primary server not configured, using fallback");
            }
            Err(e) => {
                warn!("Primary server unavailable: {}", e);
            }
        }

        let fallback = CloudPayload::from_report(&payload, state);
        match self.send_fallback(&fallback).await {
            Ok(()) => {
                self.delivered += 1;
                Delivery::Fallback
            }
            Err(CloudError::MissingToken) => {
                warn!("Fallback token not found, skipping upload");
                Delivery::Skipped
            }
            Err(e) => {
                warn!("Fallback upload failed: {}", e);
                Delivery::Skipped
            }
        }
    }

    async fn send_primary(&self, payload: &ServerPayload) -> Result<(), CloudError> {
        if !self.config.primary_configured() {
            return Err(CloudError::NotConfigured);
        }

        let response = self
            .http
            .post(&self.config.server_url)
            .timeout(Duration::from_millis(self.config.request_timeout_ms))
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CloudError::Status(status.as_u16()));
        }
        debug!("Report accepted by server ({})", status);
        Ok(())
    }

    async fn send_fallback(&self, payload: &CloudPayload) -> Result<(), CloudError> {
        let token = self
            .config
            .fallback_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(CloudError::MissingToken)?;

        let response = self
            .http
            .post(self.config.fallback_url())
            .header("X-Auth-Token", token)
            .timeout(Duration::from_millis(self.config.fallback_timeout_ms))
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CloudError::Status(status.as_u16()));
        }
        debug!("Report accepted by device cloud ({})", status);
        Ok(())
    }

    /// Reports delivered by either path
    pub fn delivered(&self) -> u64 {
        self.delivered
    }
}

impl AlertSink for TelemetryClient {
    async fn handle(&mut self, event: AlertEvent) -> Result<(), SinkError> {
        let AlertEvent::Report { state, .. } = event else {
            return Ok(());
        };
        match self.send_report(state, Utc::now()).await {
            Delivery::Skipped => Err(SinkError::Disabled("no telemetry endpoint reachable".into())),
            Delivery::Primary | Delivery::Fallback => Ok(()),
        }
    }
}
