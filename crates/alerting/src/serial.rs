//! Serial buzzer signal
//!
//! A microcontroller on the other end of the line sounds a buzzer whenever it
//! receives a single `B` byte.

use dms::AlertEvent;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

use crate::manager::AlertConfig;
use crate::sink::{AlertSink, SinkError};

/// Byte that triggers the buzzer
pub const BUZZER_SIGNAL: u8 = b'B';

/// True for a transition into an alerting state or a microsleep alert
pub fn triggers_buzzer(event: &AlertEvent) -> bool {
    event.is_alert_entry() || matches!(event, AlertEvent::MicrosleepAlert { .. })
}

/// Writes [`BUZZER_SIGNAL`] to a serial line; disabled when no line is open
pub struct SerialBuzzerSink<W = SerialStream> {
    port: Option<W>,
    signals_sent: u64,
}

impl SerialBuzzerSink<SerialStream> {
    /// Open `config.serial_port`. A missing or unopenable device yields a
    /// disabled sink and a warning.
    pub fn open(config: &AlertConfig) -> Self {
        let Some(path) = config.serial_port.as_deref() else {
            info!("No buzzer serial port configured");
            return Self::disabled();
        };

        match tokio_serial::new(path, config.serial_baud).open_native_async() {
            Ok(port) => {
                info!("Serial connection established on {} ({} baud)", path, config.serial_baud);
                Self::with_port(port)
            }
            Err(e) => {
                warn!("Failed to connect to serial port {}: {}", path, e);
                Self::disabled()
            }
        }
    }
}

impl<W: AsyncWrite + Unpin + Send + 'static> SerialBuzzerSink<W> {
    pub fn with_port(port: W) -> Self {
        Self {
            port: Some(port),
            signals_sent: 0,
        }
    }

    pub fn disabled() -> Self {
        Self {
            port: None,
            signals_sent: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.port.is_some()
    }

    pub fn signals_sent(&self) -> u64 {
        self.signals_sent
    }

    async fn signal(&mut self) -> Result<(), SinkError> {
        let Some(port) = self.port.as_mut() else {
            return Ok(());
        };
        port.write_all(&[BUZZER_SIGNAL])
            .await
            .map_err(|e| SinkError::Serial(e.to_string()))?;
        port.flush().await.map_err(|e| SinkError::Serial(e.to_string()))?;
        self.signals_sent += 1;
        debug!("Sent buzzer signal");
        Ok(())
    }
}

impl<W: AsyncWrite + Unpin + Send + 'static> AlertSink for SerialBuzzerSink<W> {
    async fn handle(&mut self, event: AlertEvent) -> Result<(), SinkError> {
        if triggers_buzzer(&event) {
            self.signal().await
        } else {
            Ok(())
        }
    }
}
