//! Audible microsleep alert

use std::time::Instant;

use dms::AlertEvent;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::manager::{AlertConfig, AlertManager};
use crate::sink::{AlertSink, SinkError};

const AUDIO_ALERT: &str = "audio";

/// Platform alert sound, rate limited by an [`AlertManager`]
pub struct AudioSink {
    enabled: bool,
    manager: AlertManager,
}

impl AudioSink {
    pub fn new(config: &AlertConfig) -> Self {
        Self {
            enabled: config.audio_enabled,
            manager: AlertManager::for_audio(config),
        }
    }

    /// Whether `event` should sound at `now`; records the firing
    pub fn should_sound(&mut self, event: &AlertEvent, now: Instant) -> bool {
        self.enabled
            && matches!(event, AlertEvent::MicrosleepAlert { .. })
            && self.manager.try_fire_at(AUDIO_ALERT, now)
    }

    pub fn fire_count(&self) -> usize {
        self.manager.fire_count(AUDIO_ALERT)
    }
}

impl AlertSink for AudioSink {
    async fn handle(&mut self, event: AlertEvent) -> Result<(), SinkError> {
        if !self.should_sound(&event, Instant::now()) {
            return Ok(());
        }
        info!("Playing microsleep alert");
        play_alert_sound().await
    }
}

/// Play the platform alert sound and wait for it to finish
pub async fn play_alert_sound() -> Result<(), SinkError> {
    if cfg!(target_os = "macos") {
        run(Command::new("afplay").arg("/System/Library/Sounds/Sosumi.aiff")).await
    } else if cfg!(target_os = "windows") {
        run(Command::new("powershell").args(["-NoProfile", "-Command", "[console]::beep(1000,1000)"])).await
    } else {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(b"\x07").await?;
        stdout.flush().await?;
        Ok(())
    }
}

async fn run(command: &mut Command) -> Result<(), SinkError> {
    let status = command.status().await?;
    if status.success() {
        Ok(())
    } else {
        debug!("Alert sound command exited with {}", status);
        Err(SinkError::Transport(format!("alert sound exited with {}", status)))
    }
}
