//! Alert Manager Implementation

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Alert configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Play a sound on microsleep alerts
    pub audio_enabled: bool,
    /// Minimum spacing between audio alerts (seconds)
    pub audio_cooldown_seconds: u64,
    /// Serial device of the buzzer (e.g. "/dev/ttyUSB0"); `None` disables it
    pub serial_port: Option<String>,
    /// Buzzer baud rate
    pub serial_baud: u32,
    /// Per-sink event queue length
    pub channel_capacity: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            audio_enabled: true,
            audio_cooldown_seconds: 3,
            serial_port: None,
            serial_baud: 9600,
            channel_capacity: 64,
        }
    }
}

/// Firing history of one alert kind
#[derive(Debug, Clone)]
pub struct AlertRecord {
    /// Last time this alert was fired
    pub last_fired: Instant,
    /// Number of times fired
    pub fire_count: usize,
}

/// Per-kind cooldown gate
#[derive(Debug, Clone)]
pub struct AlertManager {
    cooldown: Duration,
    records: HashMap<String, AlertRecord>,
}

impl AlertManager {
    pub fn new(cooldown: Duration) -> Self {
        info!("Creating alert manager with {:?} cooldown", cooldown);
        Self {
            cooldown,
            records: HashMap::new(),
        }
    }

    /// Manager for the audio sink of `config`
    pub fn for_audio(config: &AlertConfig) -> Self {
        Self::new(Duration::from_secs(config.audio_cooldown_seconds))
    }

    /// Check if an alert of `kind` may fire now
    pub fn should_fire(&self, kind: &str) -> bool {
        self.should_fire_at(kind, Instant::now())
    }

    pub fn should_fire_at(&self, kind: &str, now: Instant) -> bool {
        match self.records.get(kind) {
            Some(record) if now.saturating_duration_since(record.last_fired) < self.cooldown => {
                debug!("Alert {} suppressed: in cooldown period", kind);
                false
            }
            _ => true,
        }
    }

    /// Record that an alert was fired
    pub fn record_fire(&mut self, kind: &str) {
        self.record_fire_at(kind, Instant::now());
    }

    pub fn record_fire_at(&mut self, kind: &str, now: Instant) {
        let record = self
            .records
            .entry(kind.to_string())
            .or_insert(AlertRecord {
                last_fired: now,
                fire_count: 0,
            });
        record.last_fired = now;
        record.fire_count += 1;

        debug!("Alert recorded: {} (count: {})", kind, record.fire_count);
    }

    /// Check and record in one step; true if the alert fired
    pub fn try_fire_at(&mut self, kind: &str, now: Instant) -> bool {
        if self.should_fire_at(kind, now) {
            self.record_fire_at(kind, now);
            true
        } else {
            false
        }
    }

    pub fn fire_count(&self, kind: &str) -> usize {
        self.records.get(kind).map_or(0, |r| r.fire_count)
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Clear all alert records
    pub fn clear(&mut self) {
        self.records.clear();
    }
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::for_audio(&AlertConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cooldown() {
        let mut manager = AlertManager::default();
        let start = Instant::now();

        assert!(manager.should_fire_at("audio", start));
        manager.record_fire_at("audio", start);

        // Immediate duplicate should not fire
        assert!(!manager.should_fire_at("audio", start + Duration::from_millis(2999)));
        assert!(manager.should_fire_at("audio", start + Duration::from_secs(3)));
    }

    #[test]
    fn test_kinds_are_independent() {
        let mut manager = AlertManager::new(Duration::from_secs(60));
        let now = Instant::now();
        assert!(manager.try_fire_at("audio", now));
        assert!(!manager.try_fire_at("audio", now));
        assert!(manager.try_fire_at("buzzer", now));
        assert_eq!(manager.fire_count("audio"), 1);
        assert_eq!(manager.fire_count("buzzer"), 1);
    }

    #[test]
    fn test_clear() {
        let mut manager = AlertManager::default();
        manager.record_fire("audio");
        assert!(!manager.should_fire("audio"));
        manager.clear();
        assert!(manager.should_fire("audio"));
        assert_eq!(manager.fire_count("audio"), 0);
    }

    #[test]
    fn test_config_defaults() {
        let config = AlertConfig::default();
        assert!(config.audio_enabled);
        assert_eq!(config.audio_cooldown_seconds, 3);
        assert_eq!(config.serial_baud, 9600);
        assert!(config.serial_port.is_none());
    }
}
