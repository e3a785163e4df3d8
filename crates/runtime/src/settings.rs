//! Service settings
//!
//! Layered with the `config` crate: built-in defaults, then an optional TOML
//! file, then `MICROSLEEP__*` environment variables (`__` separates nested
//! keys, e.g. `MICROSLEEP__DMS__SENSITIVITY=0.6`).

use std::path::Path;

use alerting::AlertConfig;
use cloud_sync::CloudConfig;
use config::{Config, Environment, File, FileFormat};
use dms::DmsConfig;
use serde::{Deserialize, Serialize};

use crate::RuntimeError;

pub const ENV_PREFIX: &str = "MICROSLEEP";

/// Landmark source meaning standard input
pub const STDIN_SOURCE: &str = "-";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub dms: DmsConfig,
    pub alerts: AlertConfig,
    pub cloud: CloudConfig,

    /// JSON-lines landmark file, or `-` for stdin
    pub landmark_source: String,

    /// Bind address of the status server
    pub status_addr: String,

    pub log_json: bool,

    /// Sleep out the rest of each frame interval
    pub pace_frames: bool,

    /// Upload reports through the telemetry sink
    pub telemetry_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dms: DmsConfig::default(),
            alerts: AlertConfig::default(),
            cloud: CloudConfig::default(),
            landmark_source: STDIN_SOURCE.to_string(),
            status_addr: "0.0.0.0:8080".to_string(),
            log_json: false,
            pace_frames: true,
            telemetry_enabled: true,
        }
    }
}

impl Settings {
    /// Load defaults, the optional file and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, RuntimeError> {
        Self::load_with(path, Self::environment())
    }

    /// Load with an explicit environment source
    pub fn load_with(path: Option<&Path>, env: Environment) -> Result<Self, RuntimeError> {
        let mut builder = Config::builder().add_source(Config::try_from(&Settings::default())?);
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }

        let settings: Settings = builder.add_source(env).build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
    }

    pub fn validate(&self) -> Result<(), RuntimeError> {
        self.dms.validate()?;
        if self.alerts.channel_capacity == 0 {
            return Err(RuntimeError::Settings(
                "alerts.channel_capacity must be at least 1".into(),
            ));
        }
        if self.landmark_source.trim().is_empty() {
            return Err(RuntimeError::Settings("landmark_source must not be empty".into()));
        }
        Ok(())
    }

    pub fn reads_stdin(&self) -> bool {
        self.landmark_source == STDIN_SOURCE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::environment().source(Some(map))
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::load_with(None, env(&[])).unwrap();
        assert_eq!(settings, Settings::default());
        assert!(settings.reads_stdin());
        assert_eq!(settings.dms.fps, 30.0);
        assert_eq!(settings.alerts.serial_port, None);
    }

    #[test]
    fn test_environment_overrides() {
        let settings = Settings::load_with(
            None,
            env(&[
                ("MICROSLEEP__DMS__SENSITIVITY", "0.6"),
                ("MICROSLEEP__ALERTS__AUDIO_ENABLED", "false"),
                ("MICROSLEEP__CLOUD__DRIVER_ID", "D-17"),
                ("MICROSLEEP__PACE_FRAMES", "false"),
            ]),
        )
        .unwrap();
        assert_eq!(settings.dms.sensitivity, 0.6);
        assert!(!settings.alerts.audio_enabled);
        assert_eq!(settings.cloud.driver_id, "D-17");
        assert!(!settings.pace_frames);
    }

    #[test]
    fn test_file_layer() {
        let path = std::env::temp_dir().join(format!("microsleep-settings-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "landmark_source = \"session.jsonl\"\n\n[dms]\nmicrosleep_frames = 12\n\n[alerts]\nserial_port = \"/dev/ttyUSB0\""
        )
        .unwrap();

        let settings = Settings::load_with(Some(path.as_path()), env(&[("MICROSLEEP__DMS__MICROSLEEP_FRAMES", "10")]));
        std::fs::remove_file(&path).ok();
        let settings = settings.unwrap();

        assert_eq!(settings.landmark_source, "session.jsonl");
        assert_eq!(settings.alerts.serial_port.as_deref(), Some("/dev/ttyUSB0"));
        // environment wins over the file
        assert_eq!(settings.dms.microsleep_frames, 10);
        assert_eq!(settings.dms.consec_frames, 2);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let result = Settings::load_with(None, env(&[("MICROSLEEP__DMS__SENSITIVITY", "1.5")]));
        assert!(matches!(result, Err(RuntimeError::Dms(_))));

        let result = Settings::load_with(None, env(&[("MICROSLEEP__ALERTS__CHANNEL_CAPACITY", "0")]));
        assert!(matches!(result, Err(RuntimeError::Settings(_))));
    }
}
