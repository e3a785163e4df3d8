//! Alerting System
//!
//! Turns session alert events into side effects: cooldown management, a
//! background dispatcher with one worker per sink, the audio alert and the
//! serial buzzer signal.

mod audio;
mod dispatcher;
mod manager;
mod serial;
mod sink;

pub use audio::{play_alert_sound, AudioSink};
pub use dispatcher::{AlertDispatcher, DispatchMetrics, DispatchSnapshot};
pub use manager::{AlertConfig, AlertManager, AlertRecord};
pub use serial::{triggers_buzzer, SerialBuzzerSink, BUZZER_SIGNAL};
pub use sink::{AlertSink, SinkError};
