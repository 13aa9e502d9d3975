//! Operator notifications for recorded violations.
//!
//! Notifiers are fire-once: the recorder calls `send` at most once per track
//! and only logs a failure.

mod mqtt;

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::sync::{Arc, Mutex};

use crate::policy::Status;
use crate::TrackId;

pub use mqtt::{MqttNotifier, MqttSettings, DEFAULT_MQTT_CLIENT_ID, DEFAULT_MQTT_TOPIC};

pub const NOTIFICATION_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Notification {
    pub track_id: TrackId,
    pub numberplate: String,
    pub speed: f64,
    pub status: Status,
    /// Local wall-clock time, `YYYY-MM-DD HH:MM:SS`.
    pub timestamp: String,
}

impl Notification {
    pub fn subject(&self) -> String {
        format!("Vehicle Violation Alert: {}", self.status.label())
    }
}

pub trait Notifier: Send {
    fn name(&self) -> &'static str;

    fn send(&mut self, notification: &Notification) -> Result<()>;
}

/// Writes alerts to the log. Default when no transport is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    fn send(&mut self, n: &Notification) -> Result<()> {
        log::warn!(
            "{}: plate={} speed={} km/h track={} at {}",
            n.subject(),
            n.numberplate,
            n.speed,
            n.track_id,
            n.timestamp
        );
        Ok(())
    }
}

/// Keeps every notification in memory. Clones share the same list.
#[derive(Clone, Debug, Default)]
pub struct MemoryNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

impl Notifier for MemoryNotifier {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn send(&mut self, notification: &Notification) -> Result<()> {
        self.sent
            .lock()
            .map_err(|_| anyhow!("notifier lock poisoned"))?
            .push(notification.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_serializes_status_in_stored_form() {
        let n = Notification {
            track_id: 7,
            numberplate: "MH12AB1234".to_string(),
            speed: 648.0,
            status: Status::OverSpeed,
            timestamp: "2026-10-14 08:15:00".to_string(),
        };
        let json = serde_json::to_string(&n).expect("serialize");
        assert!(json.contains(r#""status":"OVER_SPEED""#));
        assert!(json.contains("MH12AB1234"));
        assert_eq!(n.subject(), "Vehicle Violation Alert: OVER SPEED");
    }

    #[test]
    fn memory_notifier_clones_share_history() {
        let handle = MemoryNotifier::new();
        let mut notifier = handle.clone();
        let n = Notification {
            track_id: 1,
            numberplate: "A1".to_string(),
            speed: 10.0,
            status: Status::Blacklisted,
            timestamp: "2026-10-14 08:15:00".to_string(),
        };
        notifier.send(&n).unwrap();
        assert_eq!(handle.sent(), vec![n]);
    }
}
