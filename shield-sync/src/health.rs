use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Debug, Serialize)]
pub struct DashboardHealth {
    pub uptime_seconds: u64,
    pub started_at: String,
    pub mqtt_status: String,
    pub mqtt_reconnects: u32,
    pub collections: Vec<CollectionHealth>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionHealth {
    pub name: String,
    pub size: usize,
    pub loading: bool,
}

/// Connection status of the shared source session, updated by its event loop.
#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    started_at: OffsetDateTime,
    mqtt_reconnects: Arc<AtomicU32>,
    mqtt_status: Arc<Mutex<String>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            started_at: OffsetDateTime::now_utc(),
            mqtt_reconnects: Arc::new(AtomicU32::new(0)),
            mqtt_status: Arc::new(Mutex::new("connecting".to_string())),
        }
    }

    pub fn mark_mqtt_connected(&self) {
        *self.mqtt_status.lock() = "connected".to_string();
    }

    pub fn mark_mqtt_disconnected(&self) {
        *self.mqtt_status.lock() = "disconnected".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.mqtt_status.lock() = "reconnecting".to_string();
    }

    pub fn mqtt_status(&self) -> String {
        self.mqtt_status.lock().clone()
    }

    pub fn reconnects(&self) -> u32 {
        self.mqtt_reconnects.load(Ordering::Relaxed)
    }

    pub fn get_health(&self, collections: Vec<CollectionHealth>) -> DashboardHealth {
        DashboardHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            started_at: self.started_at.format(&Rfc3339).unwrap_or_default(),
            mqtt_status: self.mqtt_status(),
            mqtt_reconnects: self.reconnects(),
            collections,
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        let tracker = HealthTracker::new();
        assert_eq!(tracker.mqtt_status(), "connecting");

        tracker.mark_mqtt_connected();
        assert_eq!(tracker.mqtt_status(), "connected");

        tracker.increment_reconnects();
        tracker.increment_reconnects();
        assert_eq!(tracker.mqtt_status(), "reconnecting");
        assert_eq!(tracker.reconnects(), 2);

        // clones share the same counters
        let other = tracker.clone();
        other.mark_mqtt_disconnected();
        assert_eq!(tracker.mqtt_status(), "disconnected");
    }

    #[test]
    fn test_health_report() {
        let tracker = HealthTracker::new();
        let health = tracker.get_health(vec![CollectionHealth { name: "units".into(), size: 3, loading: false }]);
        assert_eq!(health.mqtt_reconnects, 0);
        assert_eq!(health.collections.len(), 1);
        assert!(!health.started_at.is_empty());
    }
}
