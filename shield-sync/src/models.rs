use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw row as delivered by the remote source: field name -> value of unknown shape.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

/// Incident as rendered on the map and in the live feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub location: String,
    pub lat: f64,
    pub lng: f64,
    pub severity: String,       // Low, Medium, High, Critical
    pub timestamp: String,      // created_at, kept verbatim
    pub source: String,         // Radio, Social, Sensor, Simulator
    pub status: String,         // Active, Dispatched, Resolved
}

/// Patrol unit position and availability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,         // Idle, EnRoute, Busy
    pub lat: f64,
    pub lng: f64,
}

/// One formatted log line: `[HH:MM:SS] message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogEntry(pub String);

impl LogEntry {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical entity held by a reconciled collection.
///
/// `from_raw` never fails: malformed fields degrade to zero or empty values.
pub trait Record: Clone + Send + Sync + 'static {
    fn from_raw(raw: &RawRecord) -> Self;

    /// Identity used to match update/delete events. `None` for entries that
    /// are never matched (log lines).
    fn record_id(&self) -> Option<&str>;
}
