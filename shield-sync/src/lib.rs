/*!
# Shield Sync - live state behind the Community Shield dashboard

Keeps local collections of incidents, patrol units and system logs in sync
with the backend:
- one bulk query per collection on start, then live insert/update/delete events
- bounded, ordered collections (50 newest incidents, last 50 log lines, all units)
- transformers that never fail on malformed rows
- a single shared MQTT session feeding every collection
*/

pub mod config;
pub mod health;
pub mod hooks;
pub mod models;
pub mod mqtt;
pub mod reconcile;
pub mod source;
pub mod state;
pub mod stats;
pub mod transform;

pub use config::{load_config, ShieldConfig};
pub use hooks::LiveFeeds;
pub use models::{Incident, LogEntry, RawRecord, Record, Unit};
pub use mqtt::MqttSource;
pub use reconcile::{Snapshot, SyncHandle, SyncPolicy};
pub use source::{ChangeEvent, RemoteSource, SourceError};
