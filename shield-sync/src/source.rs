/**
 * REMOTE SOURCE - Capability interface of the backend data client
 *
 * ROLE :
 * Everything the reconciliation layer needs from the backend, and nothing
 * more: a bulk query and a live change subscription per named collection.
 *
 * HOW IT WORKS :
 * - `query` resolves to an ordered batch of raw rows (or a SourceError)
 * - `subscribe` registers a sink; change events are pushed into it in
 *   arrival order, only for the kinds that were registered
 * - `unsubscribe` releases the channel; no event reaches the sink afterwards
 *
 * Implementations: `crate::mqtt::MqttSource` (event bus) and the in-memory
 * source of the devkit used by the tests.
 */

use crate::models::RawRecord;
use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Query on '{collection}' failed: {message}")]
    Query { collection: String, message: String },
    #[error("Timed out waiting for '{0}' rows")]
    Timeout(String),
    #[error("Broker request failed: {0}")]
    Broker(String),
    #[error("Invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("Source session closed")]
    Closed,
}

/// Bulk query parameters: `query(collection, order_by?, descending?, limit?)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub collection: String,
    pub order_by: Option<String>,
    pub descending: bool,
    pub limit: Option<usize>,
}

impl QueryRequest {
    /// Every row of the collection, in source-natural order.
    pub fn all(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            order_by: None,
            descending: false,
            limit: None,
        }
    }

    /// The `limit` most recently created rows, newest first.
    pub fn newest(collection: impl Into<String>, limit: usize) -> Self {
        Self {
            collection: collection.into(),
            order_by: Some("created_at".to_string()),
            descending: true,
            limit: Some(limit),
        }
    }
}

/// One live change, shaped like the backend's change feed
/// (`{"type":"INSERT","new":{...}}`, `{"type":"DELETE","old":{...}}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChangeEvent {
    #[serde(rename = "INSERT")]
    Insert { new: RawRecord },
    #[serde(rename = "UPDATE")]
    Update {
        new: RawRecord,
        #[serde(default)]
        old: RawRecord,
    },
    #[serde(rename = "DELETE")]
    Delete { old: RawRecord },
}

impl ChangeEvent {
    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeEvent::Insert { .. } => ChangeKind::Insert,
            ChangeEvent::Update { .. } => ChangeKind::Update,
            ChangeEvent::Delete { .. } => ChangeKind::Delete,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Which handlers a subscription registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventKinds {
    pub insert: bool,
    pub update: bool,
    pub delete: bool,
}

impl EventKinds {
    pub const ALL: Self = Self { insert: true, update: true, delete: true };
    pub const INSERT_ONLY: Self = Self { insert: true, update: false, delete: false };

    pub fn accepts(&self, kind: ChangeKind) -> bool {
        match kind {
            ChangeKind::Insert => self.insert,
            ChangeKind::Update => self.update,
            ChangeKind::Delete => self.delete,
        }
    }
}

/// Opaque handle returned by `subscribe`, consumed by `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

/// Sink the source pushes change events into.
pub type EventSink = mpsc::UnboundedSender<ChangeEvent>;

pub trait RemoteSource: Send + Sync + 'static {
    fn query(
        &self,
        request: QueryRequest,
    ) -> impl Future<Output = Result<Vec<RawRecord>, SourceError>> + Send;

    fn subscribe(
        &self,
        collection: &str,
        kinds: EventKinds,
        sink: EventSink,
    ) -> Result<SubscriptionHandle, SourceError>;

    fn unsubscribe(&self, handle: SubscriptionHandle);
}
