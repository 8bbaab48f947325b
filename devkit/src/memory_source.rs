/*!
In-memory remote source for development without a backend

Implements `RemoteSource` on plain tables. Tests seed rows, decide which
queries fail, hold queries to simulate a slow backend, and push change events
to the live subscriptions.
*/

use shield_sync::models::RawRecord;
use shield_sync::source::{
    ChangeEvent, EventKinds, EventSink, QueryRequest, RemoteSource, SourceError, SubscriptionHandle,
};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct MockSubscription {
    pub handle: SubscriptionHandle,
    pub collection: String,
    pub kinds: EventKinds,
}

struct Subscriber {
    info: MockSubscription,
    sink: EventSink,
}

/// In-memory backend implementing `RemoteSource`
#[derive(Clone)]
pub struct MemorySource {
    tables: Arc<Mutex<HashMap<String, Vec<RawRecord>>>>,
    failing: Arc<Mutex<HashSet<String>>>,
    queries: Arc<Mutex<Vec<QueryRequest>>>,
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    released: Arc<Mutex<Vec<SubscriptionHandle>>>,
    gate: Arc<watch::Sender<bool>>,
    next_handle: Arc<AtomicU64>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemorySource {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            tables: Arc::new(Mutex::new(HashMap::new())),
            failing: Arc::new(Mutex::new(HashSet::new())),
            queries: Arc::new(Mutex::new(Vec::new())),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            released: Arc::new(Mutex::new(Vec::new())),
            gate: Arc::new(gate),
            next_handle: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Replaces the stored rows of a collection (stored order = natural order)
    pub fn seed(&self, collection: &str, rows: Vec<RawRecord>) -> &Self {
        log::info!("🌱 [MOCK] Seeded {} rows into {}", rows.len(), collection);
        locked(&self.tables).insert(collection.to_string(), rows);
        self
    }

    /// Every following query on this collection fails
    pub fn fail_queries(&self, collection: &str) -> &Self {
        locked(&self.failing).insert(collection.to_string());
        self
    }

    /// Queries wait until `release_queries` is called
    pub fn hold_queries(&self) {
        self.gate.send_replace(false);
    }

    pub fn release_queries(&self) {
        self.gate.send_replace(true);
    }

    /// Queries received so far (for assertions)
    pub fn queries(&self) -> Vec<QueryRequest> {
        locked(&self.queries).clone()
    }

    /// Live subscriptions, optionally restricted to one collection
    pub fn subscriptions(&self, collection: Option<&str>) -> Vec<MockSubscription> {
        locked(&self.subscribers)
            .iter()
            .filter(|s| collection.map_or(true, |c| s.info.collection == c))
            .map(|s| s.info.clone())
            .collect()
    }

    /// Handles passed to `unsubscribe`, in call order
    pub fn released(&self) -> Vec<SubscriptionHandle> {
        locked(&self.released).clone()
    }

    /// Pushes a change event to every subscriber of the collection that
    /// registered its kind. Returns the number of sinks reached.
    pub fn emit(&self, collection: &str, event: ChangeEvent) -> usize {
        let kind = event.kind();
        let subscribers = locked(&self.subscribers);
        let mut delivered = 0;
        for subscriber in subscribers
            .iter()
            .filter(|s| s.info.collection == collection && s.info.kinds.accepts(kind))
        {
            if subscriber.sink.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        log::info!("📨 [MOCK] {:?} on {} -> {} subscriber(s)", kind, collection, delivered);
        delivered
    }

    pub fn emit_insert(&self, collection: &str, row: RawRecord) -> usize {
        self.emit(collection, ChangeEvent::Insert { new: row })
    }

    pub fn emit_update(&self, collection: &str, row: RawRecord) -> usize {
        self.emit(collection, ChangeEvent::Update { new: row, old: RawRecord::new() })
    }

    pub fn emit_delete(&self, collection: &str, old: RawRecord) -> usize {
        self.emit(collection, ChangeEvent::Delete { old })
    }

    /// Reset tables, failures, recorded queries and subscriptions
    pub fn clear(&self) {
        locked(&self.tables).clear();
        locked(&self.failing).clear();
        locked(&self.queries).clear();
        locked(&self.subscribers).clear();
        locked(&self.released).clear();
        self.release_queries();
    }

    fn select(&self, request: &QueryRequest) -> Vec<RawRecord> {
        let mut rows = locked(&self.tables)
            .get(&request.collection)
            .cloned()
            .unwrap_or_default();

        if let Some(field) = &request.order_by {
            rows.sort_by(|a, b| compare_field(a.get(field), b.get(field)));
            if request.descending {
                rows.reverse();
            }
        }
        if let Some(limit) = request.limit {
            rows.truncate(limit);
        }
        rows
    }
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

/// Orders numbers numerically, everything else by its text; missing values first
fn compare_field(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(x), Some(y)) => text(x).cmp(&text(y)),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl RemoteSource for MemorySource {
    async fn query(&self, request: QueryRequest) -> Result<Vec<RawRecord>, SourceError> {
        locked(&self.queries).push(request.clone());

        let mut gate = self.gate.subscribe();
        gate.wait_for(|open| *open).await.map_err(|_| SourceError::Closed)?;

        if locked(&self.failing).contains(&request.collection) {
            log::warn!("💥 [MOCK] Query on {} failed", request.collection);
            return Err(SourceError::Query {
                collection: request.collection,
                message: "simulated failure".to_string(),
            });
        }

        let rows = self.select(&request);
        log::info!("📤 [MOCK] Query on {} -> {} rows", request.collection, rows.len());
        Ok(rows)
    }

    fn subscribe(
        &self,
        collection: &str,
        kinds: EventKinds,
        sink: EventSink,
    ) -> Result<SubscriptionHandle, SourceError> {
        let handle = SubscriptionHandle(self.next_handle.fetch_add(1, AtomicOrdering::Relaxed));
        locked(&self.subscribers).push(Subscriber {
            info: MockSubscription { handle, collection: collection.to_string(), kinds },
            sink,
        });
        log::info!("📥 [MOCK] Subscribed to {} ({:?})", collection, kinds);
        Ok(handle)
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        locked(&self.subscribers).retain(|s| s.info.handle != handle);
        locked(&self.released).push(handle);
        log::info!("📤 [MOCK] Released subscription {:?}", handle);
    }
}
