/**
 * MQTT SOURCE - Backend data client over the event bus
 *
 * ROLE :
 * Concrete `RemoteSource` used by the dashboard. One session per process,
 * shared by every live collection (see `MqttSource::shared`).
 *
 * HOW IT WORKS :
 * - Bulk query: publish on `{prefix}/{collection}/query@v1` with a request_id,
 *   wait for the matching reply on `{prefix}/{collection}/rows@v1`
 * - Live changes: `{prefix}/{collection}/changes@v1`, fanned out to every
 *   subscription registered for that collection and that change kind
 * - The broker subscription is taken by the first subscriber of a collection
 *   and released with the last one
 * - After each (re)connection every active topic is subscribed again
 *
 * TOPICS :
 * Publishes: {prefix}/{collection}/query@v1
 * Listens:   {prefix}/{collection}/rows@v1, {prefix}/{collection}/changes@v1
 */

use crate::config::MqttConf;
use crate::health::HealthTracker;
use crate::models::RawRecord;
use crate::source::{
    ChangeEvent, EventKinds, EventSink, QueryRequest, RemoteSource, SourceError, SubscriptionHandle,
};
use crate::state::Shared;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::oneshot;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

static SHARED_SOURCE: OnceLock<Arc<MqttSource>> = OnceLock::new();

/// Query sent to the backend
#[derive(Debug, Serialize)]
struct QueryMessage<'a> {
    request_id: &'a str,
    order_by: Option<&'a str>,
    descending: bool,
    limit: Option<usize>,
}

/// Backend reply to a query
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum RowsResponse {
    #[serde(rename = "success")]
    Success {
        request_id: String,
        #[serde(default)]
        rows: Vec<RawRecord>,
    },
    #[serde(rename = "error")]
    Error {
        request_id: String,
        error: String,
    },
}

impl RowsResponse {
    fn request_id(&self) -> &str {
        match self {
            RowsResponse::Success { request_id, .. } => request_id,
            RowsResponse::Error { request_id, .. } => request_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Rows,
    Changes,
}

impl Channel {
    fn leaf(self) -> &'static str {
        match self {
            Channel::Rows => "rows@v1",
            Channel::Changes => "changes@v1",
        }
    }
}

/// Topic carrying the live changes of a collection, for publishers of change events.
pub fn changes_topic(prefix: &str, collection: &str) -> String {
    format!("{}/{}/{}", prefix, collection, Channel::Changes.leaf())
}

struct Route {
    handle: SubscriptionHandle,
    kinds: EventKinds,
    sink: EventSink,
}

/// Routing state shared with the event loop task
#[derive(Clone, Default)]
struct Routes {
    /// request_id -> waiting query
    pending: Shared<HashMap<String, oneshot::Sender<RowsResponse>>>,
    /// collection -> live subscriptions
    changes: Shared<HashMap<String, Vec<Route>>>,
    /// collections whose rows topic is already subscribed
    rows: Shared<HashSet<String>>,
}

/// Owns one entry of the pending map; the entry goes away with the query,
/// whether it completes, times out or is dropped mid-flight.
struct PendingQuery<'a> {
    pending: &'a Shared<HashMap<String, oneshot::Sender<RowsResponse>>>,
    request_id: String,
}

impl<'a> PendingQuery<'a> {
    fn register(
        pending: &'a Shared<HashMap<String, oneshot::Sender<RowsResponse>>>,
    ) -> (Self, oneshot::Receiver<RowsResponse>) {
        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        pending.lock().insert(request_id.clone(), tx);
        (Self { pending, request_id }, rx)
    }
}

impl Drop for PendingQuery<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.request_id);
    }
}

pub struct MqttSource {
    client: AsyncClient,
    prefix: String,
    query_timeout: Duration,
    routes: Routes,
    next_handle: AtomicU64,
    health: HealthTracker,
}

impl MqttSource {
    /// Opens a new session and spawns its event loop. Must run inside a tokio runtime.
    pub fn connect(conf: &MqttConf, health: HealthTracker) -> Arc<Self> {
        let mut opts = MqttOptions::new(&conf.client_id, &conf.host, conf.port);
        opts.set_keep_alive(Duration::from_secs(conf.keep_alive_secs.max(5)));

        let (client, eventloop) = AsyncClient::new(opts, 64);
        let routes = Routes::default();

        let source = Arc::new(Self {
            client: client.clone(),
            prefix: conf.topic_prefix.clone(),
            query_timeout: Duration::from_secs(conf.query_timeout_secs.max(1)),
            routes: routes.clone(),
            next_handle: AtomicU64::new(1),
            health: health.clone(),
        });

        spawn_event_loop(client, eventloop, conf.topic_prefix.clone(), routes, health);
        info!("[mqtt] session {} -> {}:{}", conf.client_id, conf.host, conf.port);
        source
    }

    /// Process-wide session: connects on first call, later calls reuse it.
    pub fn shared(conf: &MqttConf, health: HealthTracker) -> Arc<Self> {
        SHARED_SOURCE.get_or_init(|| Self::connect(conf, health)).clone()
    }

    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    fn topic(&self, collection: &str, leaf: &str) -> String {
        format!("{}/{}/{}", self.prefix, collection, leaf)
    }

    async fn ensure_rows_subscription(&self, collection: &str) -> Result<(), SourceError> {
        if self.routes.rows.lock().contains(collection) {
            return Ok(());
        }
        self.client
            .subscribe(self.topic(collection, Channel::Rows.leaf()), QoS::AtLeastOnce)
            .await
            .map_err(|e| SourceError::Broker(e.to_string()))?;
        self.routes.rows.lock().insert(collection.to_string());
        Ok(())
    }
}

impl RemoteSource for MqttSource {
    async fn query(&self, request: QueryRequest) -> Result<Vec<RawRecord>, SourceError> {
        self.ensure_rows_subscription(&request.collection).await?;

        // entry removed on every exit path, including an aborted task
        let (guard, rx) = PendingQuery::register(&self.routes.pending);
        let request_id = guard.request_id.as_str();

        let payload = serde_json::to_string(&QueryMessage {
            request_id,
            order_by: request.order_by.as_deref(),
            descending: request.descending,
            limit: request.limit,
        })?;

        self.client
            .publish(self.topic(&request.collection, "query@v1"), QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| SourceError::Broker(e.to_string()))?;
        debug!("[mqtt] query {} sent for {}", request_id, request.collection);

        match timeout(self.query_timeout, rx).await {
            Ok(Ok(RowsResponse::Success { rows, .. })) => Ok(rows),
            Ok(Ok(RowsResponse::Error { error, .. })) => Err(SourceError::Query {
                collection: request.collection,
                message: error,
            }),
            // event loop dropped the sender
            Ok(Err(_)) => Err(SourceError::Closed),
            Err(_) => Err(SourceError::Timeout(request.collection)),
        }
    }

    fn subscribe(
        &self,
        collection: &str,
        kinds: EventKinds,
        sink: EventSink,
    ) -> Result<SubscriptionHandle, SourceError> {
        let handle = SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let mut changes = self.routes.changes.lock();

        let first = changes.get(collection).map_or(true, Vec::is_empty);
        if first {
            self.client
                .try_subscribe(self.topic(collection, Channel::Changes.leaf()), QoS::AtLeastOnce)
                .map_err(|e| SourceError::Broker(e.to_string()))?;
        }
        changes
            .entry(collection.to_string())
            .or_default()
            .push(Route { handle, kinds, sink });
        debug!("[mqtt] subscription {:?} on {}", handle, collection);
        Ok(handle)
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        let mut changes = self.routes.changes.lock();
        let mut emptied = None;

        for (collection, routes) in changes.iter_mut() {
            let before = routes.len();
            routes.retain(|route| route.handle != handle);
            if routes.len() != before {
                if routes.is_empty() {
                    emptied = Some(collection.clone());
                }
                break;
            }
        }

        if let Some(collection) = emptied {
            changes.remove(&collection);
            if let Err(e) = self.client.try_unsubscribe(self.topic(&collection, Channel::Changes.leaf())) {
                warn!("[mqtt] unsubscribe {} failed: {}", collection, e);
            }
        }
    }
}

/// Splits `{prefix}/{collection}/{leaf}` into its collection and channel.
fn parse_topic<'a>(prefix: &str, topic: &'a str) -> Option<(&'a str, Channel)> {
    let rest = topic.strip_prefix(prefix)?.strip_prefix('/')?;
    let (collection, leaf) = rest.rsplit_once('/')?;
    if collection.is_empty() {
        return None;
    }
    match leaf {
        "rows@v1" => Some((collection, Channel::Rows)),
        "changes@v1" => Some((collection, Channel::Changes)),
        _ => None,
    }
}

fn dispatch(routes: &Routes, prefix: &str, topic: &str, payload: &[u8]) {
    let Some((collection, channel)) = parse_topic(prefix, topic) else {
        debug!("[mqtt] ignoring message on {}", topic);
        return;
    };

    match channel {
        Channel::Rows => match serde_json::from_slice::<RowsResponse>(payload) {
            Ok(response) => {
                let sender = routes.pending.lock().remove(response.request_id());
                match sender {
                    Some(sender) => {
                        let _ = sender.send(response);
                    }
                    None => debug!("[mqtt] reply for unknown request {}", response.request_id()),
                }
            }
            Err(e) => warn!("[mqtt] invalid rows payload on {}: {}", topic, e),
        },
        Channel::Changes => match serde_json::from_slice::<ChangeEvent>(payload) {
            Ok(event) => {
                let kind = event.kind();
                let changes = routes.changes.lock();
                if let Some(subscribers) = changes.get(collection) {
                    for route in subscribers.iter().filter(|route| route.kinds.accepts(kind)) {
                        // closed sink = owner already torn down
                        let _ = route.sink.send(event.clone());
                    }
                }
            }
            Err(e) => warn!("[mqtt] invalid change event on {}: {}", topic, e),
        },
    }
}

fn resubscribe_all(client: &AsyncClient, prefix: &str, routes: &Routes) {
    let mut topics: Vec<String> = routes
        .changes
        .lock()
        .keys()
        .map(|c| changes_topic(prefix, c))
        .collect();
    topics.extend(
        routes
            .rows
            .lock()
            .iter()
            .map(|c| format!("{}/{}/{}", prefix, c, Channel::Rows.leaf())),
    );

    for topic in topics {
        if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
            error!("[mqtt] resubscribe {} failed: {}", topic, e);
        }
    }
}

fn spawn_event_loop(
    client: AsyncClient,
    mut eventloop: rumqttc::EventLoop,
    prefix: String,
    routes: Routes,
    health: HealthTracker,
) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    health.mark_mqtt_connected();
                    resubscribe_all(&client, &prefix, &routes);
                    info!("[mqtt] connected");
                }
                Ok(Event::Incoming(Incoming::Publish(p))) => {
                    dispatch(&routes, &prefix, &p.topic, &p.payload);
                }
                Ok(Event::Incoming(Incoming::Disconnect)) => {
                    health.mark_mqtt_disconnected();
                }
                Ok(_) => {}
                Err(e) => {
                    error!("[mqtt] connection error: {:?}", e);
                    health.increment_reconnects();
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ChangeKind;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn routes() -> Routes {
        Routes::default()
    }

    #[test]
    fn test_parse_topic() {
        assert_eq!(parse_topic("shield", "shield/incidents/changes@v1"), Some(("incidents", Channel::Changes)));
        assert_eq!(parse_topic("shield", "shield/units/rows@v1"), Some(("units", Channel::Rows)));
        assert_eq!(parse_topic("ops/shield", "ops/shield/logs/rows@v1"), Some(("logs", Channel::Rows)));
        assert_eq!(parse_topic("shield", "shield/units/query@v1"), None);
        assert_eq!(parse_topic("shield", "shieldx/units/rows@v1"), None);
        assert_eq!(parse_topic("shield", "fleet/hosts/heartbeat@v2"), None);
        assert_eq!(parse_topic("shield", "shield//rows@v1"), None);

        let topic = changes_topic("shield", "incidents");
        assert_eq!(topic, "shield/incidents/changes@v1");
        assert_eq!(parse_topic("shield", &topic), Some(("incidents", Channel::Changes)));
    }

    #[test]
    fn test_dispatch_changes_respects_kinds() {
        let routes = routes();
        let (all_tx, mut all_rx) = mpsc::unbounded_channel();
        let (insert_tx, mut insert_rx) = mpsc::unbounded_channel();
        routes.changes.lock().insert(
            "logs".into(),
            vec![
                Route { handle: SubscriptionHandle(1), kinds: EventKinds::ALL, sink: all_tx },
                Route { handle: SubscriptionHandle(2), kinds: EventKinds::INSERT_ONLY, sink: insert_tx },
            ],
        );

        let update = json!({"type": "UPDATE", "new": {"id": "l1"}}).to_string();
        dispatch(&routes, "shield", "shield/logs/changes@v1", update.as_bytes());
        let insert = json!({"type": "INSERT", "new": {"id": "l2"}}).to_string();
        dispatch(&routes, "shield", "shield/logs/changes@v1", insert.as_bytes());

        assert_eq!(all_rx.try_recv().unwrap().kind(), ChangeKind::Update);
        assert_eq!(all_rx.try_recv().unwrap().kind(), ChangeKind::Insert);
        assert_eq!(insert_rx.try_recv().unwrap().kind(), ChangeKind::Insert);
        assert!(insert_rx.try_recv().is_err());
    }

    #[test]
    fn test_dispatch_rows_resolves_pending_query() {
        let routes = routes();
        let (tx, mut rx) = oneshot::channel();
        routes.pending.lock().insert("req-1".into(), tx);

        let reply = json!({"type": "success", "request_id": "req-1", "rows": [{"id": "u1"}]}).to_string();
        dispatch(&routes, "shield", "shield/units/rows@v1", reply.as_bytes());

        match rx.try_recv().unwrap() {
            RowsResponse::Success { rows, .. } => assert_eq!(rows.len(), 1),
            other => panic!("unexpected reply {other:?}"),
        }
        assert!(routes.pending.lock().is_empty());
    }

    #[tokio::test]
    async fn test_aborted_query_leaves_no_pending_entry() {
        let (client, _eventloop) = AsyncClient::new(MqttOptions::new("shield-test", "localhost", 1883), 10);
        let source = Arc::new(MqttSource {
            client,
            prefix: "shield".into(),
            query_timeout: Duration::from_secs(60),
            routes: routes(),
            next_handle: AtomicU64::new(1),
            health: HealthTracker::new(),
        });

        let querying = source.clone();
        let task = tokio::spawn(async move { querying.query(QueryRequest::all("units")).await });
        for _ in 0..100 {
            if !source.routes.pending.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(source.routes.pending.lock().len(), 1);

        task.abort();
        let _ = task.await;
        assert!(source.routes.pending.lock().is_empty());
    }

    #[test]
    fn test_dispatch_ignores_garbage() {
        let routes = routes();
        dispatch(&routes, "shield", "shield/units/rows@v1", b"not json");
        dispatch(&routes, "shield", "shield/units/changes@v1", b"{\"type\":\"TRUNCATE\"}");
        assert!(routes.pending.lock().is_empty());
    }
}
