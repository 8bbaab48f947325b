/**
 * RECONCILER - One live collection kept in sync with a remote source
 *
 * ROLE :
 * Generic primitive behind the incident, unit and log hooks. A `SyncPolicy`
 * says which collection to load, where inserts go, how many entries to keep
 * and which change kinds to listen to.
 *
 * LIFECYCLE :
 * - loading : subscription registered, bulk query in flight
 * - live    : query installed (or failed), events keep flowing
 * - stopped : subscription released, task aborted, no mutation allowed
 *
 * All mutations of one collection happen on its own task, in arrival order.
 * Consumers read snapshots through a `watch` channel and get notified on
 * every change of the items or of the loading flag.
 */

use crate::models::{RawRecord, Record};
use crate::source::{ChangeEvent, EventKinds, QueryRequest, RemoteSource};
use crate::state::{new_state, Shared};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Where an inserted entry lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Newest first (incidents)
    Front,
    /// Arrival order (units, logs)
    Back,
}

#[derive(Debug, Clone)]
pub struct SyncPolicy {
    pub query: QueryRequest,
    /// Reverse the query result before installing it (newest-first fetch, oldest-first storage)
    pub reverse_initial: bool,
    pub insert_at: Placement,
    /// Max entries kept; entries farthest from the insert side are dropped
    pub cap: Option<usize>,
    pub kinds: EventKinds,
}

impl SyncPolicy {
    pub fn collection(&self) -> &str {
        &self.query.collection
    }
}

/// What views get to see: the ordered items and whether the first load is pending.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot<T> {
    pub items: Vec<T>,
    pub loading: bool,
}

impl<T> Default for Snapshot<T> {
    fn default() -> Self {
        Self { items: Vec::new(), loading: true }
    }
}

impl<T: Record> Snapshot<T> {
    /// Installs the bulk query result and leaves the loading phase.
    pub fn install(&mut self, policy: &SyncPolicy, rows: &[RawRecord]) {
        let mut items: Vec<T> = rows.iter().map(T::from_raw).collect();
        if policy.reverse_initial {
            items.reverse();
        }
        self.items = items;
        self.loading = false;
    }

    /// Failed bulk query: keep what we have, stop showing the spinner.
    pub fn load_failed(&mut self) {
        self.loading = false;
    }

    /// Applies one change event. Returns false when nothing changed.
    pub fn apply(&mut self, policy: &SyncPolicy, event: &ChangeEvent) -> bool {
        if !policy.kinds.accepts(event.kind()) {
            return false;
        }

        match event {
            ChangeEvent::Insert { new } => {
                self.insert(policy, T::from_raw(new));
                true
            }
            ChangeEvent::Update { new, .. } => self.replace(T::from_raw(new)),
            ChangeEvent::Delete { old } => {
                let old = T::from_raw(old);
                match old.record_id() {
                    Some(id) => self.remove(id),
                    None => false,
                }
            }
        }
    }

    fn insert(&mut self, policy: &SyncPolicy, item: T) {
        // at most one entry per id
        if let Some(id) = item.record_id() {
            self.items.retain(|existing| existing.record_id() != Some(id));
        }

        match policy.insert_at {
            Placement::Front => {
                self.items.insert(0, item);
                if let Some(cap) = policy.cap {
                    self.items.truncate(cap);
                }
            }
            Placement::Back => {
                self.items.push(item);
                if let Some(cap) = policy.cap {
                    let excess = self.items.len().saturating_sub(cap);
                    self.items.drain(..excess);
                }
            }
        }
    }

    fn replace(&mut self, item: T) -> bool {
        let Some(id) = item.record_id() else { return false; };
        match self.items.iter().position(|existing| existing.record_id() == Some(id)) {
            Some(pos) => {
                self.items[pos] = item;
                true
            }
            None => false, // update before insert: dropped
        }
    }

    fn remove(&mut self, id: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|existing| existing.record_id() != Some(id));
        self.items.len() != before
    }
}

/// Owner side of a live collection. Dropping it tears the collection down.
pub struct SyncHandle<T> {
    collection: String,
    state: watch::Receiver<Snapshot<T>>,
    alive: Shared<bool>,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
    task: JoinHandle<()>,
}

impl<T: Record> SyncHandle<T> {
    /// Starts a live collection: subscribes, fires the bulk query, then keeps
    /// applying events until stopped. Must be called inside a tokio runtime.
    pub fn spawn<S: RemoteSource>(source: Arc<S>, policy: SyncPolicy) -> Self {
        let collection = policy.collection().to_string();
        let (state_tx, state_rx) = watch::channel(Snapshot::default());
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let alive = new_state(true);

        let release: Option<Box<dyn FnOnce() + Send + Sync>> =
            match source.subscribe(&collection, policy.kinds, event_tx) {
                Ok(handle) => {
                    let source = source.clone();
                    Some(Box::new(move || source.unsubscribe(handle)))
                }
                Err(e) => {
                    warn!("[sync] live updates unavailable for {}: {}", collection, e);
                    None
                }
            };

        let task = tokio::spawn(run(source, policy, state_tx, event_rx, alive.clone()));
        info!("[sync] started live collection {}", collection);

        Self { collection, state: state_rx, alive, release, task }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Copy of the current items and loading flag.
    pub fn snapshot(&self) -> Snapshot<T> {
        self.state.borrow().clone()
    }

    pub fn items(&self) -> Vec<T> {
        self.state.borrow().items.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().loading
    }

    pub fn len(&self) -> usize {
        self.state.borrow().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receiver notified on every change, for views that re-render reactively.
    pub fn watch(&self) -> watch::Receiver<Snapshot<T>> {
        self.state.clone()
    }

    /// Resolves once the bulk query has been installed or has failed.
    pub async fn loaded(&self) -> Snapshot<T> {
        let mut rx = self.state.clone();
        if let Ok(snapshot) = rx.wait_for(|snapshot| !snapshot.loading).await {
            return snapshot.clone();
        }
        // task gone: report whatever was last published
        let last = rx.borrow().clone();
        last
    }

    pub fn is_stopped(&self) -> bool {
        !*self.alive.lock()
    }

    /// Releases the subscription and stops the task. Idempotent.
    pub fn stop(&mut self) {
        {
            let mut alive = self.alive.lock();
            if !*alive {
                return;
            }
            *alive = false;
        }
        if let Some(release) = self.release.take() {
            release();
        }
        self.task.abort();
        info!("[sync] stopped live collection {}", self.collection);
    }

    /// `stop`, then waits for the task to be gone.
    pub async fn shutdown(mut self) {
        self.stop();
        let _ = (&mut self.task).await;
    }
}

impl<T> Drop for SyncHandle<T> {
    fn drop(&mut self) {
        let was_alive = std::mem::replace(&mut *self.alive.lock(), false);
        if was_alive {
            if let Some(release) = self.release.take() {
                release();
            }
            self.task.abort();
        }
    }
}

async fn run<T: Record, S: RemoteSource>(
    source: Arc<S>,
    policy: SyncPolicy,
    state: watch::Sender<Snapshot<T>>,
    mut events: mpsc::UnboundedReceiver<ChangeEvent>,
    alive: Shared<bool>,
) {
    let collection = policy.collection().to_string();
    let load = source.query(policy.query.clone());
    tokio::pin!(load);

    let mut loaded = false;
    let mut events_open = true;

    loop {
        tokio::select! {
            result = &mut load, if !loaded => {
                loaded = true;
                let guard = alive.lock();
                if !*guard {
                    break;
                }
                match result {
                    Ok(rows) => {
                        state.send_modify(|snapshot| snapshot.install(&policy, &rows));
                        debug!("[sync] loaded {} rows into {}", rows.len(), collection);
                    }
                    Err(e) => {
                        error!("[sync] error fetching {}: {}", collection, e);
                        state.send_modify(|snapshot| snapshot.load_failed());
                    }
                }
            }
            event = events.recv(), if events_open => {
                let Some(event) = event else {
                    events_open = false;
                    continue;
                };
                let guard = alive.lock();
                if !*guard {
                    break;
                }
                state.send_if_modified(|snapshot| snapshot.apply(&policy, &event));
            }
            else => break,
        }
    }

    debug!("[sync] task for {} finished", collection);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Incident, LogEntry, Unit};
    use serde_json::{json, Value};

    fn row(value: Value) -> RawRecord {
        match value {
            Value::Object(map) => map,
            _ => panic!("test rows must be objects"),
        }
    }

    fn incident_row(id: &str, severity: &str) -> RawRecord {
        row(json!({"id": id, "type": "Theft", "summary": "Phone stolen", "severity": severity, "lat": "-1.26", "lng": "36.80"}))
    }

    fn incident_policy() -> SyncPolicy {
        SyncPolicy {
            query: QueryRequest::newest("incidents", 50),
            reverse_initial: false,
            insert_at: Placement::Front,
            cap: Some(50),
            kinds: EventKinds::ALL,
        }
    }

    fn unit_policy() -> SyncPolicy {
        SyncPolicy {
            query: QueryRequest::all("units"),
            reverse_initial: false,
            insert_at: Placement::Back,
            cap: None,
            kinds: EventKinds::ALL,
        }
    }

    fn log_policy() -> SyncPolicy {
        SyncPolicy {
            query: QueryRequest::newest("logs", 50),
            reverse_initial: true,
            insert_at: Placement::Back,
            cap: Some(50),
            kinds: EventKinds::INSERT_ONLY,
        }
    }

    fn ids<T: Record>(snapshot: &Snapshot<T>) -> Vec<String> {
        snapshot.items.iter().filter_map(|i| i.record_id().map(String::from)).collect()
    }

    #[test]
    fn test_incident_scenario() {
        let policy = incident_policy();
        let mut snap = Snapshot::<Incident>::default();
        assert!(snap.loading);

        snap.install(&policy, &[incident_row("A", "Low"), incident_row("B", "Medium"), incident_row("C", "High")]);
        assert!(!snap.loading);
        assert_eq!(ids(&snap), ["A", "B", "C"]);

        assert!(snap.apply(&policy, &ChangeEvent::Insert { new: incident_row("D", "Low") }));
        assert_eq!(ids(&snap), ["D", "A", "B", "C"]);

        let update = ChangeEvent::Update { new: incident_row("B", "Critical"), old: RawRecord::new() };
        assert!(snap.apply(&policy, &update));
        assert_eq!(ids(&snap), ["D", "A", "B", "C"]);
        assert_eq!(snap.items[2].severity, "Critical");

        assert!(snap.apply(&policy, &ChangeEvent::Delete { old: row(json!({"id": "A"})) }));
        assert_eq!(ids(&snap), ["D", "B", "C"]);
        assert_eq!(snap.items[1].severity, "Critical");
    }

    #[test]
    fn test_incident_inserts_are_capped_newest_first() {
        let policy = incident_policy();
        let mut snap = Snapshot::<Incident>::default();
        snap.install(&policy, &[]);

        for n in 0..120 {
            let id = format!("inc-{n}");
            snap.apply(&policy, &ChangeEvent::Insert { new: incident_row(&id, "Low") });
            assert!(snap.items.len() <= 50);
            assert_eq!(snap.items[0].id, id);
        }
        assert_eq!(snap.items.len(), 50);
        assert_eq!(snap.items[49].id, "inc-70");
    }

    #[test]
    fn test_insert_keeps_ids_unique() {
        let policy = incident_policy();
        let mut snap = Snapshot::<Incident>::default();
        snap.install(&policy, &[incident_row("A", "Low"), incident_row("B", "Low")]);

        snap.apply(&policy, &ChangeEvent::Insert { new: incident_row("B", "High") });
        assert_eq!(ids(&snap), ["B", "A"]);
        assert_eq!(snap.items[0].severity, "High");
    }

    #[test]
    fn test_rows_without_id_never_collide() {
        let policy = incident_policy();
        let mut snap = Snapshot::<Incident>::default();
        snap.install(&policy, &[incident_row("A", "Low")]);

        assert!(snap.apply(&policy, &ChangeEvent::Insert { new: row(json!({"summary": "first, no id"})) }));
        assert!(snap.apply(&policy, &ChangeEvent::Insert { new: row(json!({"summary": "second, no id"})) }));
        let summaries: Vec<&str> = snap.items.iter().map(|i| i.description.as_str()).collect();
        assert_eq!(summaries, ["second, no id", "first, no id", "Phone stolen"]);

        let before = snap.clone();
        assert!(!snap.apply(&policy, &ChangeEvent::Delete { old: RawRecord::new() }));
        let update = ChangeEvent::Update { new: row(json!({"summary": "edited, no id"})), old: RawRecord::new() };
        assert!(!snap.apply(&policy, &update));
        assert_eq!(snap, before);
    }

    #[test]
    fn test_update_unknown_id_is_noop() {
        for policy in [incident_policy(), unit_policy()] {
            let mut snap = Snapshot::<Incident>::default();
            snap.install(&policy, &[incident_row("A", "Low"), incident_row("B", "Low")]);
            let before = snap.clone();

            let changed = snap.apply(&policy, &ChangeEvent::Update { new: incident_row("Z", "Critical"), old: RawRecord::new() });
            assert!(!changed);
            assert_eq!(snap, before);
        }
    }

    #[test]
    fn test_delete_semantics() {
        let policy = unit_policy();
        let mut snap = Snapshot::<Unit>::default();
        snap.install(&policy, &[row(json!({"id": "u1"})), row(json!({"id": "u2"})), row(json!({"id": "u3"}))]);

        let before = snap.clone();
        assert!(!snap.apply(&policy, &ChangeEvent::Delete { old: row(json!({"id": "u9"})) }));
        assert_eq!(snap, before);

        assert!(snap.apply(&policy, &ChangeEvent::Delete { old: row(json!({"id": "u2"})) }));
        assert_eq!(snap.items.len(), 2);
        assert!(snap.items.iter().all(|u| u.id != "u2"));
    }

    #[test]
    fn test_units_append_without_cap() {
        let policy = unit_policy();
        let mut snap = Snapshot::<Unit>::default();
        snap.install(&policy, &[row(json!({"id": "u1", "status": "Idle"}))]);

        for n in 2..=80 {
            snap.apply(&policy, &ChangeEvent::Insert { new: row(json!({"id": format!("u{n}")})) });
        }
        assert_eq!(snap.items.len(), 80);
        assert_eq!(snap.items[0].id, "u1");
        assert_eq!(snap.items[79].id, "u80");

        let update = ChangeEvent::Update { new: row(json!({"id": "u1", "status": "Busy"})), old: RawRecord::new() };
        assert!(snap.apply(&policy, &update));
        assert_eq!(snap.items[0].status, "Busy");
    }

    #[test]
    fn test_logs_initial_load_is_chronological() {
        let policy = log_policy();
        let mut snap = Snapshot::<LogEntry>::default();
        // newest first, as the query returns them
        snap.install(&policy, &[
            row(json!({"created_at": "2024-01-01T08:00:03Z", "message": "third"})),
            row(json!({"created_at": "2024-01-01T08:00:02Z", "message": "second"})),
            row(json!({"created_at": "2024-01-01T08:00:01Z", "message": "first"})),
        ]);

        let lines: Vec<&str> = snap.items.iter().map(LogEntry::as_str).collect();
        assert_eq!(lines, ["[08:00:01] first", "[08:00:02] second", "[08:00:03] third"]);
    }

    #[test]
    fn test_logs_sliding_window() {
        let policy = log_policy();
        let mut snap = Snapshot::<LogEntry>::default();
        snap.install(&policy, &[]);

        for n in 0..75 {
            let event = ChangeEvent::Insert { new: row(json!({"message": format!("entry {n}")})) };
            assert!(snap.apply(&policy, &event));
            assert!(snap.items.len() <= 50);
        }
        assert_eq!(snap.items.len(), 50);
        assert_eq!(snap.items[0].as_str(), "[--:--:--] entry 25");
        assert_eq!(snap.items[49].as_str(), "[--:--:--] entry 74");
    }

    #[test]
    fn test_logs_ignore_update_and_delete() {
        let policy = log_policy();
        let mut snap = Snapshot::<LogEntry>::default();
        snap.install(&policy, &[row(json!({"id": "l1", "message": "boot"}))]);
        let before = snap.clone();

        assert!(!snap.apply(&policy, &ChangeEvent::Update { new: row(json!({"id": "l1", "message": "edited"})), old: RawRecord::new() }));
        assert!(!snap.apply(&policy, &ChangeEvent::Delete { old: row(json!({"id": "l1"})) }));
        assert_eq!(snap, before);
    }

    #[test]
    fn test_load_failure_clears_loading_only() {
        let mut snap = Snapshot::<Unit>::default();
        snap.load_failed();
        assert!(!snap.loading);
        assert!(snap.items.is_empty());
    }
}
