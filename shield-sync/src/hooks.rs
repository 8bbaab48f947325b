//! The three live collections behind the dashboard.
//!
//! | collection | initial load             | insert     | cap | update/delete |
//! |------------|--------------------------|------------|-----|---------------|
//! | incidents  | 50 newest, newest first  | front      | 50  | yes           |
//! | units      | everything               | back       | -   | yes           |
//! | logs       | 50 newest, then reversed | back       | 50  | no            |

use crate::config::SyncConf;
use crate::health::CollectionHealth;
use crate::models::{Incident, LogEntry, Unit};
use crate::reconcile::{Placement, SyncHandle, SyncPolicy};
use crate::source::{EventKinds, QueryRequest, RemoteSource};
use std::sync::Arc;

pub type IncidentFeed = SyncHandle<Incident>;
pub type UnitFeed = SyncHandle<Unit>;
pub type LogFeed = SyncHandle<LogEntry>;

pub fn incident_policy(collection: &str, cap: usize) -> SyncPolicy {
    SyncPolicy {
        query: QueryRequest::newest(collection, cap),
        reverse_initial: false,
        insert_at: Placement::Front,
        cap: Some(cap),
        kinds: EventKinds::ALL,
    }
}

pub fn unit_policy(collection: &str) -> SyncPolicy {
    SyncPolicy {
        query: QueryRequest::all(collection),
        reverse_initial: false,
        insert_at: Placement::Back,
        cap: None,
        kinds: EventKinds::ALL,
    }
}

pub fn log_policy(collection: &str, cap: usize) -> SyncPolicy {
    SyncPolicy {
        query: QueryRequest::newest(collection, cap),
        reverse_initial: true,
        insert_at: Placement::Back,
        cap: Some(cap),
        kinds: EventKinds::INSERT_ONLY,
    }
}

pub fn spawn_incidents<S: RemoteSource>(source: Arc<S>, conf: &SyncConf) -> IncidentFeed {
    SyncHandle::spawn(source, incident_policy(&conf.incidents, conf.incident_cap))
}

pub fn spawn_units<S: RemoteSource>(source: Arc<S>, conf: &SyncConf) -> UnitFeed {
    SyncHandle::spawn(source, unit_policy(&conf.units))
}

pub fn spawn_logs<S: RemoteSource>(source: Arc<S>, conf: &SyncConf) -> LogFeed {
    SyncHandle::spawn(source, log_policy(&conf.logs, conf.log_cap))
}

/// Everything the dashboard views read from, on one shared source session.
pub struct LiveFeeds {
    pub incidents: IncidentFeed,
    pub units: UnitFeed,
    pub logs: LogFeed,
}

impl LiveFeeds {
    pub fn start<S: RemoteSource>(source: Arc<S>, conf: &SyncConf) -> Self {
        Self {
            incidents: spawn_incidents(source.clone(), conf),
            units: spawn_units(source.clone(), conf),
            logs: spawn_logs(source, conf),
        }
    }

    pub fn health(&self) -> Vec<CollectionHealth> {
        vec![
            collection_health(&self.incidents),
            collection_health(&self.units),
            collection_health(&self.logs),
        ]
    }

    pub async fn shutdown(self) {
        self.incidents.shutdown().await;
        self.units.shutdown().await;
        self.logs.shutdown().await;
    }
}

fn collection_health<T: crate::models::Record>(feed: &SyncHandle<T>) -> CollectionHealth {
    let rx = feed.watch();
    let snapshot = rx.borrow();
    CollectionHealth {
        name: feed.collection().to_string(),
        size: snapshot.items.len(),
        loading: snapshot.loading,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policies_follow_conf() {
        let conf = SyncConf { incident_cap: 20, log_cap: 10, ..SyncConf::default() };

        let incidents = incident_policy(&conf.incidents, conf.incident_cap);
        assert_eq!(incidents.collection(), "incidents");
        assert_eq!(incidents.query.limit, Some(20));
        assert!(incidents.query.descending);
        assert_eq!(incidents.insert_at, Placement::Front);

        let units = unit_policy(&conf.units);
        assert_eq!(units.query.limit, None);
        assert_eq!(units.query.order_by, None);
        assert_eq!(units.cap, None);

        let logs = log_policy(&conf.logs, conf.log_cap);
        assert!(logs.reverse_initial);
        assert_eq!(logs.cap, Some(10));
        assert_eq!(logs.kinds, EventKinds::INSERT_ONLY);
    }
}
