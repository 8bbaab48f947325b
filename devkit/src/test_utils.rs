/*!
Test harness for the live collections

- Shared `MemorySource` behind the feeds
- Starts one feed or all three with the default sync settings
- Waits (with a timeout) for a snapshot matching a predicate
*/

use crate::memory_source::MemorySource;
use anyhow::Result;
use shield_sync::config::SyncConf;
use shield_sync::hooks::{self, IncidentFeed, LogFeed, UnitFeed};
use shield_sync::models::Record;
use shield_sync::reconcile::{Snapshot, SyncHandle};
use shield_sync::LiveFeeds;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const DEFAULT_TIMEOUT_MS: u64 = 2000;

pub struct TestHarness {
    pub source: Arc<MemorySource>,
    pub conf: SyncConf,
}

impl TestHarness {
    pub fn new() -> Self {
        env_logger::try_init().ok();

        Self {
            source: Arc::new(MemorySource::new()),
            conf: SyncConf::default(),
        }
    }

    pub fn with_conf(mut self, conf: SyncConf) -> Self {
        self.conf = conf;
        self
    }

    pub fn incidents(&self) -> IncidentFeed {
        hooks::spawn_incidents(self.source.clone(), &self.conf)
    }

    pub fn units(&self) -> UnitFeed {
        hooks::spawn_units(self.source.clone(), &self.conf)
    }

    pub fn logs(&self) -> LogFeed {
        hooks::spawn_logs(self.source.clone(), &self.conf)
    }

    pub fn start_all(&self) -> LiveFeeds {
        LiveFeeds::start(self.source.clone(), &self.conf)
    }

    /// Waits until the feed publishes a snapshot accepted by `predicate`
    pub async fn wait_until<T, F>(&self, feed: &SyncHandle<T>, predicate: F) -> Result<Snapshot<T>>
    where
        T: Record,
        F: FnMut(&Snapshot<T>) -> bool,
    {
        wait_for_snapshot(feed, DEFAULT_TIMEOUT_MS, predicate).await
    }

    /// Waits for the first load to be installed (or to fail)
    pub async fn wait_loaded<T: Record>(&self, feed: &SyncHandle<T>) -> Result<Snapshot<T>> {
        wait_for_snapshot(feed, DEFAULT_TIMEOUT_MS, |snapshot| !snapshot.loading).await
    }

    /// Gives the feed tasks time to process whatever is queued
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn wait_for_snapshot<T, F>(
    feed: &SyncHandle<T>,
    timeout_ms: u64,
    mut predicate: F,
) -> Result<Snapshot<T>>
where
    T: Record,
    F: FnMut(&Snapshot<T>) -> bool,
{
    let mut rx = feed.watch();
    let waited = timeout(Duration::from_millis(timeout_ms), async {
        rx.wait_for(|snapshot| predicate(snapshot)).await.map(|snapshot| snapshot.clone())
    })
    .await;

    match waited {
        Ok(Ok(snapshot)) => Ok(snapshot),
        Ok(Err(_)) => anyhow::bail!("Feed {} closed before matching", feed.collection()),
        Err(_) => {
            log::warn!("⏰ Timeout waiting on feed {}", feed.collection());
            anyhow::bail!("Timeout after {}ms waiting on feed {}", timeout_ms, feed.collection())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rows::ShieldRows;

    #[tokio::test]
    async fn test_harness_loads_seeded_units() {
        let harness = TestHarness::new();
        harness.source.seed("units", vec![ShieldRows::unit("u1", "Idle"), ShieldRows::unit("u2", "Busy")]);

        let units = harness.units();
        let snapshot = harness.wait_loaded(&units).await.unwrap();
        assert_eq!(snapshot.items.len(), 2);
        assert_eq!(snapshot.items[1].status, "Busy");
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let harness = TestHarness::new();
        harness.source.hold_queries();

        let logs = harness.logs();
        let result = wait_for_snapshot(&logs, 100, |snapshot| !snapshot.loading).await;
        assert!(result.is_err());
        assert!(logs.is_loading());
    }
}
