use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, instrument};
use treesync_core::{
    ForceReleaseOutcome, HeartbeatOutcome, LockAcquireResult, LockInfo, LockManager,
    ReleaseOutcome, SyncError,
};

use crate::feed::ChangeFeed;

/// Lock record held by the table.
#[derive(Debug, Clone)]
struct LockRecord {
    info: LockInfo,
    last_heartbeat: Instant,
}

/// In-process lock table with TTL-based reclaim.
///
/// A record not heartbeated for `ttl` stays in the table until the next
/// acquire by someone else replaces it; reads treat it as absent. Every
/// ownership change is published on the change feed.
///
/// Keys: `(workspace_id, node_id)`.
#[derive(Debug)]
pub struct MemoryLock {
    locks: DashMap<(String, String), LockRecord>,
    ttl: Duration,
    feed: Option<ChangeFeed>,
}

impl MemoryLock {
    pub fn new(ttl: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            ttl,
            feed: None,
        }
    }

    /// Publish lock changes on `feed`.
    pub fn with_feed(mut self, feed: ChangeFeed) -> Self {
        self.feed = Some(feed);
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn key(workspace_id: &str, node_id: &str) -> (String, String) {
        (workspace_id.to_string(), node_id.to_string())
    }

    fn is_expired(&self, record: &LockRecord, now: Instant) -> bool {
        now.duration_since(record.last_heartbeat) >= self.ttl
    }

    fn publish(&self, workspace_id: &str, node_id: &str, lock: Option<LockInfo>) {
        if let Some(feed) = &self.feed {
            feed.lock_changed(workspace_id, node_id, lock);
        }
    }

    /// Live locks of a workspace by node id, used to annotate tree reads.
    pub fn live_locks(&self, workspace_id: &str) -> HashMap<String, LockInfo> {
        let now = Instant::now();
        self.locks
            .iter()
            .filter(|entry| entry.key().0 == workspace_id && !self.is_expired(entry.value(), now))
            .map(|entry| (entry.key().1.clone(), entry.value().info.clone()))
            .collect()
    }

    /// Drop locks of deleted nodes without notifying; the tree change covers them.
    pub fn discard(&self, workspace_id: &str, node_ids: &[String]) {
        for node_id in node_ids {
            if self.locks.remove(&Self::key(workspace_id, node_id)).is_some() {
                debug!("Discarded lock on deleted node {}/{}", workspace_id, node_id);
            }
        }
    }
}

#[async_trait]
impl LockManager for MemoryLock {
    #[instrument(skip(self), level = "debug")]
    async fn acquire(
        &self,
        workspace_id: &str,
        node_id: &str,
        holder_id: &str,
        holder_name: &str,
    ) -> Result<LockAcquireResult, SyncError> {
        let now = Instant::now();
        let fresh = || LockRecord {
            info: LockInfo {
                holder_id: holder_id.to_string(),
                holder_name: holder_name.to_string(),
                acquired_at: chrono::Utc::now(),
            },
            last_heartbeat: now,
        };

        // The entry guard keeps check-and-set atomic per shard; publish after it drops.
        let (result, changed) = match self.locks.entry(Self::key(workspace_id, node_id)) {
            Entry::Occupied(mut entry) => {
                let expired = self.is_expired(entry.get(), now);
                let record = entry.get_mut();
                if record.info.holder_id == holder_id {
                    record.last_heartbeat = now;
                    debug!(
                        "Lock on {}/{} already held by {} (refreshed)",
                        workspace_id, node_id, holder_id
                    );
                    (LockAcquireResult::acquired(record.info.clone()), false)
                } else if expired {
                    debug!(
                        "Lock on {}/{} expired (was held by {}), reclaiming for {}",
                        workspace_id, node_id, record.info.holder_id, holder_id
                    );
                    *record = fresh();
                    (LockAcquireResult::acquired(record.info.clone()), true)
                } else {
                    debug!(
                        "Lock on {}/{} held by {} (requested by {})",
                        workspace_id, node_id, record.info.holder_id, holder_id
                    );
                    (LockAcquireResult::conflict(record.info.clone()), false)
                }
            }
            Entry::Vacant(entry) => {
                let record = entry.insert(fresh());
                debug!(
                    "Acquired lock on {}/{} for {}",
                    workspace_id, node_id, holder_id
                );
                (LockAcquireResult::acquired(record.info.clone()), true)
            }
        };

        if changed {
            self.publish(workspace_id, node_id, Some(result.holder().clone()));
        }
        Ok(result)
    }

    #[instrument(skip(self), level = "debug")]
    async fn release(
        &self,
        workspace_id: &str,
        node_id: &str,
        holder_id: &str,
    ) -> Result<ReleaseOutcome, SyncError> {
        let outcome = match self.locks.entry(Self::key(workspace_id, node_id)) {
            Entry::Occupied(entry) => {
                if entry.get().info.holder_id == holder_id {
                    entry.remove();
                    debug!(
                        "Released lock on {}/{} by {}",
                        workspace_id, node_id, holder_id
                    );
                    ReleaseOutcome::Released
                } else {
                    debug!(
                        "Cannot release lock on {}/{}: held by {} not {}",
                        workspace_id,
                        node_id,
                        entry.get().info.holder_id,
                        holder_id
                    );
                    ReleaseOutcome::NotHolder
                }
            }
            Entry::Vacant(_) => {
                debug!(
                    "Lock on {}/{} not found for release by {}",
                    workspace_id, node_id, holder_id
                );
                ReleaseOutcome::NotLocked
            }
        };

        if outcome == ReleaseOutcome::Released {
            self.publish(workspace_id, node_id, None);
        }
        Ok(outcome)
    }

    #[instrument(skip(self), level = "debug")]
    async fn force_release(
        &self,
        workspace_id: &str,
        node_id: &str,
    ) -> Result<ForceReleaseOutcome, SyncError> {
        match self.locks.remove(&Self::key(workspace_id, node_id)) {
            Some((_, record)) => {
                debug!(
                    "Force released lock on {}/{} (was held by {})",
                    workspace_id, node_id, record.info.holder_id
                );
                self.publish(workspace_id, node_id, None);
                Ok(ForceReleaseOutcome::Released)
            }
            None => Ok(ForceReleaseOutcome::NotLocked),
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn heartbeat(
        &self,
        workspace_id: &str,
        node_id: &str,
        holder_id: &str,
    ) -> Result<HeartbeatOutcome, SyncError> {
        match self.locks.get_mut(&Self::key(workspace_id, node_id)) {
            Some(mut record) if record.info.holder_id == holder_id => {
                record.last_heartbeat = Instant::now();
                Ok(HeartbeatOutcome::Refreshed)
            }
            Some(record) => {
                debug!(
                    "Ignoring heartbeat on {}/{} from {}: held by {}",
                    workspace_id, node_id, holder_id, record.info.holder_id
                );
                Ok(HeartbeatOutcome::Ignored)
            }
            None => Ok(HeartbeatOutcome::Ignored),
        }
    }

    async fn get(&self, workspace_id: &str, node_id: &str) -> Result<Option<LockInfo>, SyncError> {
        let now = Instant::now();
        Ok(self
            .locks
            .get(&Self::key(workspace_id, node_id))
            .filter(|record| !self.is_expired(record, now))
            .map(|record| record.info.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use treesync_core::ChangeFeedMessage;

    const WS: &str = "test-workspace";

    fn setup() -> MemoryLock {
        MemoryLock::new(Duration::from_secs(600))
    }

    #[tokio::test]
    async fn test_acquire_release() {
        let lock_mgr = setup();

        // alice acquires
        let result = lock_mgr.acquire(WS, "doc1", "alice", "Alice").await.unwrap();
        assert!(result.is_acquired());
        assert_eq!(result.holder().holder_id, "alice");

        // Same holder can re-acquire (idempotent)
        let again = lock_mgr.acquire(WS, "doc1", "alice", "Alice").await.unwrap();
        assert!(again.is_acquired());
        assert_eq!(again.holder().holder_id, "alice");
        assert_eq!(again.holder().acquired_at, result.holder().acquired_at);

        // bob conflicts and learns who holds it
        let conflict = lock_mgr.acquire(WS, "doc1", "bob", "Bob").await.unwrap();
        assert!(!conflict.is_acquired());
        assert_eq!(conflict.holder().holder_name, "Alice");

        let released = lock_mgr.release(WS, "doc1", "alice").await.unwrap();
        assert_eq!(released, ReleaseOutcome::Released);

        // Now bob can acquire
        let result = lock_mgr.acquire(WS, "doc1", "bob", "Bob").await.unwrap();
        assert!(result.is_acquired());
        assert_eq!(result.holder().holder_id, "bob");
    }

    #[tokio::test]
    async fn test_release_not_owner() {
        let lock_mgr = setup();
        lock_mgr.acquire(WS, "doc1", "alice", "Alice").await.unwrap();

        // bob tries to release (should be no-op)
        let outcome = lock_mgr.release(WS, "doc1", "bob").await.unwrap();
        assert_eq!(outcome, ReleaseOutcome::NotHolder);

        let held = lock_mgr.get(WS, "doc1").await.unwrap().unwrap();
        assert_eq!(held.holder_id, "alice");

        let outcome = lock_mgr.release(WS, "doc2", "alice").await.unwrap();
        assert_eq!(outcome, ReleaseOutcome::NotLocked);
    }

    #[tokio::test]
    async fn test_workspace_isolation() {
        let lock_mgr = setup();
        let a = lock_mgr.acquire("ws-a", "doc1", "alice", "Alice").await.unwrap();
        let b = lock_mgr.acquire("ws-b", "doc1", "bob", "Bob").await.unwrap();
        assert!(a.is_acquired());
        assert!(b.is_acquired());
    }

    #[tokio::test]
    async fn test_force_release() {
        let lock_mgr = setup();
        lock_mgr.acquire(WS, "doc1", "alice", "Alice").await.unwrap();

        let outcome = lock_mgr.force_release(WS, "doc1").await.unwrap();
        assert_eq!(outcome, ForceReleaseOutcome::Released);
        assert!(lock_mgr.get(WS, "doc1").await.unwrap().is_none());

        let outcome = lock_mgr.force_release(WS, "doc1").await.unwrap();
        assert_eq!(outcome, ForceReleaseOutcome::NotLocked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lock_is_reclaimed() {
        let lock_mgr = MemoryLock::new(Duration::from_secs(300));
        lock_mgr.acquire(WS, "doc1", "alice", "Alice").await.unwrap();

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(!lock_mgr.acquire(WS, "doc1", "bob", "Bob").await.unwrap().is_acquired());

        tokio::time::advance(Duration::from_secs(1)).await;
        // Expired locks read as absent before anyone reclaims them.
        assert!(lock_mgr.get(WS, "doc1").await.unwrap().is_none());
        assert!(lock_mgr.live_locks(WS).is_empty());

        let result = lock_mgr.acquire(WS, "doc1", "bob", "Bob").await.unwrap();
        assert!(result.is_acquired());
        assert_eq!(result.holder().holder_id, "bob");

        // alice's late heartbeat no longer counts.
        let hb = lock_mgr.heartbeat(WS, "doc1", "alice").await.unwrap();
        assert_eq!(hb, HeartbeatOutcome::Ignored);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_keeps_lock_alive() {
        let lock_mgr = MemoryLock::new(Duration::from_secs(300));
        lock_mgr.acquire(WS, "doc1", "alice", "Alice").await.unwrap();

        for _ in 0..10 {
            tokio::time::advance(Duration::from_secs(60)).await;
            let hb = lock_mgr.heartbeat(WS, "doc1", "alice").await.unwrap();
            assert_eq!(hb, HeartbeatOutcome::Refreshed);
        }

        assert!(!lock_mgr.acquire(WS, "doc1", "bob", "Bob").await.unwrap().is_acquired());
        assert_eq!(
            lock_mgr.heartbeat(WS, "doc1", "bob").await.unwrap(),
            HeartbeatOutcome::Ignored
        );
        assert_eq!(
            lock_mgr.heartbeat(WS, "doc9", "alice").await.unwrap(),
            HeartbeatOutcome::Ignored
        );
    }

    #[tokio::test]
    async fn test_changes_are_published() {
        let feed = ChangeFeed::new(16);
        let mut rx = feed.subscribe();
        let lock_mgr = setup().with_feed(feed);

        lock_mgr.acquire(WS, "doc1", "alice", "Alice").await.unwrap();
        // Re-acquire and conflicts change nothing and publish nothing.
        lock_mgr.acquire(WS, "doc1", "alice", "Alice").await.unwrap();
        lock_mgr.acquire(WS, "doc1", "bob", "Bob").await.unwrap();
        lock_mgr.release(WS, "doc1", "alice").await.unwrap();

        match rx.recv().await.unwrap() {
            ChangeFeedMessage::LockChanged { node_id, lock, .. } => {
                assert_eq!(node_id, "doc1");
                assert_eq!(lock.unwrap().holder_id, "alice");
            }
            other => panic!("unexpected message {:?}", other),
        }
        match rx.recv().await.unwrap() {
            ChangeFeedMessage::LockChanged { lock, .. } => assert!(lock.is_none()),
            other => panic!("unexpected message {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_locking() {
        use tokio::sync::Barrier;

        let lock_mgr = Arc::new(setup());
        const NUM_TASKS: usize = 10;
        let barrier = Arc::new(Barrier::new(NUM_TASKS));
        let inside = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut handles = vec![];

        for i in 0..NUM_TASKS {
            let lock_mgr = Arc::clone(&lock_mgr);
            let barrier = Arc::clone(&barrier);
            let inside = Arc::clone(&inside);
            let counter = Arc::clone(&counter);
            let holder_id = format!("holder-{}", i);

            handles.push(tokio::spawn(async move {
                barrier.wait().await;

                let mut acquired = false;
                for attempt in 0..200 {
                    if attempt > 0 {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                    let result = lock_mgr
                        .acquire(WS, "shared", &holder_id, &holder_id)
                        .await
                        .expect("acquire failed");
                    if result.is_acquired() {
                        acquired = true;
                        break;
                    }
                }
                assert!(acquired, "Task {} failed to acquire lock", i);

                // Critical section: nobody else may be inside.
                let before = inside.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                assert_eq!(before, 0, "two holders inside the critical section");
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                inside.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);

                lock_mgr
                    .release(WS, "shared", &holder_id)
                    .await
                    .expect("release failed");
            }));
        }

        for handle in handles {
            handle.await.expect("task panicked");
        }
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), NUM_TASKS);
    }
}
