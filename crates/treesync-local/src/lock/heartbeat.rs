use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use treesync_core::{
    HeartbeatOutcome, LockAcquireResult, LockInfo, LockManager, ReleaseOutcome, SyncError,
};

/// Result of trying to start editing a node.
#[derive(Debug)]
pub enum EditStart {
    Editing(EditSession),
    /// Someone else is editing; the caller must stay read-only.
    Locked(LockInfo),
}

/// An active edit on one node: holds the lock and heartbeats it in the background.
///
/// Dropping the session stops the heartbeat without releasing; the lock then
/// lapses once its TTL elapses.
pub struct EditSession {
    lock_manager: Arc<dyn LockManager>,
    workspace_id: String,
    node_id: String,
    holder_id: String,
    lock: LockInfo,
    heartbeat: JoinHandle<()>,
}

impl EditSession {
    /// Acquire the lock on `node_id` and start heartbeating every `interval`.
    pub async fn begin(
        lock_manager: Arc<dyn LockManager>,
        workspace_id: &str,
        node_id: &str,
        holder_id: &str,
        holder_name: &str,
        interval: Duration,
    ) -> Result<EditStart, SyncError> {
        let lock = match lock_manager
            .acquire(workspace_id, node_id, holder_id, holder_name)
            .await?
        {
            LockAcquireResult::Acquired { lock } => lock,
            LockAcquireResult::Conflict { holder } => {
                info!(
                    "{} is editing {}/{}, opening read-only",
                    holder.holder_name, workspace_id, node_id
                );
                return Ok(EditStart::Locked(holder));
            }
        };

        let heartbeat = tokio::spawn(heartbeat_loop(
            Arc::clone(&lock_manager),
            workspace_id.to_string(),
            node_id.to_string(),
            holder_id.to_string(),
            interval,
        ));

        Ok(EditStart::Editing(Self {
            lock_manager,
            workspace_id: workspace_id.to_string(),
            node_id: node_id.to_string(),
            holder_id: holder_id.to_string(),
            lock,
            heartbeat,
        }))
    }

    pub fn lock(&self) -> &LockInfo {
        &self.lock
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// False once the heartbeat noticed the lock was lost.
    pub fn is_alive(&self) -> bool {
        !self.heartbeat.is_finished()
    }

    /// Stop heartbeating and release the lock.
    pub async fn release(self) -> Result<ReleaseOutcome, SyncError> {
        self.heartbeat.abort();
        self.lock_manager
            .release(&self.workspace_id, &self.node_id, &self.holder_id)
            .await
    }
}

impl std::fmt::Debug for EditSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditSession")
            .field("workspace_id", &self.workspace_id)
            .field("node_id", &self.node_id)
            .field("holder_id", &self.holder_id)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl Drop for EditSession {
    fn drop(&mut self) {
        self.heartbeat.abort();
    }
}

async fn heartbeat_loop(
    lock_manager: Arc<dyn LockManager>,
    workspace_id: String,
    node_id: String,
    holder_id: String,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately; the lock was just acquired.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match lock_manager
            .heartbeat(&workspace_id, &node_id, &holder_id)
            .await
        {
            Ok(HeartbeatOutcome::Refreshed) => {
                debug!("Heartbeat on {}/{} by {}", workspace_id, node_id, holder_id);
            }
            Ok(HeartbeatOutcome::Ignored) => {
                warn!(
                    "Lock on {}/{} no longer held by {}, stopping heartbeat",
                    workspace_id, node_id, holder_id
                );
                break;
            }
            Err(e) => {
                warn!(
                    "Heartbeat on {}/{} failed: {} (will retry)",
                    workspace_id, node_id, e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::MemoryLock;

    const WS: &str = "test-workspace";

    fn lock_table() -> Arc<MemoryLock> {
        Arc::new(MemoryLock::new(Duration::from_secs(300)))
    }

    async fn begin(lock: &Arc<MemoryLock>, holder: &str) -> EditStart {
        let manager: Arc<dyn LockManager> = lock.clone();
        EditSession::begin(manager, WS, "doc1", holder, holder, Duration::from_secs(60))
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_outlives_ttl_while_heartbeating() {
        let lock = lock_table();
        let EditStart::Editing(session) = begin(&lock, "alice").await else {
            panic!("alice should get the lock");
        };

        tokio::time::sleep(Duration::from_secs(900)).await;
        assert!(session.is_alive());
        assert!(matches!(begin(&lock, "bob").await, EditStart::Locked(h) if h.holder_id == "alice"));

        assert_eq!(session.release().await.unwrap(), ReleaseOutcome::Released);
        assert!(matches!(begin(&lock, "bob").await, EditStart::Editing(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_session_lapses() {
        let lock = lock_table();
        let start = begin(&lock, "alice").await;
        assert!(matches!(start, EditStart::Editing(_)));
        drop(start);

        tokio::time::sleep(Duration::from_secs(301)).await;
        assert!(matches!(begin(&lock, "bob").await, EditStart::Editing(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_stops_after_force_release() {
        let lock = lock_table();
        let EditStart::Editing(session) = begin(&lock, "alice").await else {
            panic!("alice should get the lock");
        };

        lock.force_release(WS, "doc1").await.unwrap();
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(!session.is_alive());
    }
}
