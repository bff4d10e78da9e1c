use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::node::LockInfo;

/// How long a lock survives without a heartbeat before anyone may reclaim it.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(10 * 60);

/// Cadence at which an active edit session refreshes its lock.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

/// Result of a lock acquisition attempt.
///
/// A conflict is an expected outcome: callers must surface `holder` and stay
/// out of edit mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LockAcquireResult {
    Acquired { lock: LockInfo },
    Conflict { holder: LockInfo },
}

impl LockAcquireResult {
    pub fn acquired(lock: LockInfo) -> Self {
        Self::Acquired { lock }
    }

    pub fn conflict(holder: LockInfo) -> Self {
        Self::Conflict { holder }
    }

    pub fn is_acquired(&self) -> bool {
        matches!(self, Self::Acquired { .. })
    }

    /// Whoever holds the lock after the attempt.
    pub fn holder(&self) -> &LockInfo {
        match self {
            Self::Acquired { lock } => lock,
            Self::Conflict { holder } => holder,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseOutcome {
    Released,
    /// Someone else holds the lock; nothing changed.
    NotHolder,
    NotLocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForceReleaseOutcome {
    Released,
    NotLocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatOutcome {
    Refreshed,
    /// No lock, or the lock belongs to someone else.
    Ignored,
}

/// Pessimistic per-node edit locks with advisory TTL.
///
/// All methods take `workspace_id` first so that identical node ids in
/// different workspaces never contend.
#[async_trait]
pub trait LockManager: Send + Sync {
    /// Acquire the edit lock on a node.
    ///
    /// Re-acquiring a lock already held by `holder_id` succeeds and refreshes
    /// it. A lock whose TTL elapsed without a heartbeat is reclaimed.
    async fn acquire(
        &self,
        workspace_id: &str,
        node_id: &str,
        holder_id: &str,
        holder_name: &str,
    ) -> Result<LockAcquireResult, SyncError>;

    /// Release a lock. A no-op unless `holder_id` is the current holder.
    async fn release(
        &self,
        workspace_id: &str,
        node_id: &str,
        holder_id: &str,
    ) -> Result<ReleaseOutcome, SyncError>;

    /// Drop a lock regardless of holder (privileged).
    async fn force_release(
        &self,
        workspace_id: &str,
        node_id: &str,
    ) -> Result<ForceReleaseOutcome, SyncError>;

    /// Refresh liveness of a lock held by `holder_id`.
    async fn heartbeat(
        &self,
        workspace_id: &str,
        node_id: &str,
        holder_id: &str,
    ) -> Result<HeartbeatOutcome, SyncError>;

    /// Current live lock on a node, if any. Expired locks are reported as absent.
    async fn get(&self, workspace_id: &str, node_id: &str) -> Result<Option<LockInfo>, SyncError>;
}
