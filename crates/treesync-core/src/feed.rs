use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::node::{LockInfo, Node, NodeType};

/// Messages delivered over a workspace change feed.
///
/// Delivery is at-least-once. `TreeChanged` carries no payload: reacting to it
/// means re-fetching, which makes duplicates harmless.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChangeFeedMessage {
    TreeChanged {
        workspace_id: String,
    },
    LockChanged {
        workspace_id: String,
        node_id: String,
        lock: Option<LockInfo>,
    },
}

impl ChangeFeedMessage {
    pub fn workspace_id(&self) -> &str {
        match self {
            ChangeFeedMessage::TreeChanged { workspace_id } => workspace_id,
            ChangeFeedMessage::LockChanged { workspace_id, .. } => workspace_id,
        }
    }
}

/// Source of full workspace trees.
#[async_trait]
pub trait TreeSource: Send + Sync {
    /// Fetch the current tree rooted at the synthetic root.
    async fn fetch_tree(&self, workspace_id: &str) -> Result<Node, SyncError>;
}

/// Identity of a node touched by a mutation, enough to drive local selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationReceipt {
    pub id: String,
    pub name: String,
}

/// Mutating operations on a workspace tree.
///
/// Callers stamp their [`SelfEchoGuard`](crate::SelfEchoGuard) before
/// invoking any of these.
#[async_trait]
pub trait TreeMutations: Send + Sync {
    async fn create_node(
        &self,
        workspace_id: &str,
        parent_id: &str,
        name: &str,
        node_type: NodeType,
    ) -> Result<MutationReceipt, SyncError>;

    async fn rename_node(
        &self,
        workspace_id: &str,
        node_id: &str,
        name: &str,
    ) -> Result<MutationReceipt, SyncError>;

    async fn move_node(
        &self,
        workspace_id: &str,
        node_id: &str,
        new_parent_id: &str,
    ) -> Result<MutationReceipt, SyncError>;

    /// Delete a node and, for folders, everything below it.
    async fn delete_node(&self, workspace_id: &str, node_id: &str) -> Result<(), SyncError>;

    async fn update_content(
        &self,
        workspace_id: &str,
        node_id: &str,
        content: &str,
    ) -> Result<MutationReceipt, SyncError>;

    /// Duplicate a node, and for folders its subtree, next to the original.
    async fn copy_node(
        &self,
        workspace_id: &str,
        node_id: &str,
    ) -> Result<MutationReceipt, SyncError>;
}
