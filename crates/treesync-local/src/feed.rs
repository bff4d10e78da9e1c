use tokio::sync::broadcast;
use tracing::debug;
use treesync_core::{ChangeFeedMessage, LockInfo};

/// In-process change feed shared by the workspace, the lock table and every
/// subscribed tree view.
///
/// Messages published with no subscriber are dropped, matching a broadcast
/// socket with nobody connected.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<ChangeFeedMessage>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeFeedMessage> {
        self.sender.subscribe()
    }

    pub fn publish(&self, message: ChangeFeedMessage) {
        if self.sender.send(message).is_err() {
            debug!("Change feed has no subscribers");
        }
    }

    pub fn tree_changed(&self, workspace_id: &str) {
        self.publish(ChangeFeedMessage::TreeChanged {
            workspace_id: workspace_id.to_string(),
        });
    }

    pub fn lock_changed(&self, workspace_id: &str, node_id: &str, lock: Option<LockInfo>) {
        self.publish(ChangeFeedMessage::LockChanged {
            workspace_id: workspace_id.to_string(),
            node_id: node_id.to_string(),
            lock,
        });
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(256)
    }
}
