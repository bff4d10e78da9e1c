//! Flood control for change notifications.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::diff::{ChangeEvent, ChangeKind, TreeDiff};
use crate::node::Snapshot;

/// Maximum notifications surfaced per change category in one refresh cycle.
pub const DEFAULT_NOTIFY_LIMIT: usize = 5;

/// Everything a UI needs to reveal a node: expand `ancestor_ids`, then select `node_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JumpTarget {
    pub node_id: String,
    pub ancestor_ids: Vec<String>,
}

/// A change that survived echo suppression and flood control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub event: ChangeEvent,
    /// Absent for deletions and for nodes that cannot be located in the fresh tree.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jump: Option<JumpTarget>,
}

impl Notification {
    pub fn message(&self) -> String {
        let e = &self.event;
        match e.kind {
            ChangeKind::Created => format!("{} \"{}\" was created", e.node_type, e.name),
            ChangeKind::MovedOrRenamed => {
                format!("{} \"{}\" was moved or renamed", e.node_type, e.name)
            }
            ChangeKind::ContentUpdated => format!("\"{}\" was updated", e.name),
            ChangeKind::Deleted => format!(
                "{} \"{}\" was deleted",
                e.node_type,
                e.path.as_deref().unwrap_or(&e.name)
            ),
        }
    }
}

/// Notifications for one refresh cycle plus counts of what flood control dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationBatch {
    pub notifications: Vec<Notification>,
    pub suppressed: BTreeMap<ChangeKind, usize>,
}

impl NotificationBatch {
    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty() && self.suppressed.is_empty()
    }

    pub fn suppressed_total(&self) -> usize {
        self.suppressed.values().sum()
    }

    pub fn of_kind(&self, kind: ChangeKind) -> impl Iterator<Item = &Notification> {
        self.notifications
            .iter()
            .filter(move |n| n.event.kind == kind)
    }
}

/// Cap each category of `diff` at `limit`, attaching jump targets from `fresh`.
///
/// The remainder is only counted, never queued for a later cycle.
pub fn throttle(diff: &TreeDiff, fresh: &Snapshot, limit: usize) -> NotificationBatch {
    let mut batch = NotificationBatch::default();

    for kind in ChangeKind::ALL {
        let events = diff.category(kind);
        for event in events.iter().take(limit) {
            let jump = match kind {
                ChangeKind::Deleted => None,
                _ => fresh.ancestor_ids(&event.node_id).map(|ancestor_ids| JumpTarget {
                    node_id: event.node_id.clone(),
                    ancestor_ids,
                }),
            };
            batch.notifications.push(Notification {
                event: event.clone(),
                jump,
            });
        }
        if events.len() > limit {
            batch.suppressed.insert(kind, events.len() - limit);
        }
    }

    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff;
    use crate::node::Node;

    #[test]
    fn test_caps_each_category() {
        let prev = Node::root().with_children(
            (0..3).map(|i| Node::leaf(format!("old{i}"), format!("Old {i}"))).collect(),
        );
        let next = Node::root().with_children(vec![Node::folder("bulk", "Bulk")
            .with_children((0..8).map(|i| Node::leaf(format!("n{i}"), format!("N {i}"))).collect())]);
        let fresh = Snapshot::new(2, next);

        let d = diff(&prev, &fresh.root);
        assert_eq!(d.created.len(), 9);
        assert_eq!(d.deleted.len(), 3);

        let batch = throttle(&d, &fresh, DEFAULT_NOTIFY_LIMIT);
        assert_eq!(batch.of_kind(ChangeKind::Created).count(), 5);
        assert_eq!(batch.of_kind(ChangeKind::Deleted).count(), 3);
        assert_eq!(batch.suppressed.get(&ChangeKind::Created), Some(&4));
        assert!(!batch.suppressed.contains_key(&ChangeKind::Deleted));
        assert_eq!(batch.suppressed_total(), 4);
    }

    #[test]
    fn test_jump_targets() {
        let prev = Node::root().with_children(vec![Node::leaf("gone", "Gone")]);
        let next = Node::root().with_children(vec![Node::folder("f", "F")
            .with_children(vec![Node::leaf("doc", "Doc")])]);
        let fresh = Snapshot::new(1, next);

        let batch = throttle(&diff(&prev, &fresh.root), &fresh, DEFAULT_NOTIFY_LIMIT);
        let doc = batch
            .notifications
            .iter()
            .find(|n| n.event.node_id == "doc")
            .unwrap();
        assert_eq!(doc.jump.as_ref().unwrap().ancestor_ids, vec!["f"]);

        let gone = batch
            .notifications
            .iter()
            .find(|n| n.event.node_id == "gone")
            .unwrap();
        assert!(gone.jump.is_none());
        assert_eq!(gone.message(), "leaf \"Gone\" was deleted");
    }

    #[test]
    fn test_empty_diff_empty_batch() {
        let fresh = Snapshot::empty();
        let batch = throttle(&TreeDiff::default(), &fresh, DEFAULT_NOTIFY_LIMIT);
        assert!(batch.is_empty());
    }
}
