//! Snapshot comparison.
//!
//! Both snapshots are flattened with traversal-derived parentage and compared
//! by id. Lock state is never part of the comparison.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::node::{build_path, flatten, FlatNode, Node, NodeType};

/// Classification of a structural change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    MovedOrRenamed,
    ContentUpdated,
    Deleted,
}

impl ChangeKind {
    pub const ALL: [ChangeKind; 4] = [
        ChangeKind::Created,
        ChangeKind::MovedOrRenamed,
        ChangeKind::ContentUpdated,
        ChangeKind::Deleted,
    ];
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::Created => write!(f, "created"),
            ChangeKind::MovedOrRenamed => write!(f, "moved_or_renamed"),
            ChangeKind::ContentUpdated => write!(f, "content_updated"),
            ChangeKind::Deleted => write!(f, "deleted"),
        }
    }
}

/// A single classified change between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub node_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Path in the previous snapshot; only set for deletions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ChangeEvent {
    fn from_flat(kind: ChangeKind, node: &FlatNode) -> Self {
        Self {
            kind,
            node_id: node.id.clone(),
            name: node.name.clone(),
            node_type: node.node_type,
            path: None,
        }
    }
}

/// The four categorized change lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeDiff {
    pub created: Vec<ChangeEvent>,
    pub moved_or_renamed: Vec<ChangeEvent>,
    pub content_updated: Vec<ChangeEvent>,
    pub deleted: Vec<ChangeEvent>,
}

impl TreeDiff {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
            && self.moved_or_renamed.is_empty()
            && self.content_updated.is_empty()
            && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.created.len()
            + self.moved_or_renamed.len()
            + self.content_updated.len()
            + self.deleted.len()
    }

    pub fn category(&self, kind: ChangeKind) -> &[ChangeEvent] {
        match kind {
            ChangeKind::Created => &self.created,
            ChangeKind::MovedOrRenamed => &self.moved_or_renamed,
            ChangeKind::ContentUpdated => &self.content_updated,
            ChangeKind::Deleted => &self.deleted,
        }
    }
}

/// Compare two tree roots.
///
/// Lists come out in depth-first pre-order of the snapshot they were read
/// from: `next` for created/moved/updated, `previous` for deleted. The walk
/// roots themselves are never reported.
pub fn diff(previous: &Node, next: &Node) -> TreeDiff {
    let prev_flat = flatten(previous);
    let next_flat = flatten(next);

    let prev_by_id: HashMap<&str, &FlatNode> =
        prev_flat.iter().map(|n| (n.id.as_str(), n)).collect();
    let next_by_id: HashMap<&str, &FlatNode> =
        next_flat.iter().map(|n| (n.id.as_str(), n)).collect();

    let mut out = TreeDiff::default();

    for node in &next_flat {
        match prev_by_id.get(node.id.as_str()) {
            None => out
                .created
                .push(ChangeEvent::from_flat(ChangeKind::Created, node)),
            Some(old) => {
                if old.parent_id != node.parent_id || old.name != node.name {
                    out.moved_or_renamed
                        .push(ChangeEvent::from_flat(ChangeKind::MovedOrRenamed, node));
                } else if node.node_type == NodeType::Leaf && old.updated_at != node.updated_at {
                    out.content_updated
                        .push(ChangeEvent::from_flat(ChangeKind::ContentUpdated, node));
                }
            }
        }
    }

    for node in &prev_flat {
        if !next_by_id.contains_key(node.id.as_str()) {
            let mut event = ChangeEvent::from_flat(ChangeKind::Deleted, node);
            // The node is gone from `next`, so only `previous` can name its location.
            event.path = build_path(previous, &node.id);
            out.deleted.push(event);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Node, ROOT_ID};
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeSet;

    fn t(secs: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn base() -> Node {
        Node::root().with_children(vec![
            Node::folder("fa", "FolderA").with_children(vec![
                Node::leaf("doc1", "Doc1").with_updated_at(t(0)),
                Node::leaf("doc2", "Doc2").with_updated_at(t(0)),
            ]),
            Node::folder("fb", "FolderB"),
        ])
    }

    fn ids(events: &[ChangeEvent]) -> BTreeSet<String> {
        events.iter().map(|e| e.node_id.clone()).collect()
    }

    #[test]
    fn test_identical_snapshots_yield_nothing() {
        let a = base();
        let d = diff(&a, &a);
        assert!(d.is_empty());
        assert_eq!(d, TreeDiff::default());
    }

    #[test]
    fn test_created_and_deleted_are_set_differences() {
        let prev = base();
        let next = Node::root().with_children(vec![
            Node::folder("fa", "FolderA")
                .with_children(vec![Node::leaf("doc1", "Doc1").with_updated_at(t(0))]),
            Node::folder("fb", "FolderB")
                .with_children(vec![Node::leaf("doc9", "Doc9").with_updated_at(t(5))]),
            Node::folder("fc", "FolderC"),
        ]);

        let d = diff(&prev, &next);
        assert_eq!(ids(&d.created), BTreeSet::from(["doc9".to_string(), "fc".to_string()]));
        assert_eq!(ids(&d.deleted), BTreeSet::from(["doc2".to_string()]));
        assert!(d.moved_or_renamed.is_empty());
        assert!(d.content_updated.is_empty());
    }

    #[test]
    fn test_deleted_path_comes_from_previous() {
        let prev = base();
        let next = Node::root().with_children(vec![Node::folder("fb", "FolderB")]);

        let d = diff(&prev, &next);
        let doc2 = d.deleted.iter().find(|e| e.node_id == "doc2").unwrap();
        assert_eq!(doc2.path.as_deref(), Some("FolderA/Doc2"));
        let fa = d.deleted.iter().find(|e| e.node_id == "fa").unwrap();
        assert_eq!(fa.path.as_deref(), Some("FolderA"));
        assert_eq!(fa.node_type, NodeType::Folder);
    }

    #[test]
    fn test_rename_and_move_is_one_event() {
        let prev = base();
        let next = Node::root().with_children(vec![
            Node::folder("fa", "FolderA")
                .with_children(vec![Node::leaf("doc2", "Doc2").with_updated_at(t(0))]),
            Node::folder("fb", "FolderB").with_children(vec![
                Node::leaf("doc1", "Doc1-renamed").with_updated_at(t(0)),
            ]),
        ]);

        let d = diff(&prev, &next);
        assert_eq!(d.moved_or_renamed.len(), 1);
        assert_eq!(d.moved_or_renamed[0].node_id, "doc1");
        assert_eq!(d.moved_or_renamed[0].name, "Doc1-renamed");
        assert!(d.created.is_empty());
        assert!(d.deleted.is_empty());
        assert!(d.content_updated.is_empty());
    }

    #[test]
    fn test_move_with_content_change_reports_move_only() {
        let prev = base();
        let next = Node::root().with_children(vec![
            Node::folder("fa", "FolderA")
                .with_children(vec![Node::leaf("doc2", "Doc2").with_updated_at(t(0))]),
            Node::folder("fb", "FolderB")
                .with_children(vec![Node::leaf("doc1", "Doc1").with_updated_at(t(9))]),
        ]);

        let d = diff(&prev, &next);
        assert_eq!(ids(&d.moved_or_renamed), BTreeSet::from(["doc1".to_string()]));
        assert!(d.content_updated.is_empty());
    }

    #[test]
    fn test_content_update_only_for_leaves() {
        let prev = Node::root().with_children(vec![
            Node::folder("f", "F").with_updated_at(t(0)),
            Node::leaf("l", "L").with_updated_at(t(0)),
        ]);
        let next = Node::root().with_children(vec![
            Node::folder("f", "F").with_updated_at(t(3)),
            Node::leaf("l", "L").with_updated_at(t(3)),
        ]);

        let d = diff(&prev, &next);
        assert_eq!(ids(&d.content_updated), BTreeSet::from(["l".to_string()]));
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn test_from_empty_everything_is_created() {
        let next = base();
        let d = diff(&Node::root(), &next);
        assert_eq!(d.created.len(), 4);
        assert!(d.created.iter().all(|e| e.node_id != ROOT_ID));
        assert_eq!(d.category(ChangeKind::Created).len(), 4);
    }

    #[test]
    fn test_lock_changes_are_not_diffed() {
        let prev = base();
        let mut next = base();
        next.children[0].children[0].lock = Some(crate::node::LockInfo {
            holder_id: "alice".into(),
            holder_name: "Alice".into(),
            acquired_at: t(1),
        });
        assert!(diff(&prev, &next).is_empty());
    }
}
