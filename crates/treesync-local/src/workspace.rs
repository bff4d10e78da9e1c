use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, instrument};
use treesync_core::{
    is_descendant, preorder_ids, LockInfo, MutationReceipt, Node, NodeType, SyncError,
    TreeMutations, TreeSource, ROOT_ID,
};

use crate::feed::ChangeFeed;
use crate::lock::MemoryLock;

/// In-memory workspace trees, one per workspace id.
///
/// Stored trees never carry lock state; reads annotate live locks from the
/// shared lock table. Children are kept folders first, then by name. Every
/// successful mutation publishes `TreeChanged` on the feed.
#[derive(Debug)]
pub struct MemoryWorkspace {
    trees: DashMap<String, Node>,
    locks: Arc<MemoryLock>,
    feed: ChangeFeed,
}

impl MemoryWorkspace {
    pub fn new(locks: Arc<MemoryLock>, feed: ChangeFeed) -> Self {
        Self {
            trees: DashMap::new(),
            locks,
            feed,
        }
    }

    /// Run `op` on the workspace tree and publish a tree change if it succeeds.
    fn mutate<T>(
        &self,
        workspace_id: &str,
        op: impl FnOnce(&mut Node) -> Result<T, SyncError>,
    ) -> Result<T, SyncError> {
        let result = {
            let mut tree = self
                .trees
                .entry(workspace_id.to_string())
                .or_insert_with(Node::root);
            op(tree.value_mut())?
        };
        self.feed.tree_changed(workspace_id);
        Ok(result)
    }
}

#[async_trait]
impl TreeSource for MemoryWorkspace {
    #[instrument(skip(self), level = "debug")]
    async fn fetch_tree(&self, workspace_id: &str) -> Result<Node, SyncError> {
        let mut tree = self
            .trees
            .get(workspace_id)
            .map(|t| t.value().clone())
            .unwrap_or_else(Node::root);
        let live = self.locks.live_locks(workspace_id);
        if !live.is_empty() {
            annotate_locks(&mut tree, &|id: &str| live.get(id).cloned());
        }
        Ok(tree)
    }
}

#[async_trait]
impl TreeMutations for MemoryWorkspace {
    #[instrument(skip(self), level = "debug")]
    async fn create_node(
        &self,
        workspace_id: &str,
        parent_id: &str,
        name: &str,
        node_type: NodeType,
    ) -> Result<MutationReceipt, SyncError> {
        let name = validate_name(name)?;
        let now = Utc::now();
        self.mutate(workspace_id, |tree| {
            let parent = find_folder_mut(tree, parent_id)?;
            let id = uuid::Uuid::new_v4().to_string();
            let mut node = match node_type {
                NodeType::Folder => Node::folder(id, name),
                NodeType::Leaf => Node::leaf(id, name),
            };
            node.parent_id = Some(parent_id.to_string());
            node.updated_at = Some(now);
            let receipt = receipt(&node);
            insert_child(parent, node);
            debug!("Created {} {} under {}", node_type, receipt.id, parent_id);
            Ok(receipt)
        })
    }

    #[instrument(skip(self), level = "debug")]
    async fn rename_node(
        &self,
        workspace_id: &str,
        node_id: &str,
        name: &str,
    ) -> Result<MutationReceipt, SyncError> {
        let name = validate_name(name)?;
        self.mutate(workspace_id, |tree| {
            if node_id == ROOT_ID {
                return Err(SyncError::InvalidArgument("cannot rename the root".into()));
            }
            let parent_id = parent_of(tree, node_id)
                .ok_or_else(|| SyncError::NotFound(format!("node {}", node_id)))?;
            find_mut(tree, node_id)?.name = name.to_string();
            sort_children(find_mut(tree, &parent_id)?);
            Ok(MutationReceipt {
                id: node_id.to_string(),
                name: name.to_string(),
            })
        })
    }

    #[instrument(skip(self), level = "debug")]
    async fn move_node(
        &self,
        workspace_id: &str,
        node_id: &str,
        new_parent_id: &str,
    ) -> Result<MutationReceipt, SyncError> {
        self.mutate(workspace_id, |tree| {
            if node_id == ROOT_ID {
                return Err(SyncError::InvalidArgument("cannot move the root".into()));
            }
            if node_id == new_parent_id || is_descendant(tree, node_id, new_parent_id) {
                return Err(SyncError::InvalidArgument(format!(
                    "cannot move {} into itself or its own subtree",
                    node_id
                )));
            }
            find_folder_mut(tree, new_parent_id)?;

            let mut node = detach(tree, node_id)
                .ok_or_else(|| SyncError::NotFound(format!("node {}", node_id)))?;
            node.parent_id = Some(new_parent_id.to_string());
            let receipt = receipt(&node);
            insert_child(find_folder_mut(tree, new_parent_id)?, node);
            debug!("Moved {} into {}", node_id, new_parent_id);
            Ok(receipt)
        })
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete_node(&self, workspace_id: &str, node_id: &str) -> Result<(), SyncError> {
        let removed = self.mutate(workspace_id, |tree| {
            if node_id == ROOT_ID {
                return Err(SyncError::InvalidArgument("cannot delete the root".into()));
            }
            let node = detach(tree, node_id)
                .ok_or_else(|| SyncError::NotFound(format!("node {}", node_id)))?;
            let mut ids = vec![node.id.clone()];
            ids.extend(preorder_ids(&node).into_iter().map(str::to_string));
            Ok(ids)
        })?;

        debug!("Deleted {} ({} nodes)", node_id, removed.len());
        self.locks.discard(workspace_id, &removed);
        Ok(())
    }

    #[instrument(skip(self, content), level = "debug", fields(content_len = content.len()))]
    async fn update_content(
        &self,
        workspace_id: &str,
        node_id: &str,
        content: &str,
    ) -> Result<MutationReceipt, SyncError> {
        let now = Utc::now();
        self.mutate(workspace_id, |tree| {
            let node = find_mut(tree, node_id)?;
            if node.is_folder() {
                return Err(SyncError::InvalidArgument(format!(
                    "{} is a folder and has no content",
                    node_id
                )));
            }
            node.content = Some(content.to_string());
            node.updated_at = Some(bump(node.updated_at, now));
            Ok(receipt(node))
        })
    }

    /// Duplicate a node (and its subtree) beside itself as `"<name> (copy)"`.
    #[instrument(skip(self), level = "debug")]
    async fn copy_node(
        &self,
        workspace_id: &str,
        node_id: &str,
    ) -> Result<MutationReceipt, SyncError> {
        let now = Utc::now();
        self.mutate(workspace_id, |tree| {
            if node_id == ROOT_ID {
                return Err(SyncError::InvalidArgument("cannot copy the root".into()));
            }
            let parent_id = parent_of(tree, node_id)
                .ok_or_else(|| SyncError::NotFound(format!("node {}", node_id)))?;
            let original = find_mut(tree, node_id)?.clone();

            let mut copy = fresh_ids(original, &parent_id, now);
            copy.name = format!("{} (copy)", copy.name);
            let receipt = receipt(&copy);

            insert_child(find_mut(tree, &parent_id)?, copy);
            debug!("Copied {} to {} ({})", node_id, receipt.id, receipt.name);
            Ok(receipt)
        })
    }
}

fn validate_name(name: &str) -> Result<&str, SyncError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(SyncError::InvalidArgument("name must not be empty".into()));
    }
    Ok(trimmed)
}

fn receipt(node: &Node) -> MutationReceipt {
    MutationReceipt {
        id: node.id.clone(),
        name: node.name.clone(),
    }
}

/// Strictly later than `previous`, so back-to-back edits always differ.
fn bump(previous: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    match previous {
        Some(prev) if prev >= now => prev + chrono::Duration::microseconds(1),
        _ => now,
    }
}

fn find_mut<'a>(tree: &'a mut Node, id: &str) -> Result<&'a mut Node, SyncError> {
    treesync_core::find_by_id_mut(tree, id).ok_or_else(|| SyncError::NotFound(format!("node {}", id)))
}

fn find_folder_mut<'a>(tree: &'a mut Node, id: &str) -> Result<&'a mut Node, SyncError> {
    let node = find_mut(tree, id)?;
    if !node.is_folder() {
        return Err(SyncError::InvalidArgument(format!("{} is not a folder", id)));
    }
    Ok(node)
}

fn parent_of(tree: &Node, id: &str) -> Option<String> {
    treesync_core::find_with_ancestors(tree, id)
        .and_then(|(_, ancestors)| ancestors.last().map(|p| p.id.clone()))
}

fn detach(node: &mut Node, id: &str) -> Option<Node> {
    if let Some(pos) = node.children.iter().position(|c| c.id == id) {
        return Some(node.children.remove(pos));
    }
    node.children.iter_mut().find_map(|child| detach(child, id))
}

fn insert_child(parent: &mut Node, child: Node) {
    parent.children.push(child);
    sort_children(parent);
}

/// Folders first, then by name.
fn sort_children(parent: &mut Node) {
    parent.children.sort_by(|a, b| {
        b.is_folder()
            .cmp(&a.is_folder())
            .then_with(|| a.name.cmp(&b.name))
    });
}

/// Deep copy with new ids throughout; locks are never copied.
fn fresh_ids(mut node: Node, parent_id: &str, now: DateTime<Utc>) -> Node {
    node.id = uuid::Uuid::new_v4().to_string();
    node.parent_id = Some(parent_id.to_string());
    node.updated_at = Some(now);
    node.lock = None;
    let id = node.id.clone();
    node.children = std::mem::take(&mut node.children)
        .into_iter()
        .map(|child| fresh_ids(child, &id, now))
        .collect();
    node
}

fn annotate_locks(node: &mut Node, lookup: &dyn Fn(&str) -> Option<LockInfo>) {
    node.lock = lookup(&node.id);
    for child in &mut node.children {
        annotate_locks(child, lookup);
    }
}
