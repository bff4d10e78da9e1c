use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Id of the synthetic root every workspace tree hangs from.
pub const ROOT_ID: &str = "root";

/// Kind of a tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Folder,
    Leaf,
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeType::Folder => write!(f, "folder"),
            NodeType::Leaf => write!(f, "leaf"),
        }
    }
}

/// Current holder of an edit lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub holder_id: String,
    pub holder_name: String,
    pub acquired_at: DateTime<Utc>,
}

/// One entry of a workspace tree.
///
/// `parent_id` is informational only: traversal derives parentage from the
/// enclosing folder, so snapshots that omit it are still handled correctly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock: Option<LockInfo>,
}

impl Node {
    /// The synthetic workspace root.
    pub fn root() -> Self {
        Self::folder(ROOT_ID, ROOT_ID)
    }

    pub fn folder(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            node_type: NodeType::Folder,
            parent_id: None,
            children: Vec::new(),
            content: None,
            updated_at: None,
            lock: None,
        }
    }

    pub fn leaf(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            node_type: NodeType::Leaf,
            content: Some(String::new()),
            ..Self::folder(id, name)
        }
    }

    /// Attach children, stamping their `parent_id` with this node's id.
    pub fn with_children(mut self, children: Vec<Node>) -> Self {
        self.children = children
            .into_iter()
            .map(|mut child| {
                child.parent_id = Some(self.id.clone());
                child
            })
            .collect();
        self
    }

    pub fn with_updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = Some(updated_at);
        self
    }

    pub fn is_folder(&self) -> bool {
        self.node_type == NodeType::Folder
    }
}

/// A full tree at one instant, versioned by the session that owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u64,
    pub root: Node,
}

impl Snapshot {
    pub fn new(version: u64, root: Node) -> Self {
        Self { version, root }
    }

    /// Version 0 with a childless root; diffing against it reports everything as created.
    pub fn empty() -> Self {
        Self::new(0, Node::root())
    }

    pub fn find(&self, id: &str) -> Option<&Node> {
        find_by_id(&self.root, id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.find(id).is_some()
    }

    /// Id of the folder that encloses `id`, derived from traversal.
    pub fn parent_of(&self, id: &str) -> Option<&str> {
        find_with_ancestors(&self.root, id)
            .and_then(|(_, ancestors)| ancestors.last().map(|p| p.id.as_str()))
    }

    pub fn path_of(&self, id: &str) -> Option<String> {
        build_path(&self.root, id)
    }

    pub fn ancestor_ids(&self, id: &str) -> Option<Vec<String>> {
        ancestor_ids(&self.root, id)
    }

    pub fn flatten(&self) -> Vec<FlatNode> {
        flatten(&self.root)
    }

    pub fn preorder_ids(&self) -> Vec<&str> {
        preorder_ids(&self.root)
    }
}

/// What a visitor tells [`walk`] to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkControl {
    Continue,
    SkipChildren,
    Stop,
}

/// Depth-first pre-order walk.
///
/// The visitor receives each node together with its ancestor chain, ordered
/// from the walk root down to the direct parent (empty for the walk root).
pub fn walk<'a, F>(root: &'a Node, mut visit: F)
where
    F: FnMut(&'a Node, &[&'a Node]) -> WalkControl,
{
    let mut ancestors: Vec<&'a Node> = Vec::new();
    walk_inner(root, &mut ancestors, &mut visit);
}

fn walk_inner<'a, F>(node: &'a Node, ancestors: &mut Vec<&'a Node>, visit: &mut F) -> bool
where
    F: FnMut(&'a Node, &[&'a Node]) -> WalkControl,
{
    match visit(node, ancestors.as_slice()) {
        WalkControl::Stop => return false,
        WalkControl::SkipChildren => return true,
        WalkControl::Continue => {}
    }

    ancestors.push(node);
    let mut keep_going = true;
    for child in &node.children {
        if !walk_inner(child, ancestors, visit) {
            keep_going = false;
            break;
        }
    }
    ancestors.pop();
    keep_going
}

pub fn find_by_id<'a>(root: &'a Node, id: &str) -> Option<&'a Node> {
    find_with_ancestors(root, id).map(|(node, _)| node)
}

/// Find a node and the chain of nodes above it (walk root first).
pub fn find_with_ancestors<'a>(root: &'a Node, id: &str) -> Option<(&'a Node, Vec<&'a Node>)> {
    let mut found = None;
    walk(root, |node, ancestors| {
        if node.id == id {
            found = Some((node, ancestors.to_vec()));
            WalkControl::Stop
        } else {
            WalkControl::Continue
        }
    });
    found
}

/// Slash-joined names from the first level below the walk root down to `id`.
pub fn build_path(root: &Node, id: &str) -> Option<String> {
    let (node, ancestors) = find_with_ancestors(root, id)?;
    if ancestors.is_empty() {
        return Some(String::new());
    }
    let mut names: Vec<&str> = ancestors.iter().skip(1).map(|a| a.name.as_str()).collect();
    names.push(node.name.as_str());
    Some(names.join("/"))
}

/// Ids of the folders that must be expanded to reveal `id`, excluding the walk root.
pub fn ancestor_ids(root: &Node, id: &str) -> Option<Vec<String>> {
    let (_, ancestors) = find_with_ancestors(root, id)?;
    Some(ancestors.iter().skip(1).map(|a| a.id.clone()).collect())
}

/// Whether `id` sits somewhere below `ancestor_id`.
pub fn is_descendant(root: &Node, ancestor_id: &str, id: &str) -> bool {
    find_with_ancestors(root, id)
        .map(|(_, ancestors)| ancestors.iter().any(|a| a.id == ancestor_id))
        .unwrap_or(false)
}

/// Flattened view of a node, with parentage taken from traversal context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatNode {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    pub node_type: NodeType,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Every node below the walk root, in depth-first pre-order.
pub fn flatten(root: &Node) -> Vec<FlatNode> {
    let mut out = Vec::new();
    walk(root, |node, ancestors| {
        if let Some(parent) = ancestors.last() {
            out.push(FlatNode {
                id: node.id.clone(),
                name: node.name.clone(),
                parent_id: Some(parent.id.clone()),
                node_type: node.node_type,
                updated_at: node.updated_at,
            });
        }
        WalkControl::Continue
    });
    out
}

/// Ids below the walk root in depth-first pre-order, ignoring collapse state.
pub fn preorder_ids(root: &Node) -> Vec<&str> {
    let mut out = Vec::new();
    walk(root, |node, ancestors| {
        if !ancestors.is_empty() {
            out.push(node.id.as_str());
        }
        WalkControl::Continue
    });
    out
}

/// Mutable lookup, used when applying lock updates in place.
pub fn find_by_id_mut<'a>(node: &'a mut Node, id: &str) -> Option<&'a mut Node> {
    if node.id == id {
        return Some(node);
    }
    node.children
        .iter_mut()
        .find_map(|child| find_by_id_mut(child, id))
}
