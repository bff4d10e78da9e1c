//! Drop-target resolution, move validation and sequential move batches.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::feed::TreeMutations;
use crate::node::{is_descendant, Snapshot, ROOT_ID};
use crate::selection::SelectionState;

/// How many failing names a batch report lists before collapsing into a count.
pub const MAX_REPORTED_FAILURES: usize = 3;

/// Where a drag ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropTarget {
    Node(String),
    RootZone,
    Unresolved,
}

/// Why a move was not attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    SameParent,
    OwnParent,
    IntoDescendant,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveDecision {
    Move { node_id: String, new_parent_id: String },
    Skip { node_id: String, reason: SkipReason },
}

/// The ids a drag operates on: the whole selection if the dragged node is
/// part of it, otherwise the dragged node alone.
pub fn active_ids(dragged: &str, selection: &SelectionState) -> Vec<String> {
    if selection.is_selected(dragged) {
        let mut ids: Vec<String> = Vec::with_capacity(selection.selected().len());
        for id in selection.selected() {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids
    } else {
        vec![dragged.to_string()]
    }
}

/// Folder that receives the drop.
///
/// A folder target receives the items; a leaf target places them beside it;
/// the root zone and unknown targets fall back to the root.
pub fn resolve_parent(snapshot: &Snapshot, target: &DropTarget) -> String {
    match target {
        DropTarget::Node(id) => match snapshot.find(id) {
            Some(node) if node.is_folder() => node.id.clone(),
            Some(_) => snapshot
                .parent_of(id)
                .unwrap_or(ROOT_ID)
                .to_string(),
            None => ROOT_ID.to_string(),
        },
        DropTarget::RootZone | DropTarget::Unresolved => ROOT_ID.to_string(),
    }
}

/// Decide whether moving `node_id` under `new_parent_id` is a real move.
pub fn validate_move(snapshot: &Snapshot, node_id: &str, new_parent_id: &str) -> MoveDecision {
    let skip = |reason| MoveDecision::Skip {
        node_id: node_id.to_string(),
        reason,
    };
    if node_id == new_parent_id {
        return skip(SkipReason::OwnParent);
    }
    let Some(current_parent) = snapshot.parent_of(node_id) else {
        return skip(SkipReason::NotFound);
    };
    if current_parent == new_parent_id {
        return skip(SkipReason::SameParent);
    }
    if is_descendant(&snapshot.root, node_id, new_parent_id) {
        return skip(SkipReason::IntoDescendant);
    }
    MoveDecision::Move {
        node_id: node_id.to_string(),
        new_parent_id: new_parent_id.to_string(),
    }
}

/// Validate every active id against one drop target, using the pre-drop snapshot.
pub fn plan_moves(snapshot: &Snapshot, active: &[String], target: &DropTarget) -> Vec<MoveDecision> {
    let new_parent = resolve_parent(snapshot, target);
    active
        .iter()
        .map(|id| validate_move(snapshot, id, &new_parent))
        .collect()
}

/// Outcome of a move batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveBatchReport {
    pub moved: usize,
    pub skipped: usize,
    /// Names of the first few failures.
    pub failed_names: Vec<String>,
    /// Failures beyond `failed_names`.
    pub failed_overflow: usize,
}

impl MoveBatchReport {
    pub fn failed(&self) -> usize {
        self.failed_names.len() + self.failed_overflow
    }

    fn record_failure(&mut self, name: String) {
        if self.failed_names.len() < MAX_REPORTED_FAILURES {
            self.failed_names.push(name);
        } else {
            self.failed_overflow += 1;
        }
    }

    pub fn summary(&self) -> String {
        let mut out = format!("{} moved", self.moved);
        if self.failed() > 0 {
            out.push_str(&format!(
                ", {} failed: {}",
                self.failed(),
                self.failed_names.join(", ")
            ));
            if self.failed_overflow > 0 {
                out.push_str(&format!(" (+{} more)", self.failed_overflow));
            }
        }
        out
    }
}

/// Apply planned moves one at a time.
///
/// A failed move is recorded and the batch carries on.
pub async fn execute_moves(
    mutations: &dyn TreeMutations,
    workspace_id: &str,
    snapshot: &Snapshot,
    plan: &[MoveDecision],
) -> MoveBatchReport {
    let mut report = MoveBatchReport::default();

    for decision in plan {
        match decision {
            MoveDecision::Skip { node_id, reason } => {
                debug!("Skipping move of {}: {:?}", node_id, reason);
                report.skipped += 1;
            }
            MoveDecision::Move {
                node_id,
                new_parent_id,
            } => match mutations.move_node(workspace_id, node_id, new_parent_id).await {
                Ok(_) => report.moved += 1,
                Err(e) => {
                    warn!("Failed to move {} into {}: {}", node_id, new_parent_id, e);
                    let name = snapshot
                        .find(node_id)
                        .map(|n| n.name.clone())
                        .unwrap_or_else(|| node_id.clone());
                    report.record_failure(name);
                }
            },
        }
    }

    report
}
