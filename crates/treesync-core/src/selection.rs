//! Selection and expansion state for one tree view, and its persistence.
//!
//! Two places remember a view's selection:
//! - an ephemeral per-view store ([`ViewStateStore`]) holding expansion and
//!   the selected ids, kept across reloads;
//! - a shareable location reference ([`LocationRef`]) holding only the
//!   selected ids, one entry per view, used for deep links.
//!
//! Restore runs as `ExpandPending -> Expanded -> Selected` so that the
//! rendering layer can signal when the expanded ancestors are on screen.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SyncError;
use crate::node::Snapshot;
use crate::notify::JumpTarget;

/// Modifier held while clicking a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickModifier {
    None,
    /// Ctrl/Cmd: add or remove the clicked node.
    Toggle,
    /// Shift: select the contiguous slice from the anchor.
    Range,
}

/// Selected ids (anchor first while it is selected) and per-folder expansion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionState {
    selected: Vec<String>,
    anchor: Option<String>,
    expanded: BTreeMap<String, bool>,
}

impl SelectionState {
    pub fn selected(&self) -> &[String] {
        &self.selected
    }

    pub fn anchor(&self) -> Option<&str> {
        self.anchor.as_deref()
    }

    pub fn primary(&self) -> Option<&str> {
        self.selected.first().map(String::as_str)
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.selected.iter().any(|s| s == id)
    }

    pub fn expanded(&self) -> &BTreeMap<String, bool> {
        &self.expanded
    }

    pub fn is_expanded(&self, id: &str) -> bool {
        self.expanded.get(id).copied().unwrap_or(false)
    }

    pub fn set_expanded(&mut self, id: &str, expanded: bool) {
        self.expanded.insert(id.to_string(), expanded);
    }

    pub fn toggle_expanded(&mut self, id: &str) -> bool {
        let now = !self.is_expanded(id);
        self.set_expanded(id, now);
        now
    }

    /// Expand every folder above `id`. Returns false if `id` is not in the tree.
    pub fn expand_ancestors(&mut self, snapshot: &Snapshot, id: &str) -> bool {
        match snapshot.ancestor_ids(id) {
            Some(ancestors) => {
                for ancestor in ancestors {
                    self.expanded.insert(ancestor, true);
                }
                true
            }
            None => false,
        }
    }

    pub fn select_only(&mut self, id: &str) {
        self.selected = vec![id.to_string()];
        self.anchor = Some(id.to_string());
    }

    /// Replace the selection; the first id becomes the anchor.
    pub fn select_many(&mut self, ids: Vec<String>) {
        let mut deduped: Vec<String> = Vec::with_capacity(ids.len());
        for id in ids {
            if !deduped.contains(&id) {
                deduped.push(id);
            }
        }
        self.anchor = deduped.first().cloned();
        self.selected = deduped;
    }

    pub fn clear_selection(&mut self) {
        self.selected.clear();
        self.anchor = None;
    }

    /// Apply a click on `id`.
    ///
    /// `order` is the full depth-first pre-order of non-root ids, regardless
    /// of which folders are collapsed.
    pub fn click(&mut self, id: &str, modifier: ClickModifier, order: &[&str]) {
        match modifier {
            ClickModifier::None => self.select_only(id),
            ClickModifier::Toggle => {
                if let Some(pos) = self.selected.iter().position(|s| s == id) {
                    self.selected.remove(pos);
                } else {
                    self.selected.insert(0, id.to_string());
                }
                self.anchor = Some(id.to_string());
            }
            ClickModifier::Range => {
                let anchor_pos = self
                    .anchor
                    .as_deref()
                    .and_then(|a| order.iter().position(|o| *o == a));
                let clicked_pos = order.iter().position(|o| *o == id);
                let (Some(from), Some(to)) = (anchor_pos, clicked_pos) else {
                    self.select_only(id);
                    return;
                };
                let (lo, hi) = if from <= to { (from, to) } else { (to, from) };
                let mut selected = vec![id.to_string()];
                selected.extend(
                    order[lo..=hi]
                        .iter()
                        .filter(|o| **o != id)
                        .map(|o| o.to_string()),
                );
                self.selected = selected;
                self.anchor = Some(id.to_string());
            }
        }
    }

    /// Drop selected ids and expansion entries that are no longer in the tree.
    pub fn retain_existing(&mut self, snapshot: &Snapshot) -> Vec<String> {
        let mut dropped = Vec::new();
        self.selected.retain(|id| {
            let keep = snapshot.contains(id);
            if !keep {
                dropped.push(id.clone());
            }
            keep
        });
        if let Some(anchor) = &self.anchor {
            if !snapshot.contains(anchor) {
                self.anchor = self.selected.first().cloned();
            }
        }
        self.expanded.retain(|id, _| snapshot.contains(id));
        dropped
    }
}

/// What the ephemeral store keeps for one view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedViewState {
    #[serde(default)]
    pub expanded: BTreeMap<String, bool>,
    /// Legacy single-selection field, still written for older readers.
    #[serde(default, alias = "selected_id")]
    pub primary_selected_id: Option<String>,
    #[serde(default)]
    pub selected_ids: Vec<String>,
}

/// Ephemeral per-view state storage.
pub trait ViewStateStore: Send + Sync {
    fn load(&self, view: &str) -> Result<Option<PersistedViewState>, SyncError>;

    fn save(&self, view: &str, state: &PersistedViewState) -> Result<(), SyncError>;
}

/// Process-local [`ViewStateStore`].
#[derive(Debug, Default)]
pub struct MemoryViewStateStore {
    views: Mutex<HashMap<String, PersistedViewState>>,
}

impl MemoryViewStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ViewStateStore for MemoryViewStateStore {
    fn load(&self, view: &str) -> Result<Option<PersistedViewState>, SyncError> {
        let views = self
            .views
            .lock()
            .map_err(|e| SyncError::Internal(format!("view state store poisoned: {}", e)))?;
        Ok(views.get(view).cloned())
    }

    fn save(&self, view: &str, state: &PersistedViewState) -> Result<(), SyncError> {
        let mut views = self
            .views
            .lock()
            .map_err(|e| SyncError::Internal(format!("view state store poisoned: {}", e)))?;
        views.insert(view.to_string(), state.clone());
        Ok(())
    }
}

/// Shareable location reference: `docs=a,b&tasks=c`.
///
/// Each view owns one entry holding its percent-encoded selected ids.
/// Entries of other views are kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationRef {
    entries: Vec<(String, String)>,
}

impl LocationRef {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.strip_prefix('?').unwrap_or(raw);
        let entries = raw
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (pair.to_string(), String::new()),
            })
            .collect();
        Self { entries }
    }

    /// Selected ids encoded for `view`; empty if the view has no entry.
    pub fn selection(&self, view: &str) -> Vec<String> {
        self.entries
            .iter()
            .find(|(k, _)| k == view)
            .map(|(_, v)| {
                v.split(',')
                    .filter(|id| !id.is_empty())
                    .filter_map(|id| urlencoding::decode(id).ok().map(|id| id.into_owned()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Replace the entry for `view`; an empty list removes it.
    pub fn set_selection(&mut self, view: &str, ids: &[String]) {
        if ids.is_empty() {
            self.entries.retain(|(k, _)| k != view);
            return;
        }
        let encoded = ids
            .iter()
            .map(|id| urlencoding::encode(id).into_owned())
            .collect::<Vec<_>>()
            .join(",");
        match self.entries.iter_mut().find(|(k, _)| k == view) {
            Some(entry) => entry.1 = encoded,
            None => self.entries.push((view.to_string(), encoded)),
        }
    }
}

impl std::fmt::Display for LocationRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, (k, v)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, "&")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        Ok(())
    }
}

/// Where a restored selection came from, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreSource {
    LocationRef,
    StoredList,
    LegacySingleId,
    None,
}

/// Restore progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestorePhase {
    Idle,
    /// Ancestors were expanded; waiting for the renderer to show them.
    ExpandPending { ids: Vec<String> },
    /// Ancestors are visible; the selection is about to be applied.
    Expanded { ids: Vec<String> },
    Selected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreOutcome {
    pub source: RestoreSource,
    /// Ids that still exist and will be selected.
    pub resolved: Vec<String>,
    /// Persisted ids that no longer exist.
    pub dropped: Vec<String>,
}

/// Selection state of one view plus the logic that persists and restores it.
#[derive(Debug)]
pub struct SelectionPersistence {
    view: String,
    state: SelectionState,
    phase: RestorePhase,
}

impl SelectionPersistence {
    pub fn new(view: impl Into<String>) -> Self {
        Self {
            view: view.into(),
            state: SelectionState::default(),
            phase: RestorePhase::Idle,
        }
    }

    pub fn view(&self) -> &str {
        &self.view
    }

    pub fn state(&self) -> &SelectionState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut SelectionState {
        &mut self.state
    }

    pub fn phase(&self) -> &RestorePhase {
        &self.phase
    }

    /// True between `begin_restore` and the selection being applied.
    pub fn is_restoring(&self) -> bool {
        matches!(
            self.phase,
            RestorePhase::ExpandPending { .. } | RestorePhase::Expanded { .. }
        )
    }

    pub fn click(&mut self, snapshot: &Snapshot, id: &str, modifier: ClickModifier) {
        let order = snapshot.preorder_ids();
        self.state.click(id, modifier, &order);
    }

    /// Reveal and select the node a notification points at.
    pub fn jump_to(&mut self, snapshot: &Snapshot, target: &JumpTarget) -> bool {
        if !snapshot.contains(&target.node_id) {
            return false;
        }
        for ancestor in &target.ancestor_ids {
            self.state.set_expanded(ancestor, true);
        }
        self.state.select_only(&target.node_id);
        true
    }

    /// Write the current state to both stores.
    ///
    /// Skipped while a restore is in progress so that restore-driven updates
    /// do not trigger another restore. Returns whether anything was written.
    pub fn persist(
        &self,
        store: &dyn ViewStateStore,
        location: &mut LocationRef,
    ) -> Result<bool, SyncError> {
        if self.is_restoring() {
            debug!("Skipping persist for view {} during restore", self.view);
            return Ok(false);
        }
        let persisted = PersistedViewState {
            expanded: self.state.expanded.clone(),
            primary_selected_id: self.state.primary().map(str::to_string),
            selected_ids: self.state.selected.clone(),
        };
        store.save(&self.view, &persisted)?;
        location.set_selection(&self.view, &self.state.selected);
        Ok(true)
    }

    /// Whether a changed location reference should trigger a restore.
    pub fn should_restore_from(&self, location: &LocationRef) -> bool {
        !self.is_restoring() && location.selection(&self.view) != self.state.selected
    }

    /// Resolve the persisted selection and expand its ancestors.
    ///
    /// Priority: location reference, then the stored id list, then the legacy
    /// single id. Ids missing from `snapshot` are dropped and both stores are
    /// rewritten without them; if none survive the view ends with no selection.
    pub fn begin_restore(
        &mut self,
        snapshot: &Snapshot,
        store: &dyn ViewStateStore,
        location: &mut LocationRef,
    ) -> Result<RestoreOutcome, SyncError> {
        let stored = store.load(&self.view)?.unwrap_or_default();

        for (id, open) in &stored.expanded {
            if snapshot.contains(id) {
                self.state.expanded.insert(id.clone(), *open);
            }
        }

        let from_location = location.selection(&self.view);
        let (source, candidates) = if !from_location.is_empty() {
            (RestoreSource::LocationRef, from_location)
        } else if !stored.selected_ids.is_empty() {
            (RestoreSource::StoredList, stored.selected_ids.clone())
        } else if let Some(id) = &stored.primary_selected_id {
            (RestoreSource::LegacySingleId, vec![id.clone()])
        } else {
            (RestoreSource::None, Vec::new())
        };

        let (resolved, dropped): (Vec<String>, Vec<String>) =
            candidates.into_iter().partition(|id| snapshot.contains(id));

        if resolved.is_empty() {
            if source != RestoreSource::None {
                debug!(
                    "Clearing stale selection for view {} ({} ids gone)",
                    self.view,
                    dropped.len()
                );
                self.rewrite_references(store, location, &[])?;
            }
            self.state.clear_selection();
            self.phase = RestorePhase::Idle;
            return Ok(RestoreOutcome {
                source,
                resolved,
                dropped,
            });
        }

        for id in &resolved {
            self.state.expand_ancestors(snapshot, id);
        }
        if !dropped.is_empty() {
            debug!(
                "Dropping {} vanished ids from the stored selection of view {}",
                dropped.len(),
                self.view
            );
            self.rewrite_references(store, location, &resolved)?;
        }
        self.phase = RestorePhase::ExpandPending {
            ids: resolved.clone(),
        };
        Ok(RestoreOutcome {
            source,
            resolved,
            dropped,
        })
    }

    /// Point both stores at `ids` only.
    fn rewrite_references(
        &self,
        store: &dyn ViewStateStore,
        location: &mut LocationRef,
        ids: &[String],
    ) -> Result<(), SyncError> {
        let persisted = PersistedViewState {
            expanded: self.state.expanded.clone(),
            primary_selected_id: ids.first().cloned(),
            selected_ids: ids.to_vec(),
        };
        store.save(&self.view, &persisted)?;
        location.set_selection(&self.view, ids);
        Ok(())
    }

    /// Completion signal from the renderer: expanded ancestors are visible.
    pub fn expansion_rendered(&mut self) -> bool {
        match std::mem::replace(&mut self.phase, RestorePhase::Idle) {
            RestorePhase::ExpandPending { ids } => {
                self.phase = RestorePhase::Expanded { ids };
                true
            }
            other => {
                self.phase = other;
                false
            }
        }
    }

    /// Apply the restored selection. Returns the selected ids.
    pub fn apply_restored_selection(&mut self) -> Option<&[String]> {
        match std::mem::replace(&mut self.phase, RestorePhase::Idle) {
            RestorePhase::Expanded { ids } => {
                self.state.select_many(ids);
                self.phase = RestorePhase::Selected;
                Some(self.state.selected())
            }
            other => {
                self.phase = other;
                None
            }
        }
    }

    /// Drive both restore phases at once, for callers without a renderer.
    pub fn complete_restore(&mut self) -> Option<&[String]> {
        self.expansion_rendered();
        self.apply_restored_selection()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;

    fn flat_tree() -> Snapshot {
        Snapshot::new(
            1,
            Node::root().with_children(vec![
                Node::leaf("a", "A"),
                Node::leaf("b", "B"),
                Node::leaf("c", "C"),
                Node::leaf("d", "D"),
                Node::leaf("e", "E"),
            ]),
        )
    }

    fn nested_tree() -> Snapshot {
        Snapshot::new(
            1,
            Node::root().with_children(vec![
                Node::folder("f1", "F1").with_children(vec![Node::folder("f2", "F2")
                    .with_children(vec![Node::leaf("deep", "Deep")])]),
                Node::leaf("top", "Top"),
            ]),
        )
    }

    fn sorted(ids: &[String]) -> Vec<String> {
        let mut v = ids.to_vec();
        v.sort();
        v
    }

    #[test]
    fn test_range_click_from_anchor() {
        let snap = flat_tree();
        let mut sel = SelectionPersistence::new("docs");
        sel.click(&snap, "a", ClickModifier::None);
        sel.click(&snap, "d", ClickModifier::Range);

        assert_eq!(sorted(sel.state().selected()), vec!["a", "b", "c", "d"]);
        assert_eq!(sel.state().anchor(), Some("d"));
        assert_eq!(sel.state().primary(), Some("d"));
    }

    #[test]
    fn test_range_click_backwards_and_ignores_collapse() {
        let snap = nested_tree();
        let mut sel = SelectionPersistence::new("docs");
        sel.click(&snap, "top", ClickModifier::None);
        sel.click(&snap, "f2", ClickModifier::Range);
        // f1 is collapsed, but its subtree still counts in the order.
        assert_eq!(sorted(sel.state().selected()), vec!["deep", "f2", "top"]);
    }

    #[test]
    fn test_toggle_click() {
        let snap = flat_tree();
        let mut sel = SelectionPersistence::new("docs");
        sel.click(&snap, "a", ClickModifier::None);
        sel.click(&snap, "c", ClickModifier::Toggle);
        assert_eq!(sel.state().selected(), &["c".to_string(), "a".to_string()]);
        assert_eq!(sel.state().anchor(), Some("c"));

        sel.click(&snap, "a", ClickModifier::Toggle);
        assert_eq!(sel.state().selected(), &["c".to_string()]);
        assert_eq!(sel.state().anchor(), Some("a"));

        // Range from the toggled-off anchor.
        sel.click(&snap, "b", ClickModifier::Range);
        assert_eq!(sorted(sel.state().selected()), vec!["a", "b"]);
    }

    #[test]
    fn test_range_without_anchor_is_plain_click() {
        let snap = flat_tree();
        let mut sel = SelectionPersistence::new("docs");
        sel.click(&snap, "c", ClickModifier::Range);
        assert_eq!(sel.state().selected(), &["c".to_string()]);
    }

    #[test]
    fn test_location_ref_roundtrip_keeps_other_views() {
        let mut loc = LocationRef::parse("?tasks=t1&docs=a%2Cb,c");
        assert_eq!(loc.selection("docs"), vec!["a,b", "c"]);
        assert_eq!(loc.selection("tasks"), vec!["t1"]);
        assert!(loc.selection("files").is_empty());

        loc.set_selection("docs", &["x y".to_string()]);
        assert_eq!(loc.to_string(), "tasks=t1&docs=x%20y");

        loc.set_selection("docs", &[]);
        assert_eq!(loc.to_string(), "tasks=t1");
    }

    #[test]
    fn test_restore_priority_location_first() {
        let snap = flat_tree();
        let store = MemoryViewStateStore::new();
        store
            .save(
                "docs",
                &PersistedViewState {
                    selected_ids: vec!["b".into()],
                    primary_selected_id: Some("c".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        let mut loc = LocationRef::parse("docs=e,d");

        let mut sel = SelectionPersistence::new("docs");
        let outcome = sel.begin_restore(&snap, &store, &mut loc).unwrap();
        assert_eq!(outcome.source, RestoreSource::LocationRef);
        assert_eq!(sel.complete_restore().unwrap(), &["e".to_string(), "d".to_string()]);
        assert_eq!(sel.state().anchor(), Some("e"));
    }

    #[test]
    fn test_restore_priority_fallbacks() {
        let snap = flat_tree();
        let store = MemoryViewStateStore::new();
        let mut loc = LocationRef::default();

        store
            .save(
                "docs",
                &PersistedViewState {
                    selected_ids: vec!["b".into(), "c".into()],
                    primary_selected_id: Some("b".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        let mut sel = SelectionPersistence::new("docs");
        let outcome = sel.begin_restore(&snap, &store, &mut loc).unwrap();
        assert_eq!(outcome.source, RestoreSource::StoredList);

        // Legacy documents only carry the single id.
        let legacy: PersistedViewState =
            serde_json::from_str(r#"{"expanded":{},"selected_id":"d"}"#).unwrap();
        store.save("docs", &legacy).unwrap();
        let mut sel = SelectionPersistence::new("docs");
        let outcome = sel.begin_restore(&snap, &store, &mut loc).unwrap();
        assert_eq!(outcome.source, RestoreSource::LegacySingleId);
        assert_eq!(sel.complete_restore().unwrap(), &["d".to_string()]);
    }

    #[test]
    fn test_restore_expands_before_selecting() {
        let snap = nested_tree();
        let store = MemoryViewStateStore::new();
        let mut loc = LocationRef::parse("docs=deep");
        let mut sel = SelectionPersistence::new("docs");

        sel.begin_restore(&snap, &store, &mut loc).unwrap();
        assert!(sel.is_restoring());
        assert!(sel.state().is_expanded("f1"));
        assert!(sel.state().is_expanded("f2"));
        assert!(sel.state().selected().is_empty());

        // Writes during restore are suppressed.
        assert!(!sel.persist(&store, &mut loc).unwrap());
        assert!(!sel.should_restore_from(&LocationRef::parse("docs=top")));

        assert!(sel.expansion_rendered());
        assert!(matches!(sel.phase(), RestorePhase::Expanded { .. }));
        sel.apply_restored_selection().unwrap();
        assert_eq!(sel.phase(), &RestorePhase::Selected);
        assert!(!sel.is_restoring());
        assert!(sel.persist(&store, &mut loc).unwrap());
    }

    #[test]
    fn test_restore_of_vanished_ids_clears_references() {
        let snap = flat_tree();
        let store = MemoryViewStateStore::new();
        store
            .save(
                "docs",
                &PersistedViewState {
                    selected_ids: vec!["zzz".into()],
                    primary_selected_id: Some("zzz".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        let mut loc = LocationRef::parse("tasks=t1&docs=gone");

        let mut sel = SelectionPersistence::new("docs");
        let outcome = sel.begin_restore(&snap, &store, &mut loc).unwrap();
        assert_eq!(outcome.source, RestoreSource::LocationRef);
        assert!(outcome.resolved.is_empty());
        assert_eq!(outcome.dropped, vec!["gone"]);
        assert_eq!(sel.phase(), &RestorePhase::Idle);
        assert!(sel.state().selected().is_empty());

        assert_eq!(loc.to_string(), "tasks=t1");
        let stored = store.load("docs").unwrap().unwrap();
        assert!(stored.selected_ids.is_empty());
        assert!(stored.primary_selected_id.is_none());
    }

    #[test]
    fn test_restore_prunes_vanished_ids_from_references() {
        let snap = flat_tree();
        let store = MemoryViewStateStore::new();
        store
            .save(
                "docs",
                &PersistedViewState {
                    selected_ids: vec!["gone".into(), "b".into()],
                    primary_selected_id: Some("gone".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        let mut loc = LocationRef::parse("docs=a,gone&tasks=t1");

        let mut sel = SelectionPersistence::new("docs");
        let outcome = sel.begin_restore(&snap, &store, &mut loc).unwrap();
        assert_eq!(outcome.resolved, vec!["a"]);
        assert_eq!(outcome.dropped, vec!["gone"]);
        assert_eq!(loc.to_string(), "docs=a&tasks=t1");
        let stored = store.load("docs").unwrap().unwrap();
        assert_eq!(stored.selected_ids, vec!["a"]);
        assert_eq!(stored.primary_selected_id.as_deref(), Some("a"));

        assert_eq!(sel.complete_restore().unwrap(), &["a".to_string()]);
        // Following the same link again finds nothing to restore.
        assert!(!sel.should_restore_from(&loc));
    }

    #[test]
    fn test_persist_writes_both_stores() {
        let snap = flat_tree();
        let store = MemoryViewStateStore::new();
        let mut loc = LocationRef::parse("tasks=t1");
        let mut sel = SelectionPersistence::new("docs");
        sel.click(&snap, "b", ClickModifier::None);
        sel.click(&snap, "c", ClickModifier::Toggle);
        sel.state_mut().set_expanded("b", true);

        assert!(sel.persist(&store, &mut loc).unwrap());
        let stored = store.load("docs").unwrap().unwrap();
        assert_eq!(stored.primary_selected_id.as_deref(), Some("c"));
        assert_eq!(stored.selected_ids, vec!["c", "b"]);
        assert_eq!(loc.selection("docs"), vec!["c", "b"]);
        assert_eq!(loc.selection("tasks"), vec!["t1"]);
    }

    #[test]
    fn test_jump_and_retain() {
        let snap = nested_tree();
        let mut sel = SelectionPersistence::new("docs");
        let target = JumpTarget {
            node_id: "deep".into(),
            ancestor_ids: vec!["f1".into(), "f2".into()],
        };
        assert!(sel.jump_to(&snap, &target));
        assert!(sel.state().is_expanded("f2"));
        assert_eq!(sel.state().selected(), &["deep".to_string()]);

        let pruned = Snapshot::new(2, Node::root().with_children(vec![Node::leaf("top", "Top")]));
        let dropped = sel.state_mut().retain_existing(&pruned);
        assert_eq!(dropped, vec!["deep"]);
        assert!(sel.state().selected().is_empty());
        assert!(sel.state().expanded().is_empty());
    }
}
