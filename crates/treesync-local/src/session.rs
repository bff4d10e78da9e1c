use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use treesync_core::{
    active_ids, execute_moves, plan_moves, ChangeFeedMessage, ClickModifier, DropTarget,
    ForceReleaseOutcome, LocationRef, LockManager, MoveBatchReport, MoveDecision,
    MutationReceipt, NodeType, Notification, RestoreOutcome, SelectionPersistence,
    SelectionState, SelfEchoGuard, Snapshot, SyncError, TreeMutations, TreeSource,
    ViewStateStore, DEFAULT_ECHO_WINDOW, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_NOTIFY_LIMIT,
};

use crate::lock::{EditSession, EditStart};
use crate::watch::{ChangeNotifier, NotifierEvent, RefreshOutcome};

/// Who is looking at the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub id: String,
    pub name: String,
}

impl SessionUser {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Collaborators a session talks to.
#[derive(Clone)]
pub struct SessionBackends {
    pub source: Arc<dyn TreeSource>,
    pub mutations: Arc<dyn TreeMutations>,
    pub locks: Arc<dyn LockManager>,
    pub store: Arc<dyn ViewStateStore>,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub echo_window: Duration,
    pub notify_limit: usize,
    pub heartbeat_interval: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            echo_window: DEFAULT_ECHO_WINDOW,
            notify_limit: DEFAULT_NOTIFY_LIMIT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

/// One user's view of one workspace tree.
///
/// Owns the notifier (and through it the held snapshot), the view's
/// selection, and the location reference. Every mutation stamps the echo
/// guard first and refreshes right after, so the user's own changes update
/// the tree without notifying them.
pub struct TreeViewSession {
    workspace_id: String,
    user: SessionUser,
    backends: SessionBackends,
    echo: Arc<SelfEchoGuard>,
    notifier: Arc<ChangeNotifier>,
    events: mpsc::UnboundedReceiver<NotifierEvent>,
    selection: SelectionPersistence,
    location: LocationRef,
    heartbeat_interval: Duration,
    feed_task: Option<JoinHandle<()>>,
}

impl TreeViewSession {
    pub fn new(
        workspace_id: impl Into<String>,
        view: impl Into<String>,
        user: SessionUser,
        backends: SessionBackends,
        options: SessionOptions,
    ) -> Self {
        let workspace_id = workspace_id.into();
        let echo = Arc::new(SelfEchoGuard::new(options.echo_window));
        let (notifier, events) = ChangeNotifier::new(
            workspace_id.clone(),
            Arc::clone(&backends.source),
            Arc::clone(&echo),
            options.notify_limit,
        );

        Self {
            workspace_id,
            user,
            backends,
            echo,
            notifier: Arc::new(notifier),
            events,
            selection: SelectionPersistence::new(view),
            location: LocationRef::default(),
            heartbeat_interval: options.heartbeat_interval,
            feed_task: None,
        }
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    pub fn user(&self) -> &SessionUser {
        &self.user
    }

    pub fn selection(&self) -> &SelectionState {
        self.selection.state()
    }

    pub fn location(&self) -> &LocationRef {
        &self.location
    }

    pub fn snapshot(&self) -> Result<Snapshot, SyncError> {
        self.notifier.snapshot().ok_or_else(|| {
            SyncError::Internal(format!("no tree loaded for {}", self.workspace_id))
        })
    }

    /// Start following the change feed. Replaces any earlier subscription.
    pub fn attach(&mut self, feed: broadcast::Receiver<ChangeFeedMessage>) {
        if let Some(task) = self.feed_task.take() {
            task.abort();
        }
        let notifier = Arc::clone(&self.notifier);
        self.feed_task = Some(tokio::spawn(notifier.run(feed)));
    }

    /// Fetch the tree and restore the view's selection.
    ///
    /// The selection in `location` wins over whatever the view-state store
    /// remembers; vanished ids are dropped.
    pub async fn load(&mut self, location: LocationRef) -> Result<RestoreOutcome, SyncError> {
        self.location = location;
        if self.notifier.force_refresh().await == RefreshOutcome::Failed {
            return Err(SyncError::Fetch(format!(
                "could not load tree for {}",
                self.workspace_id
            )));
        }
        let outcome = self.restore()?;
        info!(
            "{} opened {} ({:?}: {} selected, {} dropped)",
            self.user.name,
            self.workspace_id,
            outcome.source,
            outcome.resolved.len(),
            outcome.dropped.len()
        );
        Ok(outcome)
    }

    /// Follow a changed location reference, e.g. a pasted deep link.
    pub fn navigate(&mut self, location: LocationRef) -> Result<Option<RestoreOutcome>, SyncError> {
        if !self.selection.should_restore_from(&location) {
            return Ok(None);
        }
        self.location = location;
        self.restore().map(Some)
    }

    fn restore(&mut self) -> Result<RestoreOutcome, SyncError> {
        let snapshot = self.snapshot()?;
        let outcome = self.selection.begin_restore(
            &snapshot,
            self.backends.store.as_ref(),
            &mut self.location,
        )?;
        self.selection.complete_restore();
        Ok(outcome)
    }

    fn persist(&mut self) -> Result<(), SyncError> {
        self.selection
            .persist(self.backends.store.as_ref(), &mut self.location)?;
        Ok(())
    }

    pub fn click(&mut self, node_id: &str, modifier: ClickModifier) -> Result<(), SyncError> {
        let snapshot = self.snapshot()?;
        self.selection.click(&snapshot, node_id, modifier);
        self.persist()
    }

    pub fn toggle_expanded(&mut self, node_id: &str) -> Result<bool, SyncError> {
        let expanded = self.selection.state_mut().toggle_expanded(node_id);
        self.persist()?;
        Ok(expanded)
    }

    /// Reveal and select the node a notification points at.
    pub fn jump_to(&mut self, notification: &Notification) -> Result<bool, SyncError> {
        let Some(target) = &notification.jump else {
            return Ok(false);
        };
        let snapshot = self.snapshot()?;
        if !self.selection.jump_to(&snapshot, target) {
            debug!("Jump target {} is gone", target.node_id);
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }

    /// Drop selection and expansion entries for nodes no longer in the tree.
    fn reconcile(&mut self) -> Result<(), SyncError> {
        let Some(snapshot) = self.notifier.snapshot() else {
            return Ok(());
        };
        let dropped = self.selection.state_mut().retain_existing(&snapshot);
        if !dropped.is_empty() {
            debug!("Deselected {} vanished nodes", dropped.len());
            self.persist()?;
        }
        Ok(())
    }

    async fn refresh_after_mutation(&mut self) -> Result<(), SyncError> {
        if self.notifier.force_refresh().await == RefreshOutcome::Failed {
            warn!("Tree refresh after local change failed; waiting for the feed");
        }
        self.reconcile()
    }

    pub async fn create(
        &mut self,
        parent_id: &str,
        name: &str,
        node_type: NodeType,
    ) -> Result<MutationReceipt, SyncError> {
        self.echo.stamp();
        let receipt = self
            .backends
            .mutations
            .create_node(&self.workspace_id, parent_id, name, node_type)
            .await?;
        self.refresh_after_mutation().await?;
        Ok(receipt)
    }

    /// Create a folder and select it right away.
    pub async fn create_folder(
        &mut self,
        parent_id: &str,
        name: &str,
    ) -> Result<MutationReceipt, SyncError> {
        let receipt = self.create(parent_id, name, NodeType::Folder).await?;
        if let Some(snapshot) = self.notifier.snapshot() {
            self.selection
                .state_mut()
                .expand_ancestors(&snapshot, &receipt.id);
        }
        self.selection.state_mut().select_only(&receipt.id);
        self.persist()?;
        Ok(receipt)
    }

    pub async fn rename(&mut self, node_id: &str, name: &str) -> Result<MutationReceipt, SyncError> {
        self.echo.stamp();
        let receipt = self
            .backends
            .mutations
            .rename_node(&self.workspace_id, node_id, name)
            .await?;
        self.refresh_after_mutation().await?;
        Ok(receipt)
    }

    pub async fn delete(&mut self, node_id: &str) -> Result<(), SyncError> {
        self.echo.stamp();
        self.backends
            .mutations
            .delete_node(&self.workspace_id, node_id)
            .await?;
        self.refresh_after_mutation().await
    }

    pub async fn update_content(
        &mut self,
        node_id: &str,
        content: &str,
    ) -> Result<MutationReceipt, SyncError> {
        self.echo.stamp();
        let receipt = self
            .backends
            .mutations
            .update_content(&self.workspace_id, node_id, content)
            .await?;
        self.refresh_after_mutation().await?;
        Ok(receipt)
    }

    /// Duplicate `node_id` beside itself.
    pub async fn copy(&mut self, node_id: &str) -> Result<MutationReceipt, SyncError> {
        self.echo.stamp();
        let receipt = self
            .backends
            .mutations
            .copy_node(&self.workspace_id, node_id)
            .await?;
        self.refresh_after_mutation().await?;
        Ok(receipt)
    }

    /// Move the dragged node (or the selection it belongs to) onto `target`.
    pub async fn drop_nodes(
        &mut self,
        dragged: &str,
        target: &DropTarget,
    ) -> Result<MoveBatchReport, SyncError> {
        let snapshot = self.snapshot()?;
        let active = active_ids(dragged, self.selection.state());
        let plan = plan_moves(&snapshot, &active, target);

        if !plan.iter().any(|d| matches!(d, MoveDecision::Move { .. })) {
            debug!("Drop of {} changes nothing", dragged);
            return Ok(MoveBatchReport {
                skipped: plan.len(),
                ..Default::default()
            });
        }

        self.echo.stamp();
        let report = execute_moves(
            self.backends.mutations.as_ref(),
            &self.workspace_id,
            &snapshot,
            &plan,
        )
        .await;
        self.refresh_after_mutation().await?;

        if report.failed() > 0 {
            warn!("Move batch in {}: {}", self.workspace_id, report.summary());
        } else {
            info!("Move batch in {}: {}", self.workspace_id, report.summary());
        }
        Ok(report)
    }

    /// Lock `node_id` for editing, or learn who holds it.
    pub async fn begin_edit(&self, node_id: &str) -> Result<EditStart, SyncError> {
        EditSession::begin(
            Arc::clone(&self.backends.locks),
            &self.workspace_id,
            node_id,
            &self.user.id,
            &self.user.name,
            self.heartbeat_interval,
        )
        .await
    }

    /// Break someone else's lock.
    pub async fn force_unlock(&self, node_id: &str) -> Result<ForceReleaseOutcome, SyncError> {
        info!(
            "{} force-unlocking {}/{}",
            self.user.name, self.workspace_id, node_id
        );
        self.backends
            .locks
            .force_release(&self.workspace_id, node_id)
            .await
    }

    fn observe(&mut self, event: &NotifierEvent) {
        if let NotifierEvent::SnapshotInstalled { .. } = event {
            if let Err(e) = self.reconcile() {
                warn!("Failed to persist reconciled selection: {}", e);
            }
        }
    }

    /// Wait for the next notifier event.
    pub async fn next_event(&mut self) -> Option<NotifierEvent> {
        let event = self.events.recv().await?;
        self.observe(&event);
        Some(event)
    }

    /// Next notifier event if one is already queued.
    pub fn try_next_event(&mut self) -> Option<NotifierEvent> {
        let event = self.events.try_recv().ok()?;
        self.observe(&event);
        Some(event)
    }
}

impl std::fmt::Debug for TreeViewSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeViewSession")
            .field("workspace_id", &self.workspace_id)
            .field("user", &self.user)
            .field("view", &self.selection.view())
            .field("notifier", &self.notifier)
            .finish()
    }
}

impl Drop for TreeViewSession {
    fn drop(&mut self) {
        if let Some(task) = self.feed_task.take() {
            task.abort();
        }
    }
}
