use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, instrument, warn};
use treesync_core::{
    diff, find_by_id_mut, throttle, ChangeFeedMessage, LockInfo, NotificationBatch,
    SelfEchoGuard, Snapshot, TreeSource,
};

/// What a tree view learns from its notifier.
#[derive(Debug, Clone, PartialEq)]
pub enum NotifierEvent {
    /// A fresh tree replaced the held snapshot.
    SnapshotInstalled { version: u64 },
    /// Changes made by someone else, after echo suppression and flood control.
    Notifications(NotificationBatch),
    /// A lock was applied to the held snapshot in place.
    LockChanged {
        node_id: String,
        lock: Option<LockInfo>,
    },
}

/// Result of a single fetch-and-diff cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Installed {
        version: u64,
        batch: Option<NotificationBatch>,
    },
    /// A newer response was installed first; this one was dropped.
    Stale,
    /// The fetch failed; the held snapshot is unchanged.
    Failed,
}

#[derive(Debug, Default)]
struct HeldSnapshot {
    snapshot: Option<Snapshot>,
    /// Request sequence of the installed snapshot.
    sequence: u64,
    /// Lock changes keyed by node, with the last request sequence issued
    /// when they arrived. A response whose request is not newer than that
    /// was fetched before the change and must not overwrite it.
    lock_updates: HashMap<String, (u64, Option<LockInfo>)>,
}

/// Keeps one view's snapshot current and turns tree changes into notifications.
///
/// One cycle is in flight at a time; signals arriving meanwhile collapse into
/// a single follow-up cycle. [`ChangeNotifier::force_refresh`] bypasses that
/// gate, so responses carry a request sequence and older ones are discarded.
pub struct ChangeNotifier {
    workspace_id: String,
    source: Arc<dyn TreeSource>,
    echo: Arc<SelfEchoGuard>,
    limit: usize,
    held: Mutex<HeldSnapshot>,
    in_flight: AtomicBool,
    pending: AtomicBool,
    sequence: AtomicU64,
    events: mpsc::UnboundedSender<NotifierEvent>,
}

impl ChangeNotifier {
    pub fn new(
        workspace_id: impl Into<String>,
        source: Arc<dyn TreeSource>,
        echo: Arc<SelfEchoGuard>,
        limit: usize,
    ) -> (Self, mpsc::UnboundedReceiver<NotifierEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let notifier = Self {
            workspace_id: workspace_id.into(),
            source,
            echo,
            limit,
            held: Mutex::new(HeldSnapshot::default()),
            in_flight: AtomicBool::new(false),
            pending: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
            events,
        };
        (notifier, rx)
    }

    fn held(&self) -> MutexGuard<'_, HeldSnapshot> {
        self.held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: NotifierEvent) {
        if self.events.send(event).is_err() {
            debug!("Notifier events for {} have no receiver", self.workspace_id);
        }
    }

    /// Copy of the held snapshot, if one has been installed.
    pub fn snapshot(&self) -> Option<Snapshot> {
        self.held().snapshot.clone()
    }

    pub fn version(&self) -> u64 {
        self.held().snapshot.as_ref().map_or(0, |s| s.version)
    }

    /// React to a "tree changed" signal that arrived at `arrived_at`.
    ///
    /// Returns at once if a cycle is already running; that cycle then runs
    /// once more when it finishes. A follow-up cycle is echo-checked against
    /// its own start time.
    pub async fn request_refresh(&self, arrived_at: Instant) {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            self.pending.store(true, Ordering::Release);
            debug!("Refresh of {} already in flight, coalescing", self.workspace_id);
            return;
        }

        let mut arrived_at = arrived_at;
        loop {
            self.refresh_once(arrived_at).await;

            if self.pending.swap(false, Ordering::AcqRel) {
                arrived_at = Instant::now();
                continue;
            }
            self.in_flight.store(false, Ordering::Release);
            // A signal may have slipped in between the check and the release.
            if self.pending.load(Ordering::Acquire)
                && !self.in_flight.swap(true, Ordering::AcqRel)
            {
                self.pending.store(false, Ordering::Release);
                arrived_at = Instant::now();
                continue;
            }
            break;
        }
    }

    /// Fetch now, regardless of any cycle in flight.
    ///
    /// Used after local batches and on first load.
    pub async fn force_refresh(&self) -> RefreshOutcome {
        self.refresh_once(Instant::now()).await
    }

    #[instrument(skip(self), level = "debug", fields(workspace_id = %self.workspace_id))]
    async fn refresh_once(&self, arrived_at: Instant) -> RefreshOutcome {
        let sequence = self.sequence.fetch_add(1, Ordering::AcqRel) + 1;

        let root = match self.source.fetch_tree(&self.workspace_id).await {
            Ok(root) => root,
            Err(e) => {
                warn!(
                    "Refresh of {} failed, keeping snapshot: {}",
                    self.workspace_id, e
                );
                return RefreshOutcome::Failed;
            }
        };

        let (version, batch) = {
            let mut held = self.held();
            if sequence <= held.sequence {
                warn!(
                    "Discarding stale response #{} for {} (installed #{})",
                    sequence, self.workspace_id, held.sequence
                );
                return RefreshOutcome::Stale;
            }

            let version = held.snapshot.as_ref().map_or(1, |s| s.version + 1);
            let mut fresh = Snapshot::new(version, root);
            for (node_id, (seen_at, lock)) in &held.lock_updates {
                if *seen_at >= sequence {
                    if let Some(node) = find_by_id_mut(&mut fresh.root, node_id) {
                        debug!("Keeping newer lock state of {} over fetched tree", node_id);
                        node.lock = lock.clone();
                    }
                }
            }

            let batch = match &held.snapshot {
                None => None,
                Some(_) if self.echo.is_echo_at(arrived_at) => {
                    debug!("Dropping notifications for {}: own change", self.workspace_id);
                    None
                }
                Some(previous) => {
                    let changes = diff(&previous.root, &fresh.root);
                    let batch = throttle(&changes, &fresh, self.limit);
                    if batch.suppressed_total() > 0 {
                        debug!(
                            "Suppressed {} notifications for {}",
                            batch.suppressed_total(),
                            self.workspace_id
                        );
                    }
                    (!batch.is_empty()).then_some(batch)
                }
            };

            held.snapshot = Some(fresh);
            held.sequence = sequence;
            // Later responses all come from newer requests.
            held.lock_updates.retain(|_, (seen_at, _)| *seen_at > sequence);
            (version, batch)
        };

        debug!("Installed snapshot v{} for {}", version, self.workspace_id);
        self.emit(NotifierEvent::SnapshotInstalled { version });
        if let Some(batch) = &batch {
            self.emit(NotifierEvent::Notifications(batch.clone()));
        }
        RefreshOutcome::Installed { version, batch }
    }

    /// Apply a lock change to the held snapshot without fetching.
    ///
    /// Unknown nodes are not changed now, but a fetch already in flight gets the
    /// lock applied when it installs.
    pub fn apply_lock(&self, node_id: &str, lock: Option<LockInfo>) -> bool {
        let applied = {
            let mut held = self.held();
            let seen_at = self.sequence.load(Ordering::Acquire);
            held.lock_updates.insert(node_id.to_string(), (seen_at, lock.clone()));
            match held
                .snapshot
                .as_mut()
                .and_then(|s| find_by_id_mut(&mut s.root, node_id))
            {
                Some(node) => {
                    node.lock = lock.clone();
                    true
                }
                None => false,
            }
        };

        if applied {
            self.emit(NotifierEvent::LockChanged {
                node_id: node_id.to_string(),
                lock,
            });
        } else {
            debug!("Lock change for unknown node {} ignored", node_id);
        }
        applied
    }

    /// Consume the change feed until it closes.
    ///
    /// Refreshes run on their own tasks so that signals arriving during a
    /// cycle reach the coalescing gate.
    pub async fn run(self: Arc<Self>, feed: broadcast::Receiver<ChangeFeedMessage>) {
        info!("Watching change feed for {}", self.workspace_id);
        let mut stream = BroadcastStream::new(feed);

        while let Some(item) = stream.next().await {
            match item {
                Ok(message) if message.workspace_id() != self.workspace_id => {}
                Ok(ChangeFeedMessage::TreeChanged { .. }) => self.spawn_refresh(),
                Ok(ChangeFeedMessage::LockChanged { node_id, lock, .. }) => {
                    self.apply_lock(&node_id, lock);
                }
                Err(BroadcastStreamRecvError::Lagged(missed)) => {
                    warn!(
                        "Change feed for {} lagged by {} messages, refreshing",
                        self.workspace_id, missed
                    );
                    self.spawn_refresh();
                }
            }
        }

        info!("Change feed for {} closed", self.workspace_id);
    }

    fn spawn_refresh(self: &Arc<Self>) {
        let arrived_at = Instant::now();
        let this = Arc::clone(self);
        tokio::spawn(async move { this.request_refresh(arrived_at).await });
    }
}

impl std::fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("workspace_id", &self.workspace_id)
            .field("limit", &self.limit)
            .field("version", &self.version())
            .field("in_flight", &self.in_flight.load(Ordering::Relaxed))
            .finish()
    }
}
