//! Core types and logic for keeping collaborative workspace trees in sync.
//!
//! This crate holds everything that does not need a runtime:
//! - `node`: tree snapshot shape and traversal utilities
//! - `diff`: snapshot comparison into classified change events
//! - `lock`: the `LockManager` abstraction for per-node edit locks
//! - `echo`: self-echo suppression for locally caused notifications
//! - `notify`: per-category flood control with jump targets
//! - `selection`: click semantics, persistence and restore of view state
//! - `drag`: drop-target resolution and sequential move batches
//! - `feed`: change-feed messages and the tree source/mutation traits

mod diff;
mod drag;
mod echo;
mod error;
mod feed;
mod lock;
mod node;
mod notify;
mod selection;

pub use diff::{diff, ChangeEvent, ChangeKind, TreeDiff};
pub use drag::{
    active_ids, execute_moves, plan_moves, resolve_parent, validate_move, DropTarget,
    MoveBatchReport, MoveDecision, SkipReason, MAX_REPORTED_FAILURES,
};
pub use echo::{SelfEchoGuard, DEFAULT_ECHO_WINDOW};
pub use error::SyncError;
pub use feed::{ChangeFeedMessage, MutationReceipt, TreeMutations, TreeSource};
pub use lock::{
    ForceReleaseOutcome, HeartbeatOutcome, LockAcquireResult, LockManager, ReleaseOutcome,
    DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_LOCK_TTL,
};
pub use node::{
    ancestor_ids, build_path, find_by_id, find_by_id_mut, find_with_ancestors, flatten,
    is_descendant, preorder_ids, walk, FlatNode, LockInfo, Node, NodeType, Snapshot, WalkControl,
    ROOT_ID,
};
pub use notify::{throttle, JumpTarget, Notification, NotificationBatch, DEFAULT_NOTIFY_LIMIT};
pub use selection::{
    ClickModifier, LocationRef, MemoryViewStateStore, PersistedViewState, RestoreOutcome,
    RestorePhase, RestoreSource, SelectionPersistence, SelectionState, ViewStateStore,
};
