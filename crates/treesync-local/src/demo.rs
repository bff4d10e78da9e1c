use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use treesync_core::{
    ClickModifier, DropTarget, LocationRef, Notification, NodeType, ViewStateStore, ROOT_ID,
};

use crate::config::Config;
use crate::feed::ChangeFeed;
use crate::lock::{EditStart, MemoryLock};
use crate::session::{SessionBackends, SessionOptions, SessionUser, TreeViewSession};
use crate::view_state::FileViewStateStore;
use crate::watch::NotifierEvent;
use crate::workspace::MemoryWorkspace;

const VIEW: &str = "docs";

/// How long to wait for more events before considering a session quiet.
const SETTLE: Duration = Duration::from_millis(200);

/// Alice and Bob share one workspace: create, lock, edit, move, bulk-create.
pub async fn run(config: &Config) -> anyhow::Result<()> {
    let feed = ChangeFeed::default();
    let locks = Arc::new(MemoryLock::new(config.lock_ttl()).with_feed(feed.clone()));
    let workspace = Arc::new(MemoryWorkspace::new(Arc::clone(&locks), feed.clone()));
    let state_dir = config.effective_state_dir();
    info!("View state under {}", state_dir.display());
    info!("Locks lapse after {}s without a heartbeat", locks.ttl().as_secs());

    let options = SessionOptions {
        echo_window: config.echo_window(),
        notify_limit: config.notify_limit,
        heartbeat_interval: config.heartbeat_interval(),
    };
    let open = |user: SessionUser| {
        let store: Arc<dyn ViewStateStore> =
            Arc::new(FileViewStateStore::new(state_dir.join(&user.id)));
        let backends = SessionBackends {
            source: workspace.clone(),
            mutations: workspace.clone(),
            locks: locks.clone(),
            store,
        };
        TreeViewSession::new(&config.workspace, VIEW, user, backends, options.clone())
    };

    let mut alice = open(SessionUser::new("alice", "Alice"));
    let mut bob = open(SessionUser::new("bob", "Bob"));
    alice.load(LocationRef::default()).await?;
    bob.load(LocationRef::default()).await?;
    alice.attach(feed.subscribe());
    bob.attach(feed.subscribe());

    // Alice lays out the workspace; Bob hears about it.
    let specs = alice.create_folder(ROOT_ID, "Specs").await?;
    let design = alice.create(&specs.id, "Design", NodeType::Leaf).await?;
    let roadmap = alice.create(ROOT_ID, "Roadmap", NodeType::Leaf).await?;
    drain(&mut bob).await;
    drain(&mut alice).await;

    // Both try to edit Design.
    let EditStart::Editing(editing) = alice.begin_edit(&design.id).await? else {
        anyhow::bail!("Alice could not lock a fresh document");
    };
    info!(
        "{} is editing {} since {}",
        alice.user().name,
        editing.node_id(),
        editing.lock().acquired_at
    );
    if let EditStart::Locked(holder) = bob.begin_edit(&design.id).await? {
        info!("{} opens Design read-only: locked by {}", bob.user().name, holder.holder_name);
    }
    alice
        .update_content(&design.id, "# Design\n\nFirst draft.")
        .await?;
    editing.release().await?;
    match bob.begin_edit(&design.id).await? {
        EditStart::Editing(session) => {
            info!("{} took over Design", bob.user().name);
            session.release().await?;
        }
        EditStart::Locked(holder) => warn!("Design still locked by {}", holder.holder_name),
    }
    drain(&mut bob).await;

    // Let Alice's echo window pass so she hears Bob's changes.
    tokio::time::sleep(config.echo_window()).await;
    drain(&mut alice).await;

    bob.click(&design.id, ClickModifier::None)?;
    bob.click(&roadmap.id, ClickModifier::Toggle)?;
    let report = bob.drop_nodes(&design.id, &DropTarget::RootZone).await?;
    info!("{} dropped Design and Roadmap on the root: {}", bob.user().name, report.summary());

    let heard = drain(&mut alice).await;
    if let Some(moved) = heard.iter().find(|n| n.jump.is_some()) {
        alice.jump_to(moved)?;
        info!(
            "{} jumped to {:?}; link is now ?{}",
            alice.user().name,
            alice.selection().selected(),
            alice.location()
        );
    }

    // A bulk import floods at most `notify_limit` notifications per category.
    let bulk = bob.create_folder(ROOT_ID, "Imported").await?;
    for i in 1..=8 {
        bob.create(&bulk.id, &format!("Page {}", i), NodeType::Leaf)
            .await?;
    }
    let copy = bob.copy(&specs.id).await?;
    info!(
        "{} copied Specs to {} in {}",
        bob.user().name,
        copy.name,
        bob.workspace_id()
    );
    drain(&mut alice).await;

    // Bob follows Alice's link; Alice reopens from it in a fresh session.
    let link = alice.location().clone();
    if let Some(followed) = bob.navigate(link.clone())? {
        info!("{} followed the link to {:?}", bob.user().name, followed.resolved);
    }
    bob.toggle_expanded(&specs.id)?;

    let mut reopened = open(SessionUser::new("alice", "Alice"));
    let outcome = reopened.load(link).await?;
    info!(
        "Reopened with {:?} from {:?}, folder Specs expanded: {}",
        outcome.resolved,
        outcome.source,
        reopened.selection().is_expanded(&specs.id)
    );

    let tree = reopened.snapshot()?;
    println!("{}", serde_json::to_string_pretty(&tree)?);
    Ok(())
}

/// Log every notification a session receives until it goes quiet.
async fn drain(session: &mut TreeViewSession) -> Vec<Notification> {
    let mut heard = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout(SETTLE, session.next_event()).await {
        let NotifierEvent::Notifications(batch) = event else {
            continue;
        };
        for notification in &batch.notifications {
            info!("[{}] {}", session.user().name, notification.message());
        }
        for (kind, count) in &batch.suppressed {
            info!("[{}] ...and {} more {}", session.user().name, count, kind);
        }
        heard.extend(batch.notifications);
    }
    heard
}
