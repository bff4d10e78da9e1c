mod config;
mod demo;
mod feed;
mod lock;
mod session;
mod view_state;
mod watch;
mod workspace;

use std::path::Path;

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use treesync_core::{diff, throttle, Node, Snapshot};

use config::{Command, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::parse();

    if config.heartbeat_secs >= config.lock_ttl_secs {
        warn!(
            "Heartbeat every {}s does not keep locks with a {}s TTL alive",
            config.heartbeat_secs, config.lock_ttl_secs
        );
    }

    match &config.command {
        Command::Diff {
            previous,
            next,
            notifications,
        } => {
            let previous = read_tree(previous)?;
            let next = read_tree(next)?;
            let changes = diff(&previous.root, &next.root);
            info!("{} changes between snapshots", changes.len());

            let out = if *notifications {
                serde_json::to_string_pretty(&throttle(&changes, &next, config.notify_limit))?
            } else {
                serde_json::to_string_pretty(&changes)?
            };
            println!("{}", out);
        }
        Command::Demo => {
            info!("Starting demo on workspace {}", config.workspace);
            info!("  Lock TTL: {}s", config.lock_ttl_secs);
            info!("  Heartbeat: {}s", config.heartbeat_secs);
            info!("  Echo window: {}ms", config.echo_window_ms);
            demo::run(&config).await?;
        }
    }

    Ok(())
}

/// Snapshot files hold either `{version, root}` or a bare root node.
#[derive(Deserialize)]
#[serde(untagged)]
enum TreeFile {
    Snapshot(Snapshot),
    Root(Node),
}

fn read_tree(path: &Path) -> anyhow::Result<Snapshot> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let tree: TreeFile = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(match tree {
        TreeFile::Snapshot(snapshot) => snapshot,
        TreeFile::Root(root) => Snapshot::new(0, root),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_tree_accepts_both_shapes() {
        let temp = TempDir::new().unwrap();
        let bare = temp.path().join("bare.json");
        let wrapped = temp.path().join("wrapped.json");
        std::fs::write(
            &bare,
            r#"{"id":"root","name":"root","type":"folder","children":[{"id":"d1","name":"Doc1","type":"leaf"}]}"#,
        )
        .unwrap();
        std::fs::write(
            &wrapped,
            r#"{"version":7,"root":{"id":"root","name":"root","type":"folder"}}"#,
        )
        .unwrap();

        let bare = read_tree(&bare).unwrap();
        assert_eq!(bare.version, 0);
        assert!(bare.contains("d1"));

        let wrapped = read_tree(&wrapped).unwrap();
        assert_eq!(wrapped.version, 7);
        assert!(wrapped.root.children.is_empty());

        let changes = diff(&bare.root, &wrapped.root);
        assert_eq!(changes.deleted.len(), 1);
        assert_eq!(changes.deleted[0].path.as_deref(), Some("Doc1"));
    }

    #[test]
    fn test_read_tree_reports_bad_files() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("broken.json");
        std::fs::write(&path, "[1, 2]").unwrap();
        let err = read_tree(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
        assert!(read_tree(&temp.path().join("missing.json")).is_err());
    }
}
