use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

/// Configuration for the treesync-local tool.
#[derive(Parser, Debug, Clone)]
#[command(name = "treesync-local")]
#[command(about = "In-process tree sync and collaborative locking for shared workspaces")]
pub struct Config {
    /// Workspace id the demo operates on
    #[arg(long, default_value = "default", env = "TREESYNC_WORKSPACE")]
    pub workspace: String,

    /// Seconds without a heartbeat after which a lock may be reclaimed
    #[arg(long, default_value = "600", env = "TREESYNC_LOCK_TTL_SECS")]
    pub lock_ttl_secs: u64,

    /// Seconds between heartbeats of an active edit session
    #[arg(long, default_value = "60", env = "TREESYNC_HEARTBEAT_SECS")]
    pub heartbeat_secs: u64,

    /// Milliseconds after a local change during which notifications are dropped
    #[arg(long, default_value = "2000", env = "TREESYNC_ECHO_WINDOW_MS")]
    pub echo_window_ms: u64,

    /// Notifications shown per change category in one refresh
    #[arg(long, default_value = "5", env = "TREESYNC_NOTIFY_LIMIT")]
    pub notify_limit: usize,

    /// Directory for persisted view state
    #[arg(long, env = "TREESYNC_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Diff two tree snapshots (JSON files) and print the changes as JSON
    Diff {
        previous: PathBuf,
        next: PathBuf,
        /// Print throttled notifications instead of the raw diff
        #[arg(long)]
        notifications: bool,
    },
    /// Run a scripted two-user session against an in-memory workspace
    Demo,
}

impl Config {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn echo_window(&self) -> Duration {
        Duration::from_millis(self.echo_window_ms)
    }

    /// Get the effective view-state directory.
    pub fn effective_state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("treesync")
                .join("views")
        })
    }
}
