use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Window after a local mutation during which inbound notifications are dropped.
pub const DEFAULT_ECHO_WINDOW: Duration = Duration::from_millis(2000);

/// Drops change notifications that are most likely echoes of our own writes.
///
/// Every local mutation calls [`SelfEchoGuard::stamp`] before sending its
/// request. A notification arriving strictly less than `window` after the
/// last stamp is discarded whole. A genuinely concurrent change from another
/// client landing inside the window is masked as well.
#[derive(Debug)]
pub struct SelfEchoGuard {
    window: Duration,
    last_local_change: Mutex<Option<Instant>>,
}

impl SelfEchoGuard {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_local_change: Mutex::new(None),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a local mutation happening now.
    pub fn stamp(&self) {
        self.stamp_at(Instant::now());
    }

    pub fn stamp_at(&self, at: Instant) {
        let mut last = self
            .last_local_change
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Keep the stamp monotonic even if callers pass instants out of order.
        if last.map_or(true, |prev| at > prev) {
            *last = Some(at);
        }
    }

    pub fn last_stamp(&self) -> Option<Instant> {
        *self
            .last_local_change
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether a notification arriving now should be dropped.
    pub fn is_echo(&self) -> bool {
        self.is_echo_at(Instant::now())
    }

    pub fn is_echo_at(&self, arrived_at: Instant) -> bool {
        match self.last_stamp() {
            None => false,
            // `saturating_duration_since` maps arrivals before the stamp to zero.
            Some(stamp) => arrived_at.saturating_duration_since(stamp) < self.window,
        }
    }
}

impl Default for SelfEchoGuard {
    fn default() -> Self {
        Self::new(DEFAULT_ECHO_WINDOW)
    }
}
