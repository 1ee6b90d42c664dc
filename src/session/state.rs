//! Call state shared by the pumps and the lifecycle observer

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::watch;

/// Flags coordinating one call.
///
/// `active` only turns on once `connected` and `has_permission` are both
/// set, and once it turns off it stays off for the life of the instance.
#[derive(Debug)]
pub struct SessionState {
    connected: AtomicBool,
    active: AtomicBool,
    has_permission: AtomicBool,
    ended: AtomicBool,
    /// Mirrors `active` for waiters blocked on socket reads
    stop_tx: watch::Sender<bool>,
}

impl SessionState {
    pub fn new() -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            connected: AtomicBool::new(false),
            active: AtomicBool::new(false),
            has_permission: AtomicBool::new(false),
            ended: AtomicBool::new(false),
            stop_tx,
        }
    }

    pub fn set_permission(&self, granted: bool) {
        self.has_permission.store(granted, Ordering::SeqCst);
    }

    pub fn has_permission(&self) -> bool {
        self.has_permission.load(Ordering::SeqCst)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Turn the call on. Returns false if preconditions are not met or
    /// the call has already been stopped.
    pub fn activate(&self) -> bool {
        if !self.is_connected() || !self.has_permission() || self.ended.load(Ordering::SeqCst) {
            return false;
        }
        self.active.store(true, Ordering::SeqCst);
        self.stop_tx.send_replace(true);
        true
    }

    /// Turn the call off. Returns true only for the call that flipped it.
    pub fn deactivate(&self) -> bool {
        self.ended.store(true, Ordering::SeqCst);
        let was_active = self.active.swap(false, Ordering::SeqCst);
        self.stop_tx.send_replace(false);
        was_active
    }

    /// Receiver that observes `active`; resolves `wait_for(|a| !*a)` once
    /// the call is stopped
    pub fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Running counters for one call
#[derive(Debug, Default)]
pub struct CallStats {
    frames_sent: AtomicU64,
    bytes_sent: AtomicU64,
    frames_received: AtomicU64,
    bytes_received: AtomicU64,
    capture_warnings: AtomicU64,
    short_reads: AtomicU64,
}

impl CallStats {
    pub fn record_sent(&self, bytes: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_received(&self, bytes: usize) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_capture_warning(&self) {
        self.capture_warnings.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_short_read(&self) {
        self.short_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            capture_warnings: self.capture_warnings.load(Ordering::Relaxed),
            short_reads: self.short_reads.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`CallStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StatsSnapshot {
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub frames_received: u64,
    pub bytes_received: u64,
    pub capture_warnings: u64,
    pub short_reads: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activate_requires_connection_and_permission() {
        let state = SessionState::new();
        assert!(!state.activate());

        state.set_permission(true);
        assert!(!state.activate());
        assert!(!state.is_active());

        state.set_connected(true);
        assert!(state.activate());
        assert!(state.is_active());
    }

    #[test]
    fn test_no_revival_after_deactivate() {
        let state = SessionState::new();
        state.set_permission(true);
        state.set_connected(true);
        assert!(state.activate());

        assert!(state.deactivate());
        assert!(!state.deactivate());
        assert!(!state.activate());
        assert!(!state.is_active());
    }

    #[test]
    fn test_stop_signal_follows_active() {
        let state = SessionState::new();
        let rx = state.stop_signal();
        assert!(!*rx.borrow());

        state.set_permission(true);
        state.set_connected(true);
        state.activate();
        assert!(*rx.borrow());

        state.deactivate();
        assert!(!*rx.borrow());
    }

    #[test]
    fn test_stats_snapshot() {
        let stats = CallStats::default();
        stats.record_sent(640);
        stats.record_sent(320);
        stats.record_received(100);
        stats.record_short_read();
        stats.record_capture_warning();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.frames_sent, 2);
        assert_eq!(snapshot.bytes_sent, 960);
        assert_eq!(snapshot.frames_received, 1);
        assert_eq!(snapshot.bytes_received, 100);
        assert_eq!(snapshot.short_reads, 1);
        assert_eq!(snapshot.capture_warnings, 1);
    }
}
