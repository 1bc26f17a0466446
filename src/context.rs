//! Per-session run bookkeeping.
//!
//! A session services at most one run at a time, so nothing here races
//! within a connection. The state still lives behind a `Mutex`/atomics
//! because two other threads legitimately look at it: the cancellation
//! controller closure (same thread, but a `'static` capture) and
//! administrative introspection of *other* connections' running scripts,
//! which needs cross-thread visibility.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Bookkeeping for the (at most one) script run active on a session.
#[derive(Default)]
pub struct RunState {
    /// Hex digest of the executing function, `None` when idle.
    executing: Mutex<Option<String>>,

    /// When the current run started.
    started_at: Mutex<Option<Instant>>,

    /// Advisory flag: the run exceeded the configured time ceiling.
    timeout_flagged: AtomicBool,

    /// A matching kill was observed; the next checkpoint aborts the run.
    kill_requested: AtomicBool,
}

impl RunState {
    /// Creates an idle run state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the start of a run.
    pub fn begin(&self, digest: &str) {
        *self.executing.lock() = Some(digest.to_string());
        *self.started_at.lock() = Some(Instant::now());
        self.timeout_flagged.store(false, Ordering::SeqCst);
        self.kill_requested.store(false, Ordering::SeqCst);
    }

    /// Record the end of a run (success or failure) and clear every flag.
    pub fn finish(&self) {
        *self.executing.lock() = None;
        *self.started_at.lock() = None;
        self.timeout_flagged.store(false, Ordering::SeqCst);
        self.kill_requested.store(false, Ordering::SeqCst);
    }

    /// Digest of the executing function, if a run is active.
    pub fn executing(&self) -> Option<String> {
        self.executing.lock().clone()
    }

    /// Wall time elapsed since the run started.
    pub fn elapsed(&self) -> Option<Duration> {
        self.started_at.lock().map(|start| start.elapsed())
    }

    /// Set the advisory timeout flag; returns true if it was newly set.
    pub fn flag_timeout(&self) -> bool {
        !self.timeout_flagged.swap(true, Ordering::SeqCst)
    }

    /// True if the run has been flagged as exceeding its time ceiling.
    pub fn timeout_flagged(&self) -> bool {
        self.timeout_flagged.load(Ordering::SeqCst)
    }

    /// Request cancellation of the current run.
    pub fn request_kill(&self) {
        self.kill_requested.store(true, Ordering::SeqCst);
    }

    /// True if cancellation has been requested.
    pub fn kill_requested(&self) -> bool {
        self.kill_requested.load(Ordering::SeqCst)
    }
}
