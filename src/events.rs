//! Cross-thread event delivery for the scripting subsystem.
//!
//! Administrative actions (SCRIPT FLUSH, SCRIPT KILL) are fired on whatever
//! thread handles the admin connection and observed by each session's
//! cancellation controller at its next checkpoint, or by the engine at its
//! next run boundary. Delivery is at-least-once and asynchronous relative to
//! the firing thread; matching happens at the observing session.

use crossbeam::channel::{unbounded, Receiver, Sender};

/// Wildcard kill target matching every running script.
pub const KILL_ALL: &str = "all";

/// An event fired at scripting sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptEvent {
    /// The script cache was flushed; rebuild the interpreter before the
    /// next run.
    Flush,

    /// Kill the running script whose function digest matches `target`
    /// (or every running script when `target` is the wildcard).
    Kill {
        /// Hex digest of the function to kill, or [`KILL_ALL`].
        target: String,
    },
}

impl ScriptEvent {
    /// True if this is a kill event matching the given executing digest.
    pub fn kills(&self, executing: &str) -> bool {
        match self {
            ScriptEvent::Kill { target } => {
                target.eq_ignore_ascii_case(KILL_ALL) || target.eq_ignore_ascii_case(executing)
            }
            ScriptEvent::Flush => false,
        }
    }
}

/// Create the channel pair connecting the pool to one session.
pub(crate) fn session_channel() -> (Sender<ScriptEvent>, Receiver<ScriptEvent>) {
    unbounded()
}

/// Host I/O scheduler hook.
///
/// While a run is flagged as slow, the cancellation controller yields to the
/// scheduler once per checkpoint so other connections keep being serviced
/// even though this thread stays busy in the interpreter.
pub trait IoScheduler: Send + Sync {
    /// Service pending I/O work once, without blocking.
    fn continue_events(&self);
}
