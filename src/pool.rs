//! Process-wide registry of scripting sessions.
//!
//! The pool owns everything shared between connections (the script store,
//! the deterministic RNG, the dispatcher handle) and tracks one session
//! entry per live engine so administrative commands can reach them.
//! Engines themselves are built on, and stay on, the connection thread that
//! asks for them; only the cross-thread-safe run state and the event sender
//! live in the registry.

use crossbeam::channel::Sender;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::ScriptStore;
use crate::command::CommandDispatcher;
use crate::config::Options;
use crate::context::RunState;
use crate::engine::ScriptEngine;
use crate::error::Result;
use crate::events::{session_channel, IoScheduler, ScriptEvent};
use crate::rand::Lrand48;

struct SessionHandle {
    state: Arc<RunState>,
    events: Sender<ScriptEvent>,
}

/// Registry of per-connection script engines and their shared services.
pub struct InterpreterPool {
    sessions: Arc<Mutex<HashMap<u64, SessionHandle>>>,
    dispatcher: Arc<dyn CommandDispatcher>,
    store: Arc<dyn ScriptStore>,
    rng: Arc<Lrand48>,
    scheduler: Option<Arc<dyn IoScheduler>>,
    options: Options,
}

impl InterpreterPool {
    /// Creates a pool over the host dispatcher and script store.
    pub fn new(
        dispatcher: Arc<dyn CommandDispatcher>,
        store: Arc<dyn ScriptStore>,
        options: Options,
    ) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            dispatcher,
            store,
            rng: Arc::new(Lrand48::new()),
            scheduler: None,
            options,
        }
    }

    /// Attach the host I/O scheduler that slow-script checkpoints yield to.
    pub fn with_scheduler(mut self, scheduler: Arc<dyn IoScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// The generator scripts draw randomness from. The host store can hold a
    /// clone so replicated command streams share one stream of choices.
    pub fn rng(&self) -> Arc<Lrand48> {
        Arc::clone(&self.rng)
    }

    /// Build the engine for a connection and register its session.
    ///
    /// Must be called from the thread that will service the connection: the
    /// engine owns the interpreter and cannot move across threads.
    /// Registering an id that is already live replaces the old session entry.
    pub fn engine(&self, conn_id: u64) -> Result<ScriptEngine> {
        let (events_tx, events_rx) = session_channel();
        let state = Arc::new(RunState::new());

        let sessions = Arc::clone(&self.sessions);
        let my_state = Arc::clone(&state);
        let on_drop = Box::new(move || {
            let mut sessions = sessions.lock();
            // Only deregister our own entry; the id may have been re-used.
            if let Some(handle) = sessions.get(&conn_id) {
                if Arc::ptr_eq(&handle.state, &my_state) {
                    sessions.remove(&conn_id);
                }
            }
        });

        let engine = ScriptEngine::new(
            conn_id,
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.store),
            Arc::clone(&self.rng),
            self.scheduler.clone(),
            self.options.clone(),
            Arc::clone(&state),
            events_rx,
            Some(on_drop),
        )?;

        self.sessions.lock().insert(conn_id, SessionHandle { state, events: events_tx });
        Ok(engine)
    }

    /// SCRIPT KILL: request cancellation of the running script named by its
    /// digest, or of every running script with the wildcard "all".
    ///
    /// Matching is by function name, not run identity: identically-named
    /// scripts running on different connections are killed together.
    pub fn kill(&self, target: &str) {
        log::info!("Requesting kill of script '{}'", target);
        let event = ScriptEvent::Kill { target: target.to_string() };
        for handle in self.sessions.lock().values() {
            let _ = handle.events.send(event.clone());
        }
    }

    /// SCRIPT FLUSH: clear the script store and have every session rebuild
    /// its interpreter at the next run boundary.
    pub fn flush(&self) -> Result<()> {
        self.store.flush_all()?;
        for handle in self.sessions.lock().values() {
            let _ = handle.events.send(ScriptEvent::Flush);
        }
        log::info!("Script cache flushed");
        Ok(())
    }

    /// Digests of the scripts currently executing, across all sessions.
    pub fn running(&self) -> Vec<String> {
        self.sessions
            .lock()
            .values()
            .filter_map(|handle| handle.state.executing())
            .collect()
    }

    /// Number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }
}
