//! Script execution engine.
//!
//! One engine per connection, exclusively owned by the thread servicing it
//! (the interpreter handle is not `Send`, so this is compiler-enforced).
//! A run walks a fixed state machine: resolve the callable by digest-derived
//! name, define it on demand, bind `KEYS`/`ARGV`, invoke under the
//! pre-registered error handler, convert the result, and always finish with
//! the cleanup step: hook removal, run-state reset, one incremental GC step
//! and any deferred interpreter rebuild.

use crossbeam::channel::Receiver;
use mlua::{Function, Lua, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::ScriptStore;
use crate::command::CommandDispatcher;
use crate::config::Options;
use crate::context::RunState;
use crate::digest::{function_name, sha1_hex, DIGEST_HEX_LEN};
use crate::error::{Error, Result, KILLED_MESSAGE};
use crate::events::{IoScheduler, ScriptEvent};
use crate::marshal::script_to_wire;
use crate::rand::{Lrand48, RUN_SEED};
use crate::reply::WireReply;
use crate::sandbox::{self, ERR_HANDLER_NAME};
use crate::watchdog;

/// How a run identifies its script.
enum Source<'a> {
    /// Raw body (EVAL).
    Body(&'a str),
    /// Lowercase hex digest (EVALSHA), already length-checked.
    Digest(&'a str),
}

/// Per-connection script execution engine.
pub struct ScriptEngine {
    conn_id: u64,
    lua: Lua,
    state: Arc<RunState>,
    events: Receiver<ScriptEvent>,
    reset_pending: Arc<AtomicBool>,
    dispatcher: Arc<dyn CommandDispatcher>,
    store: Arc<dyn ScriptStore>,
    rng: Arc<Lrand48>,
    scheduler: Option<Arc<dyn IoScheduler>>,
    options: Options,
    on_drop: Option<Box<dyn FnOnce() + Send>>,
}

impl ScriptEngine {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        conn_id: u64,
        dispatcher: Arc<dyn CommandDispatcher>,
        store: Arc<dyn ScriptStore>,
        rng: Arc<Lrand48>,
        scheduler: Option<Arc<dyn IoScheduler>>,
        options: Options,
        state: Arc<RunState>,
        events: Receiver<ScriptEvent>,
        on_drop: Option<Box<dyn FnOnce() + Send>>,
    ) -> Result<Self> {
        options.validate()?;
        let lua = sandbox::build(Arc::clone(&dispatcher), Arc::clone(&rng))?;
        Ok(Self {
            conn_id,
            lua,
            state,
            events,
            reset_pending: Arc::new(AtomicBool::new(false)),
            dispatcher,
            store,
            rng,
            scheduler,
            options,
            on_drop,
        })
    }

    /// Execute a script body (EVAL).
    pub fn eval(
        &mut self,
        body: &str,
        keys: &[Vec<u8>],
        argv: &[Vec<u8>],
    ) -> Result<WireReply> {
        self.run(Source::Body(body), keys, argv)
    }

    /// Execute a cached script by digest (EVALSHA).
    ///
    /// A digest of the wrong length is rejected before any lookup.
    pub fn eval_sha(
        &mut self,
        digest: &str,
        keys: &[Vec<u8>],
        argv: &[Vec<u8>],
    ) -> Result<WireReply> {
        if digest.len() != DIGEST_HEX_LEN {
            return Err(Error::NoScript);
        }
        let digest = digest.to_lowercase();
        self.run(Source::Digest(&digest), keys, argv)
    }

    /// Compile and cache a script body without running it (SCRIPT LOAD).
    /// Idempotent: reloading an already-cached body returns the same digest.
    pub fn script_load(&mut self, body: &str) -> Result<String> {
        self.drain_pending_events()?;
        let digest = sha1_hex(body.as_bytes());
        let funcname = function_name(&digest);
        self.define(&funcname, body)?;
        Ok(digest)
    }

    /// True if the store has a body for the digest (SCRIPT EXISTS).
    pub fn script_exists(&self, digest: &str) -> Result<bool> {
        let funcname = function_name(&digest.to_lowercase());
        Ok(self.store.get(&funcname)?.is_some())
    }

    /// The run bookkeeping shared with the cancellation controller.
    pub(crate) fn run_state(&self) -> Arc<RunState> {
        Arc::clone(&self.state)
    }

    fn run(
        &mut self,
        source: Source<'_>,
        keys: &[Vec<u8>],
        argv: &[Vec<u8>],
    ) -> Result<WireReply> {
        // Every run draws from the same stream, so replicated executions of
        // the same script see identical randomness.
        self.rng.seed(RUN_SEED);
        self.drain_pending_events()?;

        let digest = match &source {
            Source::Body(body) => sha1_hex(body.as_bytes()),
            Source::Digest(digest) => (*digest).to_string(),
        };
        let funcname = function_name(&digest);
        log::debug!("Executing script f_{}", digest);

        let func = match self
            .lua
            .globals()
            .raw_get::<_, Option<Function<'_>>>(funcname.as_str())?
        {
            Some(func) => func,
            None => {
                let body = match &source {
                    Source::Body(body) => (*body).to_string(),
                    Source::Digest(_) => {
                        self.store.get(&funcname)?.ok_or(Error::NoScript)?
                    }
                };
                self.define(&funcname, &body)?
            }
        };

        self.bind_global_array("KEYS", keys)?;
        self.bind_global_array("ARGV", argv)?;

        self.state.begin(&digest);
        let hooked = self.options.time_limit_ms > 0;
        if hooked {
            watchdog::install(
                &self.lua,
                Arc::clone(&self.state),
                self.events.clone(),
                Arc::clone(&self.reset_pending),
                self.scheduler.clone(),
                Duration::from_millis(self.options.time_limit_ms),
                self.options.hook_instruction_period,
            );
        }

        let outcome = self.invoke(func, &digest);

        // Cleanup runs on every path; a failed run must leave the engine
        // ready for the next one.
        if hooked {
            watchdog::uninstall(&self.lua);
        }
        self.state.finish();
        let _ = self.lua.gc_step();
        if self.reset_pending.swap(false, Ordering::SeqCst) {
            self.rebuild()?;
        }

        if let Err(err) = &outcome {
            log::warn!("Script f_{} failed: {}", digest, err);
        }
        outcome
    }

    fn invoke(&self, func: Function<'_>, digest: &str) -> Result<WireReply> {
        let globals = self.lua.globals();
        let handler: Function<'_> = globals.raw_get(ERR_HANDLER_NAME)?;
        let xpcall: Function<'_> = globals.raw_get("xpcall")?;

        let (ok, ret): (bool, Value<'_>) = xpcall.call((func, handler))?;
        if ok {
            return Ok(script_to_wire(ret)?);
        }

        let message = match self.lua.coerce_string(ret)? {
            Some(s) => String::from_utf8_lossy(s.as_bytes()).into_owned(),
            None => "unknown error".to_string(),
        };
        if message.contains(KILLED_MESSAGE) {
            Err(Error::Killed { function: digest.to_string() })
        } else {
            Err(Error::Runtime { function: digest.to_string(), message })
        }
    }

    /// Compile a body and bind it under its digest-derived name.
    ///
    /// A compile failure leaves no partial binding; a persist failure
    /// removes the binding again, so the interpreter never holds a callable
    /// the store cannot resolve.
    fn define<'l>(&'l self, funcname: &str, body: &str) -> Result<Function<'l>> {
        let func = self
            .lua
            .load(body)
            .set_name("@user_script")
            .into_function()
            .map_err(|e| Error::Compile(e.to_string()))?;
        self.lua.globals().raw_set(funcname, func.clone())?;

        if let Err(err) = self.store.save(funcname, body) {
            let _ = self.lua.globals().raw_set(funcname, Value::Nil);
            return Err(err);
        }
        Ok(func)
    }

    /// KEYS/ARGV are framework-level bindings, overwritten every run through
    /// the privileged raw path.
    fn bind_global_array(&self, name: &str, items: &[Vec<u8>]) -> Result<()> {
        let table = self.lua.create_table()?;
        for (i, item) in items.iter().enumerate() {
            table.raw_set(i as i64 + 1, self.lua.create_string(item)?)?;
        }
        self.lua.globals().raw_set(name, table)?;
        Ok(())
    }

    /// Apply events that arrived while the session was idle. Flush rebuilds
    /// the interpreter; kills are stale here because no run is active yet.
    fn drain_pending_events(&mut self) -> Result<()> {
        let mut rebuild = self.reset_pending.swap(false, Ordering::SeqCst);
        while let Ok(event) = self.events.try_recv() {
            match event {
                ScriptEvent::Flush => rebuild = true,
                ScriptEvent::Kill { .. } => {}
            }
        }
        if rebuild {
            self.rebuild()?;
        }
        Ok(())
    }

    fn rebuild(&mut self) -> Result<()> {
        log::info!("Rebuilding script interpreter for connection {}", self.conn_id);
        self.lua = sandbox::build(Arc::clone(&self.dispatcher), Arc::clone(&self.rng))?;
        Ok(())
    }
}

impl Drop for ScriptEngine {
    fn drop(&mut self) {
        if let Some(on_drop) = self.on_drop.take() {
            on_drop();
        }
    }
}
