//! Cancellation controller.
//!
//! Installed as an instruction-count hook for the duration of a run. Each
//! checkpoint drains pending administrative events, flags a run that has
//! exceeded its wall-clock ceiling (advisory: the script keeps going),
//! yields to the host I/O scheduler while flagged, and raises the fatal
//! in-script error once a matching kill has been observed.
//!
//! Cancellation is cooperative: a run that never reaches a checkpoint (for
//! example a single long native call) cannot be killed. That is an accepted
//! property of the model, not a defect.

use crossbeam::channel::Receiver;
use mlua::{HookTriggers, Lua};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::context::RunState;
use crate::error::KILLED_MESSAGE;
use crate::events::{IoScheduler, ScriptEvent};

/// Install the controller for the run that is about to start.
#[allow(clippy::too_many_arguments)]
pub(crate) fn install(
    lua: &Lua,
    state: Arc<RunState>,
    events: Receiver<ScriptEvent>,
    reset_pending: Arc<AtomicBool>,
    scheduler: Option<Arc<dyn IoScheduler>>,
    time_limit: Duration,
    period: u32,
) {
    lua.set_hook(
        HookTriggers {
            every_nth_instruction: Some(period),
            ..Default::default()
        },
        move |_lua, _debug| {
            while let Ok(event) = events.try_recv() {
                match &event {
                    ScriptEvent::Flush => reset_pending.store(true, Ordering::SeqCst),
                    ScriptEvent::Kill { .. } => {
                        if let Some(executing) = state.executing() {
                            if event.kills(&executing) {
                                state.request_kill();
                            }
                        }
                    }
                }
            }

            if let Some(elapsed) = state.elapsed() {
                if elapsed >= time_limit && state.flag_timeout() {
                    log::warn!(
                        "Slow script detected: f_{} still in execution after {} ms. \
                         You can try killing the script using the SCRIPT KILL command.",
                        state.executing().unwrap_or_default(),
                        elapsed.as_millis()
                    );
                }
            }

            // Keep other connections serviced while this thread stays busy.
            if state.timeout_flagged() {
                if let Some(scheduler) = &scheduler {
                    scheduler.continue_events();
                }
            }

            if state.kill_requested() {
                log::warn!("Script killed by user with SCRIPT KILL.");
                return Err(mlua::Error::RuntimeError(KILLED_MESSAGE.to_string()));
            }

            Ok(())
        },
    );
}

/// Remove the controller once the run has finished.
pub(crate) fn uninstall(lua: &Lua) {
    lua.remove_hook();
}
