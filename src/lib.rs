//! # Cinder Script - Sandboxed Lua scripting for an in-memory data store
//!
//! This crate is the scripting bridge of the Cinder server: clients submit
//! Lua scripts that execute store commands atomically inside a sandboxed
//! interpreter, with content-addressed caching (EVAL/EVALSHA), slow-script
//! detection and cooperative cross-thread cancellation.
//!
//! ## Architecture
//!
//! The subsystem consists of a few cooperating components:
//!
//! - **Marshaler**: lossless conversion between wire replies and Lua values
//! - **Sandbox**: restricted library surface, protected globals, and a
//!   deterministic `math.random` for reproducible replication
//! - **Script cache**: digest-named callables backed by a shared store
//! - **Command bridge**: `redis.call`/`redis.pcall` into the host executor
//! - **Engine**: the per-connection EVAL/EVALSHA state machine
//! - **Pool**: session registry carrying SCRIPT KILL and SCRIPT FLUSH
//!
//! The interpreter itself is the vendored Lua 5.4 embedded through `mlua`;
//! this crate never parses or compiles Lua on its own.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use cinder_script::{
//!     CommandDispatcher, CommandSetting, DispatchMode, InMemoryScriptStore,
//!     InterpreterPool, Options, WireReply,
//! };
//! use std::sync::Arc;
//!
//! struct Dispatcher;
//!
//! impl CommandDispatcher for Dispatcher {
//!     fn find_setting(&self, _name: &str) -> Option<CommandSetting> {
//!         Some(CommandSetting::new(0))
//!     }
//!
//!     fn execute(&self, _args: &[Vec<u8>], _mode: DispatchMode) -> WireReply {
//!         WireReply::ok()
//!     }
//! }
//!
//! # fn main() -> Result<(), cinder_script::Error> {
//! let pool = InterpreterPool::new(
//!     Arc::new(Dispatcher),
//!     Arc::new(InMemoryScriptStore::new()),
//!     Options::default(),
//! );
//!
//! let mut engine = pool.engine(1)?;
//! let reply = engine.eval(
//!     "return redis.call('set', KEYS[1], ARGV[1])",
//!     &[b"greeting".to_vec()],
//!     &[b"hello".to_vec()],
//! )?;
//! assert_eq!(reply, WireReply::Status("OK".to_string()));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Module declarations
pub mod cache;
pub mod command;
pub mod config;
pub mod digest;
pub mod engine;
pub mod error;
pub mod events;
pub mod marshal;
pub mod pool;
pub mod rand;
pub mod reply;

mod bridge;
mod context;
mod sandbox;
mod watchdog;

// Re-exports
pub use cache::{InMemoryScriptStore, ScriptStore};
pub use command::{CommandDispatcher, CommandSetting, DispatchMode, CMD_NOSCRIPT, CMD_WRITE};
pub use config::Options;
pub use engine::ScriptEngine;
pub use error::{Error, Result};
pub use events::{IoScheduler, ScriptEvent, KILL_ALL};
pub use pool::InterpreterPool;
pub use rand::Lrand48;
pub use reply::WireReply;
