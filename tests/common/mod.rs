//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use cinder_script::{
    CommandDispatcher, CommandSetting, DispatchMode, InMemoryScriptStore, InterpreterPool,
    Options, WireReply, CMD_NOSCRIPT,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Map-backed dispatcher that records every executed command.
pub struct StoreDispatcher {
    pub data: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
    pub executed: Mutex<Vec<String>>,
}

impl StoreDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(HashMap::new()),
            executed: Mutex::new(Vec::new()),
        })
    }

    pub fn executed_count(&self) -> usize {
        self.executed.lock().len()
    }
}

impl CommandDispatcher for StoreDispatcher {
    fn find_setting(&self, name: &str) -> Option<CommandSetting> {
        match name {
            "ping" | "set" | "get" | "range" => Some(CommandSetting::new(0)),
            "shutdown" => Some(CommandSetting::new(CMD_NOSCRIPT)),
            _ => None,
        }
    }

    fn execute(&self, args: &[Vec<u8>], _mode: DispatchMode) -> WireReply {
        self.executed
            .lock()
            .push(String::from_utf8_lossy(&args[0]).into_owned());
        match args[0].as_slice() {
            b"ping" => WireReply::Status("PONG".to_string()),
            b"set" => {
                self.data.lock().insert(args[1].clone(), args[2].clone());
                WireReply::ok()
            }
            b"get" => match self.data.lock().get(&args[1]) {
                Some(value) => WireReply::Bulk(value.clone()),
                None => WireReply::Nil,
            },
            b"range" => WireReply::Array(vec![
                WireReply::Integer(1),
                WireReply::Status("OK".to_string()),
                WireReply::Bulk(b"two".to_vec()),
                WireReply::Nil,
                WireReply::Array(vec![WireReply::Integer(3)]),
            ]),
            _ => WireReply::error("ERR unreachable"),
        }
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn pool_with(options: Options) -> (Arc<StoreDispatcher>, InterpreterPool) {
    init_logging();
    let dispatcher = StoreDispatcher::new();
    let pool = InterpreterPool::new(
        Arc::clone(&dispatcher) as Arc<dyn CommandDispatcher>,
        Arc::new(InMemoryScriptStore::new()),
        options,
    );
    (dispatcher, pool)
}

pub fn pool() -> (Arc<StoreDispatcher>, InterpreterPool) {
    pool_with(Options::default())
}
