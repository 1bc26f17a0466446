//! Persistent script-body store contract and the in-memory implementation.
//!
//! The store maps digest-derived function names to script bodies so that a
//! later EVALSHA (or a replica replaying the stream) can recover the source.
//! It is shared process-wide: concurrent reads are common, writes happen on
//! define, and a flush clears it store-wide, serialised against in-flight
//! defines by the write lock.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::error::Result;

/// Persistent mapping from function name to script body.
pub trait ScriptStore: Send + Sync {
    /// Persist a `name -> body` record. Overwriting an existing record with
    /// the same body is a no-op by construction (the name is derived from
    /// the body).
    fn save(&self, name: &str, body: &str) -> Result<()>;

    /// Fetch the body for a function name, if present.
    fn get(&self, name: &str) -> Result<Option<String>>;

    /// Remove every record.
    fn flush_all(&self) -> Result<()>;
}

/// In-memory script store shared across all connections.
#[derive(Default)]
pub struct InMemoryScriptStore {
    scripts: RwLock<HashMap<String, String>>,
}

impl InMemoryScriptStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached scripts.
    pub fn len(&self) -> usize {
        self.scripts.read().len()
    }

    /// True if no script is cached.
    pub fn is_empty(&self) -> bool {
        self.scripts.read().is_empty()
    }
}

impl ScriptStore for InMemoryScriptStore {
    fn save(&self, name: &str, body: &str) -> Result<()> {
        self.scripts.write().insert(name.to_string(), body.to_string());
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Option<String>> {
        Ok(self.scripts.read().get(name).cloned())
    }

    fn flush_all(&self) -> Result<()> {
        self.scripts.write().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_save_and_get() {
        let store = InMemoryScriptStore::new();
        store.save("f_abc", "return 1").unwrap();
        assert_eq!(store.get("f_abc").unwrap(), Some("return 1".to_string()));
        assert_eq!(store.get("f_def").unwrap(), None);
    }

    #[test]
    fn test_flush_all() {
        let store = InMemoryScriptStore::new();
        store.save("f_abc", "return 1").unwrap();
        store.save("f_def", "return 2").unwrap();
        assert_eq!(store.len(), 2);

        store.flush_all().unwrap();
        assert!(store.is_empty());
        assert_eq!(store.get("f_abc").unwrap(), None);
    }

    #[test]
    fn test_concurrent_readers_and_writers() {
        let store = Arc::new(InMemoryScriptStore::new());
        let mut handles = Vec::new();

        for t in 0..4 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                for i in 0..50 {
                    let name = format!("f_{}_{}", t, i);
                    store.save(&name, "return 1").unwrap();
                    assert!(store.get(&name).unwrap().is_some());
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len(), 200);
    }
}
